// VIEW: Graphics context, shaders and rendering backends
pub mod context;
pub mod gpu_init;
pub mod shader;
pub mod tracking;

pub use context::{BufferId, GpuError, GraphicsContext, ProgramId};
pub use gpu_init::WgpuContext;
pub use shader::{ShaderError, ShaderProgram, ShaderStage};
pub use tracking::TrackingContext;
