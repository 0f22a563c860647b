use glam::Mat4;
use thiserror::Error;

use crate::view::shader::LinkedProgram;

/// Handle to a buffer owned by a [`GraphicsContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Handle to a linked program owned by a [`GraphicsContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferTarget {
    Vertex,
    /// 32-bit indices
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Uploaded once, never written again
    StaticDraw,
}

/// How a float vertex attribute is read out of its buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    /// Floats per vertex (1..=4)
    pub components: u32,
    /// Bytes between consecutive vertices
    pub stride: u64,
    /// Byte offset of the first vertex
    pub offset: u64,
}

impl VertexLayout {
    /// Tightly packed f32 attribute starting at offset 0
    pub fn packed_f32(components: u32) -> Self {
        Self {
            components,
            stride: components as u64 * std::mem::size_of::<f32>() as u64,
            offset: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("buffer {0:?} does not exist or was already deleted")]
    UnknownBuffer(BufferId),
    #[error("program {0:?} does not exist or was already deleted")]
    UnknownProgram(ProgramId),
    #[error("no program is in use")]
    NoProgramBound,
    #[error("no index buffer is bound")]
    NoIndexBuffer,
    #[error("vertex attribute at location {0} has no buffer bound")]
    UnboundAttribute(u32),
    #[error("vertex attribute layout with {0} components is not supported")]
    UnsupportedLayout(u32),
    #[error("uniform location {0} is not declared by the current program")]
    UnknownUniform(u32),
    #[error("out of GPU memory: {0}")]
    OutOfMemory(String),
    #[error("GPU validation error: {0}")]
    Validation(String),
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("no suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to request device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

/// GL-style call surface the cube host and shader program drive.
///
/// Bindings (current program, attribute buffers, index buffer, clear color)
/// live in the context object instead of process-wide state, so every call
/// names the context it acts on.
pub trait GraphicsContext {
    fn create_buffer(
        &mut self,
        label: &str,
        target: BufferTarget,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferId, GpuError>;

    fn delete_buffer(&mut self, buffer: BufferId);

    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId, GpuError>;

    fn delete_program(&mut self, program: ProgramId);

    fn use_program(&mut self, program: ProgramId) -> Result<(), GpuError>;

    /// Feed attribute `location` from `buffer` read with `layout`
    fn bind_vertex_attribute(
        &mut self,
        location: u32,
        buffer: BufferId,
        layout: VertexLayout,
    ) -> Result<(), GpuError>;

    fn set_clear_color(&mut self, color: [f32; 4]);

    /// Clear color and depth targets of the frame being built
    fn clear(&mut self);

    /// Upload a matrix to a uniform of the program in use
    fn set_uniform_mat4(&mut self, location: u32, value: &Mat4) -> Result<(), GpuError>;

    fn bind_index_buffer(&mut self, buffer: BufferId) -> Result<(), GpuError>;

    /// Draw `count` indices from the bound index buffer as a triangle list
    fn draw_indexed(&mut self, count: u32) -> Result<(), GpuError>;

    fn present(&mut self) -> Result<(), GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_layouts() {
        let position = VertexLayout::packed_f32(3);
        assert_eq!(position.stride, 12);
        assert_eq!(position.offset, 0);

        let uv = VertexLayout::packed_f32(2);
        assert_eq!(uv.stride, 8);
    }
}
