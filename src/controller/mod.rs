// CONTROLLER: Frame pacing and the cube host
pub mod frame_timer;
pub mod rotating_cube;

pub use frame_timer::FrameTimer;
pub use rotating_cube::{CubeError, RotatingCube};
