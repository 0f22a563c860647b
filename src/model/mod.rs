// MODEL: Cube geometry and transform state
pub mod cube;

pub use cube::{Spin, INDICES, UVS, VERTICES};
