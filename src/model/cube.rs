use glam::Mat4;

/// Corners of the unit cube centred on the origin, 3 floats each
pub const VERTICES: [f32; 24] = [
    -0.5, -0.5, -0.5,
     0.5, -0.5, -0.5,
     0.5,  0.5, -0.5,
    -0.5,  0.5, -0.5,
    -0.5, -0.5,  0.5,
     0.5, -0.5,  0.5,
     0.5,  0.5,  0.5,
    -0.5,  0.5,  0.5,
];

/// One UV per corner, 2 floats each
pub const UVS: [f32; 16] = [
    0.0, 0.0,
    1.0, 0.0,
    1.0, 1.0,
    0.0, 1.0,
    0.0, 0.0,
    1.0, 0.0,
    1.0, 1.0,
    0.0, 1.0,
];

/// 12 triangles, two per face
pub const INDICES: [u32; 36] = [
    0, 1, 2, 2, 3, 0, // back
    4, 5, 6, 6, 7, 4, // front
    0, 3, 7, 7, 4, 0, // left
    1, 2, 6, 6, 5, 1, // right
    3, 2, 6, 6, 7, 3, // top
    0, 1, 5, 5, 4, 0, // bottom
];

pub const POSITION_COMPONENTS: u32 = 3;
pub const UV_COMPONENTS: u32 = 2;

/// Model matrix that accumulates a rotation about +Y
#[derive(Debug, Clone, Copy)]
pub struct Spin {
    pub model: Mat4,
    /// Radians per second
    pub speed: f32,
}

impl Spin {
    pub fn new(speed: f32) -> Self {
        Self { model: Mat4::IDENTITY, speed }
    }

    pub fn advance(&mut self, elapsed_seconds: f32) {
        self.model *= Mat4::from_rotation_y(self.speed * elapsed_seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_stay_in_range() {
        let vertex_count = VERTICES.len() / POSITION_COMPONENTS as usize;
        assert_eq!(vertex_count, 8);
        assert_eq!(UVS.len() / UV_COMPONENTS as usize, vertex_count);
        assert!(INDICES.iter().all(|&i| (i as usize) < vertex_count));
        assert_eq!(INDICES.len() % 3, 0);
    }

    #[test]
    fn test_zero_step_keeps_identity() {
        let mut spin = Spin::new(1.5);
        spin.advance(0.0);
        assert_eq!(spin.model, Mat4::IDENTITY);
    }

    #[test]
    fn test_steps_compose() {
        let mut split = Spin::new(1.5);
        split.advance(0.25);
        split.advance(0.5);

        let mut whole = Spin::new(1.5);
        whole.advance(0.75);

        assert!(split.model.abs_diff_eq(whole.model, 1e-5));
    }

    #[test]
    fn test_rotation_only_touches_xz() {
        let mut spin = Spin::new(std::f32::consts::FRAC_PI_2);
        spin.advance(1.0);

        // +X swings onto -Z after a quarter turn
        let x = spin.model.transform_vector3(glam::Vec3::X);
        assert!(x.abs_diff_eq(glam::Vec3::NEG_Z, 1e-6));
        assert_eq!(spin.model.transform_vector3(glam::Vec3::Y), glam::Vec3::Y);
    }
}
