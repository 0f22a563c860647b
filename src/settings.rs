/// Window and demo constants
#[derive(Debug, Clone)]
pub struct Settings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub ticks_per_second: f64,
    /// Radians per second about +Y
    pub rotation_speed: f32,
    pub clear_color: [f32; 4],
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            title: "Cubo Rotacional em 3D".to_string(),
            width: 800,
            height: 600,
            ticks_per_second: 60.0,
            rotation_speed: 1.5,
            clear_color: [0.1, 0.1, 0.1, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window() {
        let settings = Settings::default();
        assert_eq!(settings.title, "Cubo Rotacional em 3D");
        assert_eq!((settings.width, settings.height), (800, 600));
        assert_eq!(settings.ticks_per_second, 60.0);
    }
}
