//! Configuration parsing and validation for putting games

use kernel::{EngineSettings, GridSpec};
use serde::{Deserialize, Serialize};
use std::fs;

/// Main game configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Human-readable course name
    pub name: String,
    /// Simulation grid
    #[serde(default)]
    pub grid: GridConfig,
    /// Time stepping and frame pacing
    #[serde(default)]
    pub physics: PhysicsConfig,
    /// Ball start, hole and rules
    #[serde(default)]
    pub course: CourseConfig,
    /// Static background potential
    #[serde(default)]
    pub potential: PotentialConfig,
    /// Hard walls
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    /// Compute backend
    #[serde(default)]
    pub backend: BackendType,
    /// Measurement RNG seed
    #[serde(default)]
    pub seed: u64,
    /// Stop the runner after this many frames
    pub max_frames: Option<u64>,
}

/// Grid geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Cells along y
    #[serde(default = "default_height")]
    pub height: u32,
    /// Width / height; width is rounded to whole cells
    #[serde(default = "default_aspect")]
    pub aspect: f32,
    /// Cell spacing
    #[serde(default = "default_one")]
    pub dx: f32,
    /// Particle mass
    #[serde(default = "default_one")]
    pub mass: f32,
}

/// Time stepping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsConfig {
    /// Quarter-turn time step
    #[serde(default = "default_dt")]
    pub dt: f32,
    /// Drag strength (0 disables the drag potential)
    #[serde(default = "default_drag")]
    pub drag: f32,
    /// Nominal physics rate
    #[serde(default = "default_turns_per_second")]
    pub turns_per_second: f32,
    /// Physics time per frame is capped at 1/min_fps (plus one turn)
    #[serde(default = "default_min_fps")]
    pub min_fps: f32,
}

/// Course layout and rules. Positions are fractions of the grid size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CourseConfig {
    /// Ball start as fractions of (width, height)
    #[serde(default = "default_start")]
    pub start: [f32; 2],
    /// Initial packet width as a fraction of the height
    #[serde(default = "default_initial_sigma_frac")]
    pub initial_sigma_frac: f32,
    /// Hole radius as a fraction of the height
    #[serde(default = "default_hole_radius_frac")]
    pub hole_radius_frac: f32,
    /// Hole depth, sets how tightly the goal state is bound
    #[serde(default = "default_hole_depth")]
    pub hole_depth: f32,
    /// Distance of the hole from the right edge, as a fraction of the height
    #[serde(default = "default_hole_inset_frac")]
    pub hole_inset_frac: f32,
    /// Win probability needed to sink the putt
    #[serde(default = "default_win_threshold")]
    pub win_threshold: f32,
    /// Par, in whole strokes
    #[serde(default = "default_par")]
    pub par: u32,
    /// Initial club size in [0, 1]
    #[serde(default = "default_club_size")]
    pub club_size: f32,
    /// Momentum per cell of aim offset
    #[serde(default = "default_aim_scale")]
    pub aim_scale: f32,
}

/// Static potential shape
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PotentialConfig {
    /// Zero everywhere
    #[default]
    Flat,
    /// `strength * r^2 / H^2` around the grid centre, in physical units
    Bowl {
        /// Potential at a distance of one grid height
        strength: f32,
    },
}

/// Rectangular wall, in fractions of the grid size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Obstacle {
    /// Axis-aligned wall block
    Wall {
        /// Left edge
        x0: f32,
        /// Right edge
        x1: f32,
        /// Bottom edge
        y0: f32,
        /// Top edge
        y1: f32,
    },
}

/// Compute backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendType {
    /// Rayon CPU device
    Cpu,
    /// wgpu device (needs the `gpu` feature)
    Gpu,
    /// GPU when available, CPU otherwise
    #[default]
    Auto,
}

// Default values
fn default_height() -> u32 {
    512
}

fn default_aspect() -> f32 {
    1.6
}

fn default_one() -> f32 {
    1.0
}

fn default_dt() -> f32 {
    0.2
}

fn default_drag() -> f32 {
    4.0
}

fn default_turns_per_second() -> f32 {
    300.0
}

fn default_min_fps() -> f32 {
    20.0
}

fn default_start() -> [f32; 2] {
    [0.2, 0.5]
}

fn default_initial_sigma_frac() -> f32 {
    0.03
}

fn default_hole_radius_frac() -> f32 {
    0.2
}

fn default_hole_depth() -> f32 {
    0.05
}

fn default_hole_inset_frac() -> f32 {
    0.45
}

fn default_win_threshold() -> f32 {
    0.5
}

fn default_par() -> u32 {
    5
}

fn default_club_size() -> f32 {
    0.25
}

fn default_aim_scale() -> f32 {
    1.6e-3
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { height: default_height(), aspect: default_aspect(), dx: default_one(), mass: default_one() }
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            drag: default_drag(),
            turns_per_second: default_turns_per_second(),
            min_fps: default_min_fps(),
        }
    }
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            initial_sigma_frac: default_initial_sigma_frac(),
            hole_radius_frac: default_hole_radius_frac(),
            hole_depth: default_hole_depth(),
            hole_inset_frac: default_hole_inset_frac(),
            win_threshold: default_win_threshold(),
            par: default_par(),
            club_size: default_club_size(),
            aim_scale: default_aim_scale(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            grid: GridConfig::default(),
            physics: PhysicsConfig::default(),
            course: CourseConfig::default(),
            potential: PotentialConfig::default(),
            obstacles: Vec::new(),
            backend: BackendType::default(),
            seed: 0,
            max_frames: None,
        }
    }
}

impl GameConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        let config: GameConfig = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let grid = self.grid_spec()?;

        let max_dt = grid.max_stable_dt();
        if !(self.physics.dt > 0.0 && self.physics.dt < max_dt) {
            return Err(format!(
                "dt must be in range (0, {}) for dx={} and mass={}",
                max_dt, grid.dx, grid.mass
            ));
        }
        if !self.physics.drag.is_finite() || self.physics.drag < 0.0 {
            return Err("Drag must be non-negative".to_string());
        }
        if !(self.physics.turns_per_second > 0.0) {
            return Err("turns_per_second must be positive".to_string());
        }
        if !(self.physics.min_fps > 0.0) {
            return Err("min_fps must be positive".to_string());
        }

        let course = &self.course;
        if !(course.win_threshold > 0.0 && course.win_threshold <= 1.0) {
            return Err("Win threshold must be in range (0, 1]".to_string());
        }
        if course.start.iter().any(|f| !(0.0..=1.0).contains(f)) {
            return Err("Start position must be inside the grid".to_string());
        }
        if !(course.initial_sigma_frac > 0.0) {
            return Err("initial_sigma_frac must be positive".to_string());
        }
        if !(course.hole_radius_frac > 0.0) || !(course.hole_depth > 0.0) {
            return Err("Hole radius and depth must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&course.club_size) {
            return Err("Club size must be in range [0, 1]".to_string());
        }

        for obstacle in &self.obstacles {
            let Obstacle::Wall { x0, x1, y0, y1 } = *obstacle;
            if !(x0 < x1 && y0 < y1) {
                return Err(format!("Wall ({}, {})-({}, {}) is empty", x0, y0, x1, y1));
            }
        }

        if self.max_frames == Some(0) {
            return Err("max_frames must be at least 1".to_string());
        }
        Ok(())
    }

    /// The simulation grid this config describes.
    pub fn grid_spec(&self) -> Result<GridSpec, String> {
        GridSpec::with_aspect(self.grid.height, self.grid.aspect, self.grid.dx, self.grid.mass)
            .map_err(|e| e.to_string())
    }

    /// Engine construction parameters.
    pub fn engine_settings(&self) -> Result<EngineSettings, String> {
        Ok(EngineSettings {
            grid: self.grid_spec()?,
            dt: self.physics.dt,
            drag: self.physics.drag,
            turns_per_second: self.physics.turns_per_second,
            seed: self.seed,
        })
    }

    /// Rasterise the static potential and the wall mask, `W * H` each.
    pub fn fields(&self, grid: &GridSpec) -> (Vec<f32>, Vec<f32>) {
        let (w, h) = (grid.width as usize, grid.height as usize);
        let (pw, ph) = grid.physical_size();
        let mut potential = vec![0.0f32; w * h];
        let mut mask = vec![0.0f32; w * h];

        if let PotentialConfig::Bowl { strength } = self.potential {
            let (cx, cy) = (0.5 * pw, 0.5 * ph);
            for (i, v) in potential.iter_mut().enumerate() {
                let x = (i % w) as f32 * grid.dx - cx;
                let y = (i / w) as f32 * grid.dx - cy;
                *v = strength * (x * x + y * y) / (ph * ph);
            }
        }

        for obstacle in &self.obstacles {
            let Obstacle::Wall { x0, x1, y0, y1 } = *obstacle;
            let cols = (x0 * w as f32).floor().max(0.0) as usize..((x1 * w as f32).ceil() as usize).min(w);
            let rows = (y0 * h as f32).floor().max(0.0) as usize..((y1 * h as f32).ceil() as usize).min(h);
            for y in rows {
                for x in cols.clone() {
                    mask[y * w + x] = 1.0;
                }
            }
        }
        (potential, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_sections() {
        let config: GameConfig = serde_json::from_str(r#"{ "name": "green" }"#).unwrap();
        assert_eq!(config.grid.height, 512);
        assert_eq!(config.physics.turns_per_second, 300.0);
        assert_eq!(config.course.par, 5);
        assert_eq!(config.backend, BackendType::Auto);
        assert!(config.validate().is_ok());

        let grid = config.grid_spec().unwrap();
        assert_eq!((grid.width, grid.height), (819, 512));
    }

    #[test]
    fn test_round_trip_json() {
        let config = GameConfig {
            name: "dogleg".to_string(),
            potential: PotentialConfig::Bowl { strength: 0.01 },
            obstacles: vec![Obstacle::Wall { x0: 0.4, x1: 0.45, y0: 0.0, y1: 0.6 }],
            backend: BackendType::Cpu,
            max_frames: Some(100),
            ..GameConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: GameConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validation_dt() {
        let mut config = GameConfig::default();
        config.physics.dt = 0.5;
        assert!(config.validate().is_err());

        config.physics.dt = 0.0;
        assert!(config.validate().is_err());

        config.physics.dt = 0.25;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_dt_follows_grid_spacing() {
        // Stable up to 0.5 * m * dx^2.
        let mut config = GameConfig::default();
        config.grid.dx = 2.0;
        config.physics.dt = 1.5;
        assert!(config.validate().is_ok());
        config.physics.dt = 2.0;
        assert!(config.validate().is_err());

        config.grid.dx = 0.5;
        config.physics.dt = 0.2;
        assert!(config.validate().is_err());
        config.physics.dt = 0.1;
        assert!(config.validate().is_ok());

        config.grid.dx = 1.0;
        config.grid.mass = 4.0;
        config.physics.dt = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_threshold_and_grid() {
        let mut config = GameConfig::default();
        config.course.win_threshold = 1.5;
        assert!(config.validate().is_err());

        config.course.win_threshold = 0.5;
        config.grid.height = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wall_mask() {
        let config = GameConfig {
            grid: GridConfig { height: 10, aspect: 1.0, dx: 1.0, mass: 1.0 },
            obstacles: vec![Obstacle::Wall { x0: 0.5, x1: 0.7, y0: 0.0, y1: 0.3 }],
            ..GameConfig::default()
        };
        let grid = config.grid_spec().unwrap();
        let (potential, mask) = config.fields(&grid);
        assert!(potential.iter().all(|&v| v == 0.0));
        assert_eq!(mask.iter().filter(|&&m| m >= 0.5).count(), 2 * 3);
        assert_eq!(mask[5], 1.0);
        assert_eq!(mask[4], 0.0);
        assert_eq!(mask[3 * 10 + 5], 0.0);
    }
}
