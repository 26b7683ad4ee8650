//! The course files under `configs/` parse and validate.

use orchestrator::config::{Obstacle, PotentialConfig};
use orchestrator::{BackendType, GameConfig};
use std::path::PathBuf;

fn config_path(name: &str) -> String {
    let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "..", "..", "configs", name].iter().collect();
    path.to_string_lossy().into_owned()
}

#[test]
fn default_course_matches_the_defaults() {
    let config = GameConfig::load(&config_path("default.json")).unwrap();
    assert_eq!(config.name, "Straight green");
    let expected = GameConfig { name: config.name.clone(), ..GameConfig::default() };
    assert_eq!(config, expected);
}

#[test]
fn dogleg_course_has_a_wall_and_a_bowl() {
    let config = GameConfig::load(&config_path("dogleg.json")).unwrap();
    assert_eq!(config.backend, BackendType::Cpu);
    assert_eq!(config.course.par, 7);
    assert_eq!(config.course.win_threshold, 0.5);
    assert_eq!(config.potential, PotentialConfig::Bowl { strength: 0.02 });
    assert!(matches!(config.obstacles[0], Obstacle::Wall { x0, .. } if x0 == 0.45));

    let grid = config.grid_spec().unwrap();
    assert_eq!((grid.width, grid.height), (386, 257));
    let (potential, mask) = config.fields(&grid);
    assert!(mask.iter().any(|&m| m >= 0.5));
    // The bowl is lowest at the centre.
    let centre = potential[(128 * 386 + 193) as usize];
    assert!(centre < potential[0]);
}
