//! Game rules on a small CPU course.

use orchestrator::config::GridConfig;
use orchestrator::{create_course, BackendType, Course, GameConfig};

fn small_config() -> GameConfig {
    GameConfig {
        name: "practice".to_string(),
        grid: GridConfig { height: 64, aspect: 1.5, dx: 1.0, mass: 1.0 },
        backend: BackendType::Cpu,
        seed: 3,
        ..GameConfig::default()
    }
}

fn course(config: GameConfig) -> Course {
    create_course(config).expect("course")
}

#[test]
fn layout_follows_the_grid() {
    let c = course(small_config());
    let status = c.status();
    assert_eq!((status.width, status.height), (96, 64));
    assert_eq!(c.start(), [0.2 * 96.0, 0.5 * 64.0]);
    let hole = c.hole();
    assert!((hole[0] - (96.0 - 0.45 * 64.0)).abs() < 1e-4);
    assert_eq!(hole[1], 32.0);
    assert!((c.initial_sigma() - 1.92).abs() < 1e-5);
    assert_eq!(status.score, 0);
    assert_eq!(status.par, 5);
    assert!(!status.won && !status.paused && !status.aiming);
}

#[test]
fn frame_runs_the_turn_budget() {
    let mut c = course(small_config());
    let before = c.engine().turns_run();
    c.frame(1.0 / 60.0);
    let status = c.status();
    // 1/60 s at 300 turns/s is 5 turns, split between run and skipped.
    assert_eq!(status.turns_run - before + status.skipped_turns as u64, 5);
    assert_eq!(status.frames, 1);
    assert!((status.total_probability - 1.0).abs() < 0.02, "total {}", status.total_probability);
}

#[test]
fn strokes_are_scored() {
    let mut c = course(small_config());
    let origin = c.start();
    let momentum = c.putt(origin, [origin[0] + 100.0, origin[1]]).expect("putt applied");
    assert!((momentum[0] - 0.16).abs() < 1e-5 && momentum[1] == 0.0);
    assert_eq!(c.score(), 2);

    let m = c.measure().unwrap().expect("measured");
    assert!(m.cell.0 < 96 && m.cell.1 < 64);
    assert_eq!(c.score(), 3);
    assert_eq!(c.status().last_measurement.map(|r| r.cell), Some([m.cell.0, m.cell.1]));

    c.reset();
    assert_eq!(c.score(), 0);
    assert!(c.status().last_measurement.is_none());
}

#[test]
fn aiming_animates_instead_of_stepping() {
    let mut c = course(small_config());
    let origin = c.start();
    assert!(c.begin_aim(origin));
    c.aim_at([origin[0] + 20.0, origin[1]]);
    let turns = c.engine().turns_run();

    c.frame(0.1);
    let status = c.status();
    assert_eq!(status.turns_run, turns);
    assert!(status.aiming);
    // |p| * 0.5 * 300 * 0.2 * 0.1 with |p| = 0.032
    assert!((status.putt_phase - 0.096).abs() < 1e-4, "phase {}", status.putt_phase);

    c.cancel_aim();
    assert!(c.release().is_none());
    assert_eq!(c.score(), 0);
}

#[test]
fn shown_measurements_pause_until_toggled() {
    let mut c = course(small_config());
    let cells = c.show_measurements().unwrap().to_vec();
    assert_eq!(cells.len(), 100);
    assert!(cells.iter().all(|&(x, y)| x < 96 && y < 64));
    assert!(c.is_paused());
    assert_eq!(c.status().measurements.len(), 100);

    let turns = c.engine().turns_run();
    c.frame(0.05);
    assert_eq!(c.engine().turns_run(), turns);

    c.toggle_pause();
    assert!(!c.is_paused());
    assert!(c.status().measurements.is_empty());
}

#[test]
fn starting_in_the_hole_wins_and_pauses() {
    let mut config = small_config();
    // Hole at (W - 0.45 H, H / 2) = (67.2, 32) on a 96x64 grid.
    config.course.start = [67.2 / 96.0, 0.5];
    config.course.initial_sigma_frac = 0.06;
    let mut c = course(config);

    for _ in 0..5 {
        c.frame(1.0 / 60.0);
        if c.is_won() {
            break;
        }
    }
    assert!(c.is_won(), "P(win) {}", c.stats().win_probability);
    assert!(c.is_paused());
    assert!(c.stats().win_probability >= 0.5);

    // Nothing more counts once the hole is sunk.
    assert!(c.putt(c.start(), [80.0, 32.0]).is_none());
    assert!(c.measure().unwrap().is_none());
    assert_eq!(c.score(), 0);

    c.reset();
    assert!(!c.is_won() && !c.is_paused());
}

#[test]
fn walls_are_rasterised_into_the_mask() {
    let mut config = small_config();
    config.obstacles = vec![orchestrator::config::Obstacle::Wall { x0: 0.5, x1: 0.55, y0: 0.0, y1: 1.0 }];
    let mut c = course(config);
    for _ in 0..3 {
        c.frame(1.0 / 60.0);
    }
    assert_eq!(c.anomalies().total(), 0);

    let engine = c.engine_mut();
    let field = engine.read_grid_region(engine.current_field()).unwrap();
    // Column 50 is inside the wall.
    for y in 0..64usize {
        let i = (y * 96 + 50) * 2;
        assert_eq!(field.data[i], 0.0);
        assert_eq!(field.data[i + 1], 0.0);
    }
}

#[test]
fn probability_image_is_downsampled() {
    let mut c = course(small_config());
    c.frame(1.0 / 60.0);
    let image = c.probability_image(32).unwrap();
    assert_eq!((image.width, image.height), (32, 22));
    let sum: f32 = image.data.iter().sum();
    assert!(sum > 0.0);
}
