//! Norm conservation of the staggered stepper.
//!
//! With no drag, the total probability of a smooth packet must stay within
//! 1% of its initial value over 1000 quarter-turns, both in open space and
//! with hard walls in the way.

use kernel::{CpuDevice, Engine, EngineSettings, GridSpec};

fn engine(width: u32, height: u32) -> Engine {
    let grid = GridSpec::new(width, height, 1.0, 1.0).unwrap();
    let settings = EngineSettings { dt: 0.2, drag: 0.0, ..EngineSettings::for_grid(grid) };
    Engine::new(Box::new(CpuDevice::new()), settings).unwrap()
}

#[test]
fn norm_conserved_over_1000_quarter_turns() {
    let mut e = engine(64, 48);
    e.initialize([32.0, 24.0], 4.0);
    let initial = e.total_probability_now().unwrap();
    assert!((initial - 1.0).abs() < 0.01, "initial total {}", initial);

    // 250 turns of 4 quarter-turns, checked along the way.
    for _ in 0..10 {
        let skipped = e.advance(25, 1.0e9);
        assert_eq!(skipped, 0);
        let total = e.total_probability_now().unwrap();
        assert!(
            (total - initial).abs() < 0.01 * initial,
            "total drifted to {} from {} after {} turns",
            total,
            initial,
            e.turns_run()
        );
    }
    assert_eq!(e.turns_run(), 250);
    assert!(e.poll_errors().is_empty());
}

#[test]
fn norm_conserved_with_walls() {
    let (w, h) = (64u32, 48u32);
    let mut e = engine(w, h);

    // A wall block far from the packet, which spreads into it over time.
    let mut mask = vec![0.0f32; (w * h) as usize];
    for y in 10..38 {
        for x in 52..56 {
            mask[(y * w + x) as usize] = 1.0;
        }
    }
    e.set_mask(&mask).unwrap();
    e.initialize([24.0, 24.0], 4.0);
    let initial = e.total_probability_now().unwrap();

    assert_eq!(e.advance(250, 1.0e9), 0);
    let total = e.total_probability_now().unwrap();
    assert!((total - initial).abs() < 0.01 * initial, "total {} vs {}", total, initial);

    // Nothing lives inside the wall.
    let field = e.read_grid_region(e.current_field()).unwrap();
    for y in 10..38u32 {
        for x in 52..56u32 {
            let i = ((y * w + x) * 2) as usize;
            assert_eq!(field.data[i], 0.0);
            assert_eq!(field.data[i + 1], 0.0);
        }
    }
}
