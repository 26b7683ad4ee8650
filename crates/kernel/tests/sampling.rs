//! Statistical check of measurement sampling against the density it draws from.

use kernel::{CpuDevice, Engine, EngineSettings, GridSpec};

const DRAWS: usize = 100_000;

/// Smallest box around `center` holding at least `fraction` of the mass.
fn mass_box(density: &[f32], width: u32, height: u32, center: (u32, u32), fraction: f32) -> u32 {
    let total: f32 = density.iter().sum();
    for r in 0..width.max(height) {
        let mut inside = 0.0f32;
        for y in center.1.saturating_sub(r)..=(center.1 + r).min(height - 1) {
            for x in center.0.saturating_sub(r)..=(center.0 + r).min(width - 1) {
                inside += density[(y * width + x) as usize];
            }
        }
        if inside >= fraction * total {
            return r;
        }
    }
    width.max(height)
}

#[test]
fn samples_follow_the_density() {
    let (w, h) = (64u32, 56u32);
    let grid = GridSpec::new(w, h, 1.0, 1.0).unwrap();
    let settings = EngineSettings { drag: 0.0, seed: 7, ..EngineSettings::for_grid(grid) };
    let mut e = Engine::new(Box::new(CpuDevice::new()), settings).unwrap();
    e.initialize([30.0, 26.0], 6.0);

    let samples = e.sample_many(DRAWS).unwrap();
    assert_eq!(samples.len(), DRAWS);
    assert!(samples.iter().all(|&(x, y)| x < w && y < h), "sample outside the grid");

    // The probability base is padded; only the grid region carries mass.
    let density = e.read_grid_region(e.probability_field()).unwrap();
    let r = mass_box(&density.data, w, h, (30, 26), 0.9);
    let inside = samples
        .iter()
        .filter(|&&(x, y)| x.abs_diff(30) <= r && y.abs_diff(26) <= r)
        .count();
    let fraction = inside as f64 / DRAWS as f64;
    assert!(fraction >= 0.85, "only {:.3} of samples inside the 90% box (r = {})", fraction, r);

    // Sampling never disturbs the field.
    let total = e.total_probability_now().unwrap();
    assert!((total - 1.0).abs() < 0.02);
    assert!(e.poll_errors().is_empty());
}

#[test]
fn same_seed_same_draws() {
    let grid = GridSpec::new(32, 32, 1.0, 1.0).unwrap();
    let settings = EngineSettings { drag: 0.0, seed: 42, ..EngineSettings::for_grid(grid) };
    let draws = |settings: EngineSettings| {
        let mut e = Engine::new(Box::new(CpuDevice::new()), settings).unwrap();
        e.initialize([16.0, 16.0], 3.0);
        e.sample_many(200).unwrap()
    };
    assert_eq!(draws(settings), draws(settings));
}

#[test]
fn measurement_collapses_to_the_sampled_cell() {
    let grid = GridSpec::new(48, 40, 1.0, 1.0).unwrap();
    let settings = EngineSettings { drag: 0.0, seed: 3, ..EngineSettings::for_grid(grid) };
    let mut e = Engine::new(Box::new(CpuDevice::new()), settings).unwrap();
    e.initialize([24.0, 20.0], 5.0);

    let m = e.measure(2.0).unwrap();
    assert!(m.cell.0 < 48 && m.cell.1 < 40);
    assert_eq!(m.position, [m.cell.0 as f32, m.cell.1 as f32]);
    // A packet at rest has no phase gradient to keep.
    assert!(m.momentum[0].abs() < 5e-3 && m.momentum[1].abs() < 5e-3, "momentum {:?}", m.momentum);

    let total = e.total_probability_now().unwrap();
    assert!((total - 1.0).abs() < 0.05, "total after collapse {}", total);
}
