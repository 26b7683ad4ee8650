//! Kicks: the re-staggering around the multiply must leave the density
//! alone, and momentum must move the packet the right way.

use kernel::{CpuDevice, Engine, EngineSettings, GridSpec};

fn engine(width: u32, height: u32) -> Engine {
    let grid = GridSpec::new(width, height, 1.0, 1.0).unwrap();
    let settings = EngineSettings { drag: 0.0, ..EngineSettings::for_grid(grid) };
    Engine::new(Box::new(CpuDevice::new()), settings).unwrap()
}

fn density(e: &mut Engine) -> Vec<f32> {
    e.total_probability_now().unwrap();
    e.read_grid_region(e.probability_field()).unwrap().data
}

fn centroid(density: &[f32], width: u32) -> (f32, f32) {
    let mut sum = (0.0f32, 0.0f32, 0.0f32);
    for (i, &rho) in density.iter().enumerate() {
        let (x, y) = ((i as u32 % width) as f32, (i as u32 / width) as f32);
        sum = (sum.0 + rho, sum.1 + rho * x, sum.2 + rho * y);
    }
    (sum.1 / sum.0, sum.2 / sum.0)
}

#[test]
fn identity_kick_keeps_the_density() {
    let mut e = engine(48, 40);
    e.initialize([24.0, 20.0], 4.0);
    let before = density(&mut e);
    let total_before = e.total_probability_now().unwrap();
    let cur = e.cur_index();

    // Zero radius and zero momentum load the identity everywhere.
    e.set_kick([24.0, 20.0], 0.0, [0.0, 0.0], 0.0);
    let kick = e.read_grid_region(e.kick_field()).unwrap();
    assert!(kick.data.chunks_exact(2).all(|c| c[0] == 1.0 && c[1] == 0.0));

    e.apply_kick();
    assert_ne!(e.cur_index(), cur, "three toggles flip the parity");
    let after = density(&mut e);
    let total_after = e.total_probability_now().unwrap();

    // Only the two half quarter-turns act; their effect is second order in dt.
    let peak = before.iter().cloned().fold(0.0f32, f32::max);
    let worst = before.iter().zip(&after).map(|(a, b)| (a - b).abs()).fold(0.0f32, f32::max);
    assert!(worst < 1.0e-3 * peak, "density moved by {} (peak {})", worst, peak);
    assert!((total_after - total_before).abs() < 1.0e-5, "total {} -> {}", total_before, total_after);
}

#[test]
fn plane_wave_kick_moves_the_packet() {
    let (w, h) = (96u32, 48u32);
    let mut e = engine(w, h);
    e.initialize([30.0, 24.0], 4.0);
    let start = centroid(&density(&mut e), w);

    e.set_plane_wave([0.4, 0.0]);
    e.apply_kick();
    let total = e.total_probability_now().unwrap();
    assert!((total - 1.0).abs() < 0.01, "kick changed the norm to {}", total);

    // 50 turns are 20 time units; group velocity sin(0.4) is about 0.39.
    assert_eq!(e.advance(50, 1.0e9), 0);
    let end = centroid(&density(&mut e), w);
    let moved = end.0 - start.0;
    assert!(moved > 5.0 && moved < 10.0, "moved {} cells along x", moved);
    assert!((end.1 - start.1).abs() < 0.5, "drifted {} cells along y", end.1 - start.1);
}

#[test]
fn localised_kick_leaves_far_field_alone() {
    let (w, h) = (64u32, 48u32);
    let mut e = engine(w, h);
    e.initialize([32.0, 24.0], 4.0);
    e.set_kick([10.0, 10.0], 3.0, [1.0, 0.0], 0.5);

    let kick = e.read_grid_region(e.kick_field()).unwrap();
    let at = |x: u32, y: u32| {
        let i = ((y * w + x) * 2) as usize;
        [kick.data[i], kick.data[i + 1]]
    };
    // Outside the club radius the kick is the identity.
    assert_eq!(at(32, 24), [1.0, 0.0]);
    assert_eq!(at(10, 14), [1.0, 0.0]);
    // At the centre only the extra phase applies.
    let c = at(10, 10);
    assert!((c[0] - 0.5f32.cos()).abs() < 1e-6 && (c[1] - 0.5f32.sin()).abs() < 1e-6);
}
