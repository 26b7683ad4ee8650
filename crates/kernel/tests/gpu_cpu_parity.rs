//! GPU vs CPU parity test.
//!
//! Runs the same putt on the CPU device and the wgpu device, then compares
//! the fields, the drag potential and the stats.
//!
//! Gated behind `#[cfg(feature = "gpu")]` so it only runs when the GPU feature
//! is enabled. Skips when no adapter is present.

#![cfg(feature = "gpu")]

use kernel::{ComputeDevice, CpuDevice, Engine, EngineSettings, GpuDevice, GridSpec};

fn run(device: Box<dyn ComputeDevice>) -> (Engine, Vec<f32>, Vec<f32>) {
    let grid = GridSpec::new(96, 64, 1.0, 1.0).unwrap();
    let settings = EngineSettings { seed: 11, ..EngineSettings::for_grid(grid) };
    let mut e = Engine::new(device, settings).unwrap();
    e.initialize([30.0, 32.0], 5.0);
    e.set_goal([70.0, 32.0], 4.0);
    e.kick([30.0, 32.0], 12.0, [0.6, 0.1], 0.0);
    for _ in 0..5 {
        e.advance(4, 1.0e9);
    }
    let field = e.read_grid_region(e.current_field()).unwrap().data;
    let drag = e.read_grid_region(e.drag_potential_field()).unwrap().data;
    (e, field, drag)
}

fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

#[test]
fn gpu_cpu_parity_20_turns() {
    let gpu = match GpuDevice::new() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Skipping GPU parity test: {e}");
            return;
        }
    };

    let (mut cpu_engine, cpu_field, cpu_drag) = run(Box::new(CpuDevice::new()));
    let (mut gpu_engine, gpu_field, gpu_drag) = run(Box::new(gpu));
    assert_eq!(cpu_engine.cur_index(), gpu_engine.cur_index());

    let field_err = max_abs_diff(&cpu_field, &gpu_field);
    let drag_err = max_abs_diff(&cpu_drag, &gpu_drag);
    println!("Max field error: {:.3e}, max drag error: {:.3e}", field_err, drag_err);
    assert!(field_err < 1e-3, "Field error too large: {:.3e}", field_err);
    assert!(drag_err < 1e-3, "Drag error too large: {:.3e}", drag_err);

    let cpu_total = cpu_engine.total_probability_now().unwrap();
    let gpu_total = gpu_engine.total_probability_now().unwrap();
    assert!((cpu_total - gpu_total).abs() < 1e-3, "totals {} vs {}", cpu_total, gpu_total);

    let cpu_samples = cpu_engine.sample_many(32).unwrap();
    assert!(cpu_samples.iter().all(|&(x, y)| x < 96 && y < 64));
    assert!(gpu_engine.poll_errors().is_empty());
}
