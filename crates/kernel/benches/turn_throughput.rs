//! Turn throughput on the course grid.
//!
//! Reports turns/second for the CPU device and, with the `gpu` feature, the
//! wgpu device, with and without the drag potential.
//!
//! Run with: cargo bench -p kernel --bench turn_throughput [--features gpu]

use std::time::Instant;

use kernel::{ComputeDevice, CpuDevice, Engine, EngineSettings, GridSpec};

const TURNS: u32 = 40;

fn benchmark(name: &str, device: Box<dyn ComputeDevice>, drag: f32) {
    let grid = GridSpec::with_aspect(257, 1.5, 1.0, 1.0).expect("valid grid");
    let settings = EngineSettings { drag, ..EngineSettings::for_grid(grid) };
    let mut engine = Engine::new(device, settings).expect("engine");
    engine.initialize([60.0, 128.0], 8.0);

    // Warmup
    engine.advance(4, 1.0e9);
    engine.total_probability_now().expect("readback");

    let start = Instant::now();
    for _ in 0..TURNS / 4 {
        engine.advance(4, 1.0e9);
        engine.submit();
    }
    // Blocking readback drains the queue.
    engine.total_probability_now().expect("readback");
    let elapsed = start.elapsed().as_secs_f64();

    println!(
        "{:>6} {:>6.1} {:>10.1} {:>10.3} {:>14.0}",
        name,
        drag,
        TURNS as f64 / elapsed,
        elapsed * 1e3 / TURNS as f64,
        engine.max_turns_per_second()
    );
}

fn main() {
    println!("=== Turn throughput, 386x257 ===\n");
    println!("{:>6} {:>6} {:>10} {:>10} {:>14}", "Device", "Drag", "turns/s", "ms/turn", "timer est.");

    for drag in [0.0, 4.0] {
        benchmark("cpu", Box::new(CpuDevice::new()), drag);
    }

    #[cfg(feature = "gpu")]
    {
        for drag in [0.0, 4.0] {
            match kernel::GpuDevice::new() {
                Ok(device) => benchmark("gpu", Box::new(device), drag),
                Err(e) => {
                    println!("GPU unavailable: {e}");
                    break;
                }
            }
        }
    }
}
