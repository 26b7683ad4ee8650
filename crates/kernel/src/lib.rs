//! Quantum Golf Simulation Kernel
//!
//! A 2D Schrödinger wavefield on a fixed grid, stepped with a staggered
//! leapfrog scheme and analysed with pyramid reductions. All numerical work
//! is expressed as typed passes over opaque device buffers, so the same
//! physics runs on the rayon CPU backend or, with the `gpu` feature, on wgpu.
//!
//! # Modules
//! - [`device`] -- The compute-device seam: buffers, passes, barriers, readbacks, timers.
//! - [`cpu`] -- Host reference backend with storage-hazard detection.
//! - [`grid`] -- Grid geometry and physical constants.
//! - [`pyramid`] -- Ceil (sum) and roof (line-integral) pyramid shapes.
//! - [`stepper`] -- Double-buffered quarter-turn time stepper.
//! - [`reduction`] -- Sum pyramids, total probability and win probability.
//! - [`lip`] -- Line-integral pyramid producing the drag potential.
//! - [`sampler`] -- Weighted cell sampling by pyramid descent.
//! - [`putt`] -- Momentum kicks with half-step re-staggering.
//! - [`perf`] -- Throughput estimate from deferred timer queries.
//! - [`engine`] -- The engine object tying it all together.

#![warn(missing_docs)]

pub mod cpu;
pub mod device;
pub mod engine;
pub mod error;
pub mod grid;
pub mod lip;
pub mod perf;
pub mod putt;
pub mod pyramid;
pub mod reduction;
pub mod sampler;
pub mod stepper;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use cpu::CpuDevice;
pub use device::{BufferId, ComputeDevice, Format, Pass, PassKind};
pub use engine::{Engine, EngineSettings, FieldSnapshot, Measurement};
pub use error::{DeviceAnomaly, EngineError};
pub use grid::GridSpec;
pub use reduction::Stats;

#[cfg(feature = "gpu")]
pub use gpu::{GpuDevice, GpuInitError};

/// Whether a usable GPU adapter is present. Always false without the `gpu` feature.
pub fn gpu_available() -> bool {
    #[cfg(feature = "gpu")]
    {
        gpu::gpu_available()
    }
    #[cfg(not(feature = "gpu"))]
    {
        false
    }
}
