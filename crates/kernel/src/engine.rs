//! The engine object: owns the device and every simulation resource.
//!
//! All work is issued from the thread that owns the engine, in a fixed
//! order per frame: physics turns, then stats encoding, then submit, then
//! the non-blocking stats poll.

use crate::device::{BufferId, ComputeDevice, Format};
use crate::error::{DeviceAnomaly, EngineError};
use crate::grid::GridSpec;
use crate::lip::DragPotentialPipeline;
use crate::perf::PerfEstimate;
use crate::putt::PuttEngine;
use crate::reduction::{Stats, StatsTracker};
use crate::sampler::MeasurementSampler;
use crate::stepper::TimeStepper;

/// Construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Grid geometry.
    pub grid: GridSpec,
    /// Quarter-turn time step.
    pub dt: f32,
    /// Drag strength; zero disables the drag potential.
    pub drag: f32,
    /// Nominal physics rate, also the initial throughput estimate.
    pub turns_per_second: f32,
    /// Sampler seed.
    pub seed: u64,
}

impl EngineSettings {
    /// Defaults for a grid: dt 0.2, drag 4, 300 turns/s.
    pub fn for_grid(grid: GridSpec) -> Self {
        Self { grid, dt: 0.2, drag: 4.0, turns_per_second: 300.0, seed: 0 }
    }
}

/// Result of a measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Sampled cell.
    pub cell: (u32, u32),
    /// Cell centre in physical units.
    pub position: [f32; 2],
    /// Local momentum estimated from the phase gradient before the collapse.
    pub momentum: [f32; 2],
}

/// Host copy of a device buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSnapshot {
    /// Width in cells.
    pub width: u32,
    /// Height in cells.
    pub height: u32,
    /// Channel format.
    pub format: Format,
    /// Row-major, interleaved channels.
    pub data: Vec<f32>,
}

/// The quantum golf ball simulation.
pub struct Engine {
    device: Box<dyn ComputeDevice>,
    settings: EngineSettings,
    stepper: TimeStepper,
    lip: DragPotentialPipeline,
    stats: StatsTracker,
    sampler: MeasurementSampler,
    putt: PuttEngine,
    perf: PerfEstimate,
    anomalies: Vec<DeviceAnomaly>,
    turns_run: u64,
}

impl Engine {
    /// Allocate every buffer and pyramid. Any failure aborts construction.
    pub fn new(mut device: Box<dyn ComputeDevice>, settings: EngineSettings) -> Result<Self, EngineError> {
        let grid = settings.grid;
        let dev = device.as_mut();
        let stepper = TimeStepper::new(dev, grid, settings.dt)?;
        let lip = DragPotentialPipeline::new(dev, &grid, settings.drag)?;
        let stats = StatsTracker::new(dev, &grid)?;
        let putt = PuttEngine::new(dev, &grid)?;
        lip.clear(dev);
        putt.reset(dev);
        dev.submit();

        tracing::info!(
            "Engine ready on {} backend: {}x{} grid, dt={}, drag={}, {} turns/s nominal",
            dev.backend_name(),
            grid.width,
            grid.height,
            settings.dt,
            settings.drag,
            settings.turns_per_second
        );

        Ok(Self {
            device,
            settings,
            stepper,
            lip,
            stats,
            sampler: MeasurementSampler::new(settings.seed),
            putt,
            perf: PerfEstimate::new(settings.turns_per_second as f64),
            anomalies: Vec::new(),
            turns_run: 0,
        })
    }

    /// Backend name for logs.
    pub fn backend_name(&self) -> &'static str {
        self.device.backend_name()
    }

    /// Construction parameters.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Grid geometry.
    pub fn grid(&self) -> &GridSpec {
        &self.settings.grid
    }

    // -----------------------------------------------------------------------
    // Field setup
    // -----------------------------------------------------------------------

    /// Reset the field to a normalised Gaussian at `center` and re-stagger.
    pub fn initialize(&mut self, center: [f32; 2], sigma: f32) {
        let dev = self.device.as_mut();
        self.stepper.initialize(dev, center, sigma);
        self.lip.clear(dev);

        let timing = self.perf.is_idle();
        if timing {
            self.perf.begin(dev);
        }
        let drag = self.lip.drag_potential();
        self.stepper.quarter_turn(dev, drag, 0.5 * self.stepper.dt());
        if timing {
            self.perf.end(dev, 0.25);
        }

        self.putt.reset(dev);
        self.stats.discard_pending();
        tracing::debug!("Field initialised at ({:.1}, {:.1}) with sigma {:.2}", center[0], center[1], sigma);
    }

    /// Upload a static potential (`W * H` values).
    pub fn set_potential(&mut self, values: &[f32]) -> Result<(), EngineError> {
        self.stepper.set_potential(self.device.as_mut(), values)
    }

    /// Upload an obstacle mask (`W * H` values, walls >= 0.5).
    pub fn set_mask(&mut self, values: &[f32]) -> Result<(), EngineError> {
        self.stepper.set_mask(self.device.as_mut(), values)
    }

    /// Make the goal a Gaussian of width `sigma` at `center`, scaled so that
    /// an equal normalised state has win probability 1.
    pub fn set_goal(&mut self, center: [f32; 2], sigma: f32) {
        self.stats.set_goal_gaussian(self.device.as_mut(), center, sigma);
    }

    // -----------------------------------------------------------------------
    // Time evolution
    // -----------------------------------------------------------------------

    /// Run up to `turns_requested` turns within a wall-clock budget and
    /// return how many were skipped. At least one turn runs when any is
    /// requested.
    pub fn advance(&mut self, turns_requested: u32, max_wall_seconds: f64) -> u32 {
        let dev = self.device.as_mut();
        self.perf.poll(dev);
        if turns_requested == 0 {
            return 0;
        }

        let timing = self.perf.is_idle();
        if timing {
            self.perf.begin(dev);
        }

        let max_turns = self.perf.max_turns_per_second() * max_wall_seconds;
        let drag = self.lip.drag_potential();
        let mut done = 0u32;
        while done < turns_requested {
            self.stepper.turn(dev, drag);
            self.lip.update(dev, self.stepper.current(), self.stepper.previous());
            done += 1;
            if done as f64 > max_turns {
                break;
            }
        }

        if timing {
            self.perf.end(dev, done as f64);
        }
        self.turns_run += done as u64;
        turns_requested - done
    }

    // -----------------------------------------------------------------------
    // Kicks
    // -----------------------------------------------------------------------

    /// Load a localised kick without applying it.
    pub fn set_kick(&mut self, origin: [f32; 2], radius: f32, momentum: [f32; 2], phase: f32) {
        self.putt.set_kick(self.device.as_mut(), origin, radius, momentum, phase);
    }

    /// Load a plane-wave kick without applying it.
    pub fn set_plane_wave(&mut self, momentum: [f32; 2]) {
        self.putt.set_plane_wave(self.device.as_mut(), momentum);
    }

    /// Apply whatever kick is loaded.
    pub fn apply_kick(&mut self) {
        let drag = self.lip.drag_potential();
        self.putt.apply(self.device.as_mut(), &mut self.stepper, drag);
    }

    /// Load and apply a localised kick.
    pub fn kick(&mut self, origin: [f32; 2], radius: f32, momentum: [f32; 2], phase: f32) {
        self.set_kick(origin, radius, momentum, phase);
        self.apply_kick();
    }

    // -----------------------------------------------------------------------
    // Measurement
    // -----------------------------------------------------------------------

    /// Draw one cell from the current density. Does not change the field.
    pub fn sample(&mut self) -> Result<(u32, u32), EngineError> {
        let dev = self.device.as_mut();
        self.stats.encode_probability(dev, self.stepper.current(), self.stepper.previous());
        self.sampler.sample(dev, self.stats.probability().pyramid(), &mut self.anomalies)
    }

    /// Draw `n` independent cells from the current density.
    pub fn sample_many(&mut self, n: usize) -> Result<Vec<(u32, u32)>, EngineError> {
        let dev = self.device.as_mut();
        self.stats.encode_probability(dev, self.stepper.current(), self.stepper.previous());
        let pyramid = self.stats.probability().pyramid();
        (0..n).map(|_| self.sampler.sample(dev, pyramid, &mut self.anomalies)).collect()
    }

    /// Collapse the field to a packet of width `sigma` at a sampled cell,
    /// keeping the local momentum it had there.
    pub fn measure(&mut self, sigma: f32) -> Result<Measurement, EngineError> {
        let cell = self.sample()?;
        let momentum = self.local_momentum(cell)?;
        let dx = self.settings.grid.dx;
        let position = [cell.0 as f32 * dx, cell.1 as f32 * dx];

        self.initialize(position, sigma);
        self.set_plane_wave(momentum);
        self.apply_kick();
        self.stats.discard_pending();

        tracing::info!(
            "Measured at cell ({}, {}), momentum ({:.3}, {:.3})",
            cell.0,
            cell.1,
            momentum[0],
            momentum[1]
        );
        Ok(Measurement { cell, position, momentum })
    }

    /// Phase gradient of the synchronised amplitude at a cell.
    fn local_momentum(&mut self, cell: (u32, u32)) -> Result<[f32; 2], EngineError> {
        let grid = self.settings.grid;
        let origin = [cell.0.min(grid.width - 2), cell.1.min(grid.height - 2)];
        let dev = self.device.as_mut();
        let cur = dev.read_region(self.stepper.current(), origin, [2, 2])?;
        let prev = dev.read_region(self.stepper.previous(), origin, [2, 2])?;
        let psi = |i: usize| [0.5 * (cur[2 * i] + prev[2 * i + 1]), cur[2 * i + 1]];
        let phase_step = |a: [f32; 2], b: [f32; 2]| {
            let re = a[0] * b[0] + a[1] * b[1];
            let im = a[0] * b[1] - a[1] * b[0];
            im.atan2(re) / grid.dx
        };
        Ok([phase_step(psi(0), psi(1)), phase_step(psi(0), psi(2))])
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    /// Encode this frame's reductions and request their readback.
    pub fn begin_stats(&mut self) {
        self.stats.begin(self.device.as_mut(), self.stepper.current(), self.stepper.previous());
    }

    /// Consume a finished readback if there is one. Never waits.
    pub fn update_stats(&mut self) -> bool {
        self.stats.update(self.device.as_mut(), &mut self.anomalies)
    }

    /// Last known statistics, up to one frame stale.
    pub fn stats(&self) -> Stats {
        self.stats.latest()
    }

    /// Close the frame's command stream.
    pub fn submit(&mut self) {
        self.device.submit();
    }

    /// Device anomalies plus numerical ones, drained.
    pub fn poll_errors(&mut self) -> Vec<DeviceAnomaly> {
        let mut found = self.device.poll_errors();
        found.append(&mut self.anomalies);
        found
    }

    // -----------------------------------------------------------------------
    // Published state
    // -----------------------------------------------------------------------

    /// Index of the buffer holding the latest state.
    pub fn cur_index(&self) -> usize {
        self.stepper.cur_index()
    }

    /// Turns run since construction.
    pub fn turns_run(&self) -> u64 {
        self.turns_run
    }

    /// Current throughput estimate.
    pub fn max_turns_per_second(&self) -> f64 {
        self.perf.max_turns_per_second()
    }

    /// Latest complex field.
    pub fn current_field(&self) -> BufferId {
        self.stepper.current()
    }

    /// Field one quarter-turn older.
    pub fn previous_field(&self) -> BufferId {
        self.stepper.previous()
    }

    /// Density pyramid level 0 (padded to even size).
    pub fn probability_field(&self) -> BufferId {
        self.stats.probability().base().buffer
    }

    /// Density pyramid top (1x1).
    pub fn probability_top(&self) -> BufferId {
        self.stats.probability().top().buffer
    }

    /// Drag potential (roof extent, only `[0, W) x [0, H)` is physical).
    pub fn drag_potential_field(&self) -> BufferId {
        self.lip.drag_potential()
    }

    /// Current kick buffer.
    pub fn kick_field(&self) -> BufferId {
        self.putt.kick_buffer()
    }

    /// Goal state.
    pub fn goal_field(&self) -> BufferId {
        self.stats.goal()
    }

    /// Copy a whole buffer to the host.
    pub fn read_field(&mut self, id: BufferId) -> Result<FieldSnapshot, EngineError> {
        let (width, height, format) = self
            .device
            .buffer_info(id)
            .ok_or_else(|| EngineError::Device(format!("unknown buffer {}", id.index())))?;
        let data = self.device.read_region(id, [0, 0], [width, height])?;
        Ok(FieldSnapshot { width, height, format, data })
    }

    /// Copy the `[0, W) x [0, H)` part of a buffer to the host.
    pub fn read_grid_region(&mut self, id: BufferId) -> Result<FieldSnapshot, EngineError> {
        let (width, height) = (self.settings.grid.width, self.settings.grid.height);
        let (_, _, format) = self
            .device
            .buffer_info(id)
            .ok_or_else(|| EngineError::Device(format!("unknown buffer {}", id.index())))?;
        let data = self.device.read_region(id, [0, 0], [width, height])?;
        Ok(FieldSnapshot { width, height, format, data })
    }

    /// Synchronous total probability, bypassing the deferred path.
    pub fn total_probability_now(&mut self) -> Result<f32, EngineError> {
        let dev = self.device.as_mut();
        self.stats.encode_probability(dev, self.stepper.current(), self.stepper.previous());
        let top = self.stats.probability().top().buffer;
        let sum = dev.read_region(top, [0, 0], [1, 1])?.first().copied().unwrap_or(0.0);
        let dx = self.settings.grid.dx;
        Ok(sum * dx * dx)
    }
}
