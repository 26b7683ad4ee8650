//! Staggered leapfrog time stepper.
//!
//! The complex field lives in two buffers. Each quarter-turn reads the buffer
//! named by `cur` and writes the other one, then flips `cur`. Four
//! quarter-turns make a turn.

use crate::device::{BufferId, ComputeDevice, Format, Pass};
use crate::error::EngineError;
use crate::grid::GridSpec;

/// Double-buffered complex field plus the static potential and obstacle mask.
#[derive(Debug, Clone)]
pub struct TimeStepper {
    grid: GridSpec,
    dt: f32,
    fields: [BufferId; 2],
    cur: usize,
    potential: BufferId,
    mask: BufferId,
}

impl TimeStepper {
    /// Allocate both field buffers, a zero potential and an empty mask.
    pub fn new(device: &mut dyn ComputeDevice, grid: GridSpec, dt: f32) -> Result<Self, EngineError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(EngineError::InvalidGrid(format!("dt must be positive, got {}", dt)));
        }
        if dt >= grid.max_stable_dt() {
            tracing::warn!(
                "dt={} is at or above the stability limit {} for this grid",
                dt,
                grid.max_stable_dt()
            );
        }
        let (w, h) = (grid.width, grid.height);
        let fields = [
            device.create_buffer("field[0]", w, h, Format::RG32F)?,
            device.create_buffer("field[1]", w, h, Format::RG32F)?,
        ];
        let potential = device.create_buffer("potential", w, h, Format::R32F)?;
        let mask = device.create_buffer("mask", w, h, Format::R32F)?;
        Ok(Self { grid, dt, fields, cur: 0, potential, mask })
    }

    /// Nominal time step.
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Grid the field lives on.
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Index of the buffer holding the latest complete state.
    pub fn cur_index(&self) -> usize {
        self.cur
    }

    /// Latest field.
    pub fn current(&self) -> BufferId {
        self.fields[self.cur]
    }

    /// Field one quarter-turn older than [`current`](Self::current).
    pub fn previous(&self) -> BufferId {
        self.fields[1 - self.cur]
    }

    /// Static potential buffer.
    pub fn potential(&self) -> BufferId {
        self.potential
    }

    /// Obstacle mask buffer.
    pub fn mask(&self) -> BufferId {
        self.mask
    }

    /// Upload a static potential (`W * H` values).
    pub fn set_potential(&self, device: &mut dyn ComputeDevice, values: &[f32]) -> Result<(), EngineError> {
        device.write_buffer(self.potential, values)
    }

    /// Upload an obstacle mask (`W * H` values, walls are >= 0.5).
    pub fn set_mask(&self, device: &mut dyn ComputeDevice, values: &[f32]) -> Result<(), EngineError> {
        device.write_buffer(self.mask, values)
    }

    /// Write a normalised Gaussian packet into buffer 0 and make it current.
    ///
    /// The leapfrog is not yet staggered afterwards; callers follow up with
    /// a half-size [`quarter_turn`](Self::quarter_turn).
    pub fn initialize(&mut self, device: &mut dyn ComputeDevice, center: [f32; 2], sigma: f32) {
        let amplitude = 1.0 / (sigma * std::f32::consts::PI.sqrt());
        device.dispatch(
            &Pass::Gaussian { dst: self.fields[0], center, sigma, amplitude, dx: self.grid.dx },
            [self.grid.width, self.grid.height],
        );
        self.cur = 0;
    }

    /// One quarter-turn of size `dt` reading `drag` as the dynamic potential.
    pub fn quarter_turn(&mut self, device: &mut dyn ComputeDevice, drag: BufferId, dt: f32) {
        let pass = Pass::QuarterTurn {
            src: self.fields[self.cur],
            dst: self.fields[1 - self.cur],
            potential: self.potential,
            drag,
            mask: self.mask,
            dt,
            four_m_dx2: self.grid.four_m_dx2(),
        };
        device.dispatch(&pass, [self.grid.width, self.grid.height]);
        self.cur = 1 - self.cur;
    }

    /// Nominal-size quarter-turn.
    pub fn step(&mut self, device: &mut dyn ComputeDevice, drag: BufferId) {
        self.quarter_turn(device, drag, self.dt);
    }

    /// Four nominal quarter-turns.
    pub fn turn(&mut self, device: &mut dyn ComputeDevice, drag: BufferId) {
        for _ in 0..4 {
            self.step(device, drag);
        }
    }

    /// Multiply the current field by `kick` into the other buffer.
    pub fn multiply(&mut self, device: &mut dyn ComputeDevice, kick: BufferId) {
        let pass = Pass::ComplexMul { a: kick, b: self.fields[self.cur], dst: self.fields[1 - self.cur] };
        device.dispatch(&pass, [self.grid.width, self.grid.height]);
        self.cur = 1 - self.cur;
    }
}
