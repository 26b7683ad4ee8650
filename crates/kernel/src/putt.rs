//! Momentum kicks.

use crate::device::{BufferId, ComputeDevice, Format, Pass};
use crate::error::EngineError;
use crate::grid::GridSpec;
use crate::stepper::TimeStepper;

/// Owns the kick buffer and applies it to the field.
#[derive(Debug, Clone)]
pub struct PuttEngine {
    grid: GridSpec,
    kick: BufferId,
}

impl PuttEngine {
    /// Allocate the kick buffer. It starts as zero; call [`reset`](Self::reset).
    pub fn new(device: &mut dyn ComputeDevice, grid: &GridSpec) -> Result<Self, EngineError> {
        let kick = device.create_buffer("kick", grid.width, grid.height, Format::RG32F)?;
        Ok(Self { grid: *grid, kick })
    }

    /// The kick buffer.
    pub fn kick_buffer(&self) -> BufferId {
        self.kick
    }

    fn full(&self) -> [u32; 2] {
        [self.grid.width, self.grid.height]
    }

    /// Identity kick.
    pub fn reset(&self, device: &mut dyn ComputeDevice) {
        device.dispatch(&Pass::Fill { dst: self.kick, value: [1.0, 0.0] }, self.full());
    }

    /// Localised kick around `origin`, fading to nothing at `radius`.
    pub fn set_kick(
        &self,
        device: &mut dyn ComputeDevice,
        origin: [f32; 2],
        radius: f32,
        momentum: [f32; 2],
        phase: f32,
    ) {
        let pass = Pass::Kick { dst: self.kick, origin, radius: radius.max(0.0), momentum, phase, dx: self.grid.dx };
        device.dispatch(&pass, self.full());
    }

    /// Kick the whole field with momentum `p`.
    pub fn set_plane_wave(&self, device: &mut dyn ComputeDevice, momentum: [f32; 2]) {
        device.dispatch(&Pass::PlaneWave { dst: self.kick, momentum, dx: self.grid.dx }, self.full());
    }

    /// Multiply the field by the kick, bracketed by half quarter-turns so the
    /// leapfrog stays staggered around the edit. Toggles `cur` three times.
    pub fn apply(&self, device: &mut dyn ComputeDevice, stepper: &mut TimeStepper, drag: BufferId) {
        let half = 0.5 * stepper.dt();
        stepper.quarter_turn(device, drag, half);
        stepper.multiply(device, self.kick);
        stepper.quarter_turn(device, drag, half);
    }
}
