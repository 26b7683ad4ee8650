//! Grid geometry and the physical constants that go with it.

use crate::error::EngineError;

/// Fixed simulation grid. Cell `(i, j)` sits at physical position `(i*dx, j*dx)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    /// Cells along x.
    pub width: u32,
    /// Cells along y.
    pub height: u32,
    /// Cell spacing.
    pub dx: f32,
    /// Particle mass.
    pub mass: f32,
}

impl GridSpec {
    /// Validate and build a grid. Both dimensions must be at least 2 so the
    /// line-integral pyramid has a 2x2 top.
    pub fn new(width: u32, height: u32, dx: f32, mass: f32) -> Result<Self, EngineError> {
        if width < 2 || height < 2 {
            return Err(EngineError::InvalidGrid(format!(
                "grid must be at least 2x2, got {}x{}",
                width, height
            )));
        }
        if !(dx.is_finite() && dx > 0.0) {
            return Err(EngineError::InvalidGrid(format!("dx must be positive, got {}", dx)));
        }
        if !(mass.is_finite() && mass > 0.0) {
            return Err(EngineError::InvalidGrid(format!("mass must be positive, got {}", mass)));
        }
        Ok(Self { width, height, dx, mass })
    }

    /// Grid of the given height with `width = round(height * aspect)`.
    pub fn with_aspect(height: u32, aspect: f32, dx: f32, mass: f32) -> Result<Self, EngineError> {
        let width = (height as f32 * aspect).round();
        if !width.is_finite() || width < 0.0 {
            return Err(EngineError::InvalidGrid(format!("bad aspect ratio {}", aspect)));
        }
        Self::new(width as u32, height, dx, mass)
    }

    /// Number of cells.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// The `4*m*dx^2` coefficient of the quarter-turn stencil.
    pub fn four_m_dx2(&self) -> f32 {
        4.0 * self.mass * self.dx * self.dx
    }

    /// Physical extent `(W*dx, H*dx)`.
    pub fn physical_size(&self) -> (f32, f32) {
        (self.width as f32 * self.dx, self.height as f32 * self.dx)
    }

    /// Cell containing a physical position, clamped into the grid.
    pub fn cell_of(&self, x: f32, y: f32) -> (u32, u32) {
        let cx = (x / self.dx).round().clamp(0.0, (self.width - 1) as f32);
        let cy = (y / self.dx).round().clamp(0.0, (self.height - 1) as f32);
        (cx as u32, cy as u32)
    }

    /// Largest time step for which the staggered scheme is stable with zero potential.
    pub fn max_stable_dt(&self) -> f32 {
        // Kinetic operator spectrum tops out at 4/(m dx^2); the leapfrog needs dt*Hmax < 2.
        0.5 * self.mass * self.dx * self.dx
    }
}
