//! Weighted random cell selection by descending the probability pyramid.
//!
//! Each 2x2 block of a level sums to the cell above it, so a walk from the
//! 1x1 top that picks one child per level, with probability proportional to
//! its weight, lands on a base cell with probability proportional to its
//! density. Every level costs one small synchronous read.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::device::ComputeDevice;
use crate::error::{DeviceAnomaly, EngineError};
use crate::pyramid::Pyramid;

/// Outcome of picking one child of a 2x2 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildChoice {
    /// Normal weighted pick.
    Weighted(usize),
    /// Rounding left the remainder positive; the last non-empty child was taken.
    Fallthrough(usize),
    /// The parent weight was unusable; picked uniformly.
    Uniform(usize),
}

impl ChildChoice {
    /// Child index: bit 0 is the x offset, bit 1 the y offset.
    pub fn index(self) -> usize {
        match self {
            ChildChoice::Weighted(i) | ChildChoice::Fallthrough(i) | ChildChoice::Uniform(i) => i,
        }
    }
}

/// Pick a child of a 2x2 block. `u` is uniform in `[0, 1)`.
///
/// Children are visited in the order (0,0), (1,0), (0,1), (1,1). A child is
/// taken once the remainder drops strictly below zero, so empty children
/// are never chosen by the weighted path.
pub fn choose_child(weights: [f32; 4], parent: f32, u: f32) -> ChildChoice {
    let uniform = ((u * 4.0) as usize).min(3);
    if !(parent.is_finite() && parent > 0.0) {
        return ChildChoice::Uniform(uniform);
    }
    let mut remainder = u * parent;
    for (i, w) in weights.iter().enumerate() {
        remainder -= w;
        if remainder < 0.0 {
            return ChildChoice::Weighted(i);
        }
    }
    match weights.iter().rposition(|w| *w > 0.0) {
        Some(i) => ChildChoice::Fallthrough(i),
        None => ChildChoice::Uniform(uniform),
    }
}

/// Seeded sampler over a ceil pyramid.
#[derive(Debug, Clone)]
pub struct MeasurementSampler {
    rng: ChaCha8Rng,
}

impl MeasurementSampler {
    /// Sampler with a reproducible stream.
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    /// Draw one base cell. The pyramid must be reduced and up to date.
    ///
    /// Numerical trouble never fails the draw: it is pushed to `anomalies`
    /// and the returned cell is clamped into the grid.
    pub fn sample(
        &mut self,
        device: &mut dyn ComputeDevice,
        pyramid: &Pyramid,
        anomalies: &mut Vec<DeviceAnomaly>,
    ) -> Result<(u32, u32), EngineError> {
        let top = pyramid.top();
        let mut parent = device.read_region(top.buffer, [0, 0], [1, 1])?.first().copied().unwrap_or(0.0);
        let (mut x, mut y) = (0u32, 0u32);

        for level in (0..pyramid.len() - 1).rev() {
            let block = device.read_region(pyramid.level(level).buffer, [2 * x, 2 * y], [2, 2])?;
            let weights = [block[0], block[1], block[2], block[3]];
            let choice = choose_child(weights, parent, self.rng.gen::<f32>());
            match choice {
                ChildChoice::Weighted(_) => {}
                ChildChoice::Fallthrough(_) => anomalies.push(DeviceAnomaly::SamplerFallthrough { level }),
                ChildChoice::Uniform(_) => anomalies.push(DeviceAnomaly::NonFiniteWeight { level, weight: parent }),
            }
            let child = choice.index();
            x = 2 * x + (child & 1) as u32;
            y = 2 * y + (child >> 1) as u32;
            parent = weights[child];
        }

        let base = pyramid.base().dims;
        Ok((x.min(base.data_width - 1), y.min(base.data_height - 1)))
    }
}
