//! Sum reductions over ceil pyramids, and the probability statistics built on them.

use crate::device::{BufferId, ComputeDevice, Format, Pass, ReadbackTicket};
use crate::error::{DeviceAnomaly, EngineError};
use crate::grid::GridSpec;
use crate::pyramid::{Level, Pyramid, PyramidShape};

/// Totals below this are treated as an empty field.
pub const MIN_TOTAL: f32 = 1e-12;

/// A ceil pyramid whose top cell holds the sum of the base.
#[derive(Debug, Clone)]
pub struct ReductionPyramid {
    pyramid: Pyramid,
}

impl ReductionPyramid {
    /// Allocate a sum pyramid over a `width x height` base.
    pub fn new(
        device: &mut dyn ComputeDevice,
        label: &str,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<Self, EngineError> {
        let pyramid = Pyramid::allocate(device, label, PyramidShape::Ceil, width, height, format)?;
        Ok(Self { pyramid })
    }

    /// Level 0.
    pub fn base(&self) -> &Level {
        self.pyramid.base()
    }

    /// The 1x1 top.
    pub fn top(&self) -> &Level {
        self.pyramid.top()
    }

    /// Underlying pyramid.
    pub fn pyramid(&self) -> &Pyramid {
        &self.pyramid
    }

    /// Dispatch grid that covers the whole padded base.
    pub fn base_grid(&self) -> [u32; 2] {
        let dims = self.base().dims;
        [dims.buffer_width, dims.buffer_height]
    }

    /// Reduce level 0 all the way to the top.
    pub fn reduce(&self, device: &mut dyn ComputeDevice) {
        for pair in self.pyramid.levels().windows(2) {
            let (src, dst) = (pair[0], pair[1]);
            device.dispatch(
                &Pass::ReduceSum {
                    src: src.buffer,
                    src_data: [src.dims.data_width, src.dims.data_height],
                    dst: dst.buffer,
                },
                [dst.dims.buffer_width, dst.dims.buffer_height],
            );
        }
    }

    /// Queue a deferred read of the top cell.
    pub fn request_total(&self, device: &mut dyn ComputeDevice) -> ReadbackTicket {
        device.request_readback(self.top().buffer, [0, 0], [1, 1])
    }
}

/// Probability statistics. Up to one frame stale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    /// `sum rho * dx^2`.
    pub total_probability: f32,
    /// `|sum goal * psi|^2 * dx^2 / total`, NaN when the total is degenerate.
    pub win_probability: f32,
}

impl Default for Stats {
    fn default() -> Self {
        Self { total_probability: 0.0, win_probability: 0.0 }
    }
}

/// Turn the two reduced sums into statistics.
pub fn compute_stats(density_sum: f32, overlap_sum: [f32; 2], dx: f32) -> (Stats, Option<DeviceAnomaly>) {
    let dx2 = dx * dx;
    let total = density_sum * dx2;
    if !total.is_finite() || total <= MIN_TOTAL {
        let stats = Stats { total_probability: total, win_probability: f32::NAN };
        return (stats, Some(DeviceAnomaly::DegenerateTotal { total }));
    }
    let overlap2 = (overlap_sum[0] * overlap_sum[0] + overlap_sum[1] * overlap_sum[1]) * dx2;
    (Stats { total_probability: total, win_probability: overlap2 / total }, None)
}

#[derive(Debug)]
struct PendingStats {
    density_ticket: ReadbackTicket,
    overlap_ticket: ReadbackTicket,
    density: Option<Result<Vec<f32>, EngineError>>,
    overlap: Option<Result<Vec<f32>, EngineError>>,
}

/// Density and goal-overlap pyramids plus the deferred readbacks of their tops.
#[derive(Debug)]
pub struct StatsTracker {
    grid: GridSpec,
    probability: ReductionPyramid,
    overlap: ReductionPyramid,
    goal: BufferId,
    pending: Option<PendingStats>,
    latest: Stats,
}

impl StatsTracker {
    /// Allocate both pyramids and a zero goal state.
    pub fn new(device: &mut dyn ComputeDevice, grid: &GridSpec) -> Result<Self, EngineError> {
        let probability = ReductionPyramid::new(device, "probability", grid.width, grid.height, Format::R32F)?;
        let overlap = ReductionPyramid::new(device, "overlap", grid.width, grid.height, Format::RG32F)?;
        let goal = device.create_buffer("goal", grid.width, grid.height, Format::RG32F)?;
        Ok(Self { grid: *grid, probability, overlap, goal, pending: None, latest: Stats::default() })
    }

    /// Probability pyramid, also the sampler's search tree.
    pub fn probability(&self) -> &ReductionPyramid {
        &self.probability
    }

    /// Goal state buffer.
    pub fn goal(&self) -> BufferId {
        self.goal
    }

    /// Replace the goal with a Gaussian normalised in the continuum, scaled
    /// by `dx` so that a state equal to it scores a win probability of 1.
    pub fn set_goal_gaussian(&self, device: &mut dyn ComputeDevice, center: [f32; 2], sigma: f32) {
        let amplitude = self.grid.dx / (sigma * std::f32::consts::PI.sqrt());
        device.dispatch(
            &Pass::Gaussian { dst: self.goal, center, sigma, amplitude, dx: self.grid.dx },
            [self.grid.width, self.grid.height],
        );
    }

    /// Recompute the probability pyramid only.
    pub fn encode_probability(&self, device: &mut dyn ComputeDevice, cur: BufferId, prev: BufferId) {
        let dst = self.probability.base().buffer;
        device.dispatch(&Pass::Density { cur, prev, dst }, self.probability.base_grid());
        self.probability.reduce(device);
    }

    /// Encode both reductions and, if none is outstanding, request their tops.
    pub fn begin(&mut self, device: &mut dyn ComputeDevice, cur: BufferId, prev: BufferId) {
        self.encode_probability(device, cur, prev);
        let dst = self.overlap.base().buffer;
        device.dispatch(&Pass::Overlap { goal: self.goal, cur, prev, dst }, self.overlap.base_grid());
        self.overlap.reduce(device);

        if self.pending.is_none() {
            self.pending = Some(PendingStats {
                density_ticket: self.probability.request_total(device),
                overlap_ticket: self.overlap.request_total(device),
                density: None,
                overlap: None,
            });
        }
    }

    /// Consume a ready readback. Returns true when the statistics changed.
    pub fn update(&mut self, device: &mut dyn ComputeDevice, anomalies: &mut Vec<DeviceAnomaly>) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };
        if pending.density.is_none() {
            pending.density = device.poll_readback(pending.density_ticket);
        }
        if pending.overlap.is_none() {
            pending.overlap = device.poll_readback(pending.overlap_ticket);
        }
        if pending.density.is_none() || pending.overlap.is_none() {
            return false;
        }
        let (Some(density), Some(overlap)) = self.pending.take().map_or((None, None), |p| (p.density, p.overlap))
        else {
            return false;
        };

        match (density, overlap) {
            (Ok(p), Ok(o)) if !p.is_empty() && o.len() >= 2 => {
                let (stats, anomaly) = compute_stats(p[0], [o[0], o[1]], self.grid.dx);
                if let Some(a) = anomaly {
                    anomalies.push(a);
                }
                self.latest = stats;
                true
            }
            (Err(e), _) | (_, Err(e)) => {
                anomalies.push(DeviceAnomaly::ReadbackFailed(e.to_string()));
                false
            }
            _ => {
                anomalies.push(DeviceAnomaly::ReadbackFailed("short stats readback".to_string()));
                false
            }
        }
    }

    /// Forget an outstanding request, e.g. after the field was replaced.
    pub fn discard_pending(&mut self) {
        self.pending = None;
    }

    /// Whether a readback is outstanding.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Last known statistics.
    pub fn latest(&self) -> Stats {
        self.latest
    }
}
