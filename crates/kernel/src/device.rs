//! The compute-device seam.
//!
//! Physics code never touches a graphics API directly. It allocates opaque
//! 2D buffers and dispatches typed [`Pass`]es. Every dispatch carries its
//! complete set of buffers and parameters, so nothing is inherited from an
//! earlier dispatch and there is no binding state to go stale.
//!
//! Two kinds of pass exist, mirroring raster vs image-store work on a GPU:
//!
//! - [`PassKind::Raster`] passes overwrite a region of their target and are
//!   implicitly ordered after everything submitted before them.
//! - [`PassKind::Storage`] passes read and write through image bindings. A
//!   later pass that touches anything they wrote needs an explicit
//!   [`ComputeDevice::barrier`] in between.

use crate::error::{DeviceAnomaly, EngineError};

/// Opaque handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u32);

impl BufferId {
    /// Allocation index of the buffer.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Channel layout of a buffer. All channels are 32-bit floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One channel.
    R32F,
    /// Two channels (real, imaginary) or (x, y).
    RG32F,
}

impl Format {
    /// Channels per cell.
    pub fn channels(self) -> usize {
        match self {
            Format::R32F => 1,
            Format::RG32F => 2,
        }
    }
}

/// How a pass uses a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Sampled input.
    Read,
    /// Write target.
    Write,
    /// Image bound for load and store.
    ReadWrite,
}

/// Whether a pass needs explicit barriers around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Full-target write, implicitly ordered.
    Raster,
    /// Image load/store, needs a barrier before dependent work.
    Storage,
}

/// A parametrised kernel invocation with all of its bindings.
///
/// Raster passes cover `[0, nx) x [0, ny)` of their target, where `[nx, ny]`
/// is the dispatch grid. Storage passes interpret the grid per variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pass {
    /// Set every covered cell to `value` (second channel ignored for R32F).
    Fill {
        /// Target.
        dst: BufferId,
        /// Fill value.
        value: [f32; 2],
    },
    /// `A * exp(-0.5 |x - c|^2 / sigma^2)` in the real channel, zero imaginary.
    Gaussian {
        /// Target (RG).
        dst: BufferId,
        /// Packet centre in physical units.
        center: [f32; 2],
        /// Packet width.
        sigma: f32,
        /// Peak amplitude.
        amplitude: f32,
        /// Cell spacing.
        dx: f32,
    },
    /// One staggered leapfrog update: `out = (in.y - dt*H in.x, -in.x)`.
    QuarterTurn {
        /// Field read (RG, W x H).
        src: BufferId,
        /// Field written (RG, W x H).
        dst: BufferId,
        /// Static potential (R, W x H).
        potential: BufferId,
        /// Drag potential (R, at least W x H).
        drag: BufferId,
        /// Obstacle mask (R, W x H); cells >= 0.5 are walls.
        mask: BufferId,
        /// Time step.
        dt: f32,
        /// `4 * mass * dx^2`.
        four_m_dx2: f32,
    },
    /// Conserved density `max(cur.y^2 + cur.x*prev.y, 0)`, zero in padding.
    Density {
        /// Latest field.
        cur: BufferId,
        /// Field before it.
        prev: BufferId,
        /// Ceil-pyramid base (R).
        dst: BufferId,
    },
    /// `conj(goal) * psi` with the synchronised amplitude, zero in padding.
    Overlap {
        /// Goal state (RG, W x H).
        goal: BufferId,
        /// Latest field.
        cur: BufferId,
        /// Field before it.
        prev: BufferId,
        /// Ceil-pyramid base (RG).
        dst: BufferId,
    },
    /// Complex product `a * b`.
    ComplexMul {
        /// Left factor.
        a: BufferId,
        /// Right factor.
        b: BufferId,
        /// Product.
        dst: BufferId,
    },
    /// Sum each 2x2 block of `src` into one cell of `dst`.
    ReduceSum {
        /// Finer level.
        src: BufferId,
        /// Logical extent of `src`; anything outside reads as zero.
        src_data: [u32; 2],
        /// Coarser level.
        dst: BufferId,
    },
    /// Level-0 line integrals of the probability current.
    LipInit {
        /// Latest field.
        cur: BufferId,
        /// Field before it.
        prev: BufferId,
        /// LIP level 0 (RG, W x H).
        dst: BufferId,
        /// `drag / mass`.
        coefficient: f32,
    },
    /// Sum pairs of fine edges into coarse edges.
    LipBuild {
        /// Level `L`.
        src: BufferId,
        /// Level `L + 1`.
        dst: BufferId,
    },
    /// Close the loop around the 2x2 top and seed its four potentials.
    LipKiss {
        /// Top LIP level (2x2).
        top: BufferId,
        /// Drag potential.
        drag: BufferId,
        /// Node spacing of the top level in cells (`2^top`).
        scale: u32,
    },
    /// Fill odd columns on even rows of a level from its even neighbours.
    LipIntegrateX {
        /// LIP level `i`.
        lip: BufferId,
        /// Drag potential.
        drag: BufferId,
        /// Node spacing of level `i` in cells (`2^i`).
        scale: u32,
    },
    /// Fill odd rows on every column of a level from the rows around them.
    LipIntegrateY {
        /// LIP level `i`.
        lip: BufferId,
        /// Drag potential.
        drag: BufferId,
        /// Node spacing of level `i` in cells (`2^i`).
        scale: u32,
    },
    /// Localised momentum kick `exp(i w (p.d + phase))`.
    Kick {
        /// Kick buffer (RG).
        dst: BufferId,
        /// Club centre in physical units.
        origin: [f32; 2],
        /// Club radius in physical units; zero gives the identity.
        radius: f32,
        /// Momentum.
        momentum: [f32; 2],
        /// Extra phase.
        phase: f32,
        /// Cell spacing.
        dx: f32,
    },
    /// Plane wave `exp(i p.x)`.
    PlaneWave {
        /// Kick buffer (RG).
        dst: BufferId,
        /// Momentum.
        momentum: [f32; 2],
        /// Cell spacing.
        dx: f32,
    },
}

impl Pass {
    /// Kernel name, used for labels and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Pass::Fill { .. } => "fill",
            Pass::Gaussian { .. } => "gaussian",
            Pass::QuarterTurn { .. } => "quarter_turn",
            Pass::Density { .. } => "density",
            Pass::Overlap { .. } => "overlap",
            Pass::ComplexMul { .. } => "complex_mul",
            Pass::ReduceSum { .. } => "reduce_sum",
            Pass::LipInit { .. } => "lip_init",
            Pass::LipBuild { .. } => "lip_build",
            Pass::LipKiss { .. } => "lip_kiss",
            Pass::LipIntegrateX { .. } => "lip_integrate_x",
            Pass::LipIntegrateY { .. } => "lip_integrate_y",
            Pass::Kick { .. } => "kick",
            Pass::PlaneWave { .. } => "plane_wave",
        }
    }

    /// Raster or storage.
    pub fn kind(&self) -> PassKind {
        match self {
            Pass::LipInit { .. }
            | Pass::LipBuild { .. }
            | Pass::LipKiss { .. }
            | Pass::LipIntegrateX { .. }
            | Pass::LipIntegrateY { .. } => PassKind::Storage,
            _ => PassKind::Raster,
        }
    }

    /// The single buffer this pass writes.
    pub fn target(&self) -> BufferId {
        match *self {
            Pass::Fill { dst, .. }
            | Pass::Gaussian { dst, .. }
            | Pass::QuarterTurn { dst, .. }
            | Pass::Density { dst, .. }
            | Pass::Overlap { dst, .. }
            | Pass::ComplexMul { dst, .. }
            | Pass::ReduceSum { dst, .. }
            | Pass::LipInit { dst, .. }
            | Pass::LipBuild { dst, .. }
            | Pass::Kick { dst, .. }
            | Pass::PlaneWave { dst, .. } => dst,
            Pass::LipKiss { drag, .. }
            | Pass::LipIntegrateX { drag, .. }
            | Pass::LipIntegrateY { drag, .. } => drag,
        }
    }

    /// Every binding of the pass, inputs first, target last.
    pub fn bindings(&self) -> Vec<(BufferId, Access)> {
        use Access::*;
        match *self {
            Pass::Fill { dst, .. }
            | Pass::Gaussian { dst, .. }
            | Pass::Kick { dst, .. }
            | Pass::PlaneWave { dst, .. } => vec![(dst, Write)],
            Pass::QuarterTurn { src, dst, potential, drag, mask, .. } => {
                vec![(src, Read), (potential, Read), (drag, Read), (mask, Read), (dst, Write)]
            }
            Pass::Density { cur, prev, dst } => vec![(cur, Read), (prev, Read), (dst, Write)],
            Pass::Overlap { goal, cur, prev, dst } => {
                vec![(goal, Read), (cur, Read), (prev, Read), (dst, Write)]
            }
            Pass::ComplexMul { a, b, dst } => vec![(a, Read), (b, Read), (dst, Write)],
            Pass::ReduceSum { src, dst, .. } => vec![(src, Read), (dst, Write)],
            Pass::LipInit { cur, prev, dst, .. } => vec![(cur, Read), (prev, Read), (dst, ReadWrite)],
            Pass::LipBuild { src, dst } => vec![(src, ReadWrite), (dst, ReadWrite)],
            Pass::LipKiss { top, drag, .. } => vec![(top, ReadWrite), (drag, ReadWrite)],
            Pass::LipIntegrateX { lip, drag, .. } | Pass::LipIntegrateY { lip, drag, .. } => {
                vec![(lip, Read), (drag, ReadWrite)]
            }
        }
    }
}

/// Handle for a deferred readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadbackTicket(pub(crate) u64);

/// Handle for a timed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerTicket(pub(crate) u64);

/// A compute backend. One submission thread owns it; work executes in
/// dispatch order.
pub trait ComputeDevice: Send {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Allocate a zero-initialised `width x height` buffer.
    fn create_buffer(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<BufferId, EngineError>;

    /// Allocated size and format of a buffer.
    fn buffer_info(&self, id: BufferId) -> Option<(u32, u32, Format)>;

    /// Upload host data covering the whole buffer (row-major, interleaved channels).
    fn write_buffer(&mut self, id: BufferId, data: &[f32]) -> Result<(), EngineError>;

    /// Record one pass. Failures surface later through [`poll_errors`](Self::poll_errors).
    fn dispatch(&mut self, pass: &Pass, grid: [u32; 2]);

    /// Make storage writes visible to every later pass.
    fn barrier(&mut self);

    /// Close the current command stream and hand it to the device.
    fn submit(&mut self);

    /// Blocking read of a region (row-major, interleaved channels).
    fn read_region(
        &mut self,
        id: BufferId,
        origin: [u32; 2],
        size: [u32; 2],
    ) -> Result<Vec<f32>, EngineError>;

    /// Queue a non-blocking read of a region. The data reflects the buffer at
    /// this point in the command stream.
    fn request_readback(&mut self, id: BufferId, origin: [u32; 2], size: [u32; 2]) -> ReadbackTicket;

    /// `None` while pending. Once `Some` is returned the ticket is spent.
    fn poll_readback(&mut self, ticket: ReadbackTicket) -> Option<Result<Vec<f32>, EngineError>>;

    /// Start a timed region.
    fn begin_timer(&mut self);

    /// End the timed region started by [`begin_timer`](Self::begin_timer).
    fn end_timer(&mut self) -> TimerTicket;

    /// Elapsed seconds once available. Once `Some` is returned the ticket is spent.
    fn poll_timer(&mut self, ticket: TimerTicket) -> Option<f64>;

    /// Drain anomalies recorded since the last call.
    fn poll_errors(&mut self) -> Vec<DeviceAnomaly>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lip_passes_are_storage() {
        let a = BufferId(0);
        let b = BufferId(1);
        assert_eq!(Pass::LipBuild { src: a, dst: b }.kind(), PassKind::Storage);
        assert_eq!(Pass::LipKiss { top: a, drag: b, scale: 4 }.kind(), PassKind::Storage);
        assert_eq!(
            Pass::ReduceSum { src: a, src_data: [3, 3], dst: b }.kind(),
            PassKind::Raster
        );
    }

    #[test]
    fn test_target_is_last_binding() {
        let ids: Vec<BufferId> = (0..5).map(BufferId).collect();
        let pass = Pass::QuarterTurn {
            src: ids[0],
            dst: ids[1],
            potential: ids[2],
            drag: ids[3],
            mask: ids[4],
            dt: 0.2,
            four_m_dx2: 4.0,
        };
        let bindings = pass.bindings();
        assert_eq!(bindings.last().unwrap().0, pass.target());
        assert_eq!(bindings.len(), 5);
    }
}
