//! Error and anomaly types shared by every backend.

use crate::device::BufferId;

/// Fatal errors: resource creation, bad grid geometry, failed synchronous reads.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A buffer, pipeline or shader could not be created.
    ResourceCreation(String),
    /// Grid dimensions or physical constants are unusable.
    InvalidGrid(String),
    /// The device rejected an operation (unknown handle, wrong size, lost device).
    Device(String),
    /// A synchronous readback failed.
    Readback(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ResourceCreation(msg) => write!(f, "resource creation failed: {}", msg),
            EngineError::InvalidGrid(msg) => write!(f, "invalid grid: {}", msg),
            EngineError::Device(msg) => write!(f, "device error: {}", msg),
            EngineError::Readback(msg) => write!(f, "readback failed: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// Non-fatal execution anomaly.
///
/// Devices accumulate these while work runs and hand them out through
/// [`ComputeDevice::poll_errors`](crate::device::ComputeDevice::poll_errors).
/// The engine adds its own numerical anomalies to the same stream. None of
/// them stop the simulation; the state may be corrupted afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceAnomaly {
    /// A pass touched a buffer written by a storage pass with no barrier in between.
    MissingBarrier {
        /// Pass that performed the unsynchronised access.
        pass: &'static str,
        /// Buffer that was still being written.
        buffer: BufferId,
    },
    /// One buffer was bound both as an input and as the output of a pass.
    ReadWriteAlias {
        /// Offending pass.
        pass: &'static str,
        /// Buffer bound twice.
        buffer: BufferId,
    },
    /// The sampler met a zero, negative or non-finite parent weight.
    NonFiniteWeight {
        /// Pyramid level at which the weight was read.
        level: usize,
        /// The weight value.
        weight: f32,
    },
    /// Rounding left a positive remainder after all four children were subtracted.
    SamplerFallthrough {
        /// Pyramid level of the 2x2 block.
        level: usize,
    },
    /// Total probability was zero or non-finite so the win probability is NaN.
    DegenerateTotal {
        /// The total probability that was read back.
        total: f32,
    },
    /// A deferred readback or timer query failed.
    ReadbackFailed(String),
    /// Backend-specific error (validation error, unknown handle, size mismatch).
    Backend(String),
}

impl DeviceAnomaly {
    /// Stable short name used to count anomalies per kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceAnomaly::MissingBarrier { .. } => "missing_barrier",
            DeviceAnomaly::ReadWriteAlias { .. } => "read_write_alias",
            DeviceAnomaly::NonFiniteWeight { .. } => "non_finite_weight",
            DeviceAnomaly::SamplerFallthrough { .. } => "sampler_fallthrough",
            DeviceAnomaly::DegenerateTotal { .. } => "degenerate_total",
            DeviceAnomaly::ReadbackFailed(_) => "readback_failed",
            DeviceAnomaly::Backend(_) => "backend",
        }
    }
}

impl std::fmt::Display for DeviceAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceAnomaly::MissingBarrier { pass, buffer } => {
                write!(f, "{} accessed buffer {} before a barrier", pass, buffer.index())
            }
            DeviceAnomaly::ReadWriteAlias { pass, buffer } => {
                write!(f, "{} binds buffer {} for both read and write", pass, buffer.index())
            }
            DeviceAnomaly::NonFiniteWeight { level, weight } => {
                write!(f, "sampler weight {} at level {}", weight, level)
            }
            DeviceAnomaly::SamplerFallthrough { level } => {
                write!(f, "sampler remainder never crossed zero at level {}", level)
            }
            DeviceAnomaly::DegenerateTotal { total } => {
                write!(f, "total probability {} is degenerate", total)
            }
            DeviceAnomaly::ReadbackFailed(msg) => write!(f, "readback failed: {}", msg),
            DeviceAnomaly::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}
