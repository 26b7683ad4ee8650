//! Read/write hazard tracking for recorded passes.

use std::collections::HashSet;

use crate::device::{BufferId, Pass, PassKind};
use crate::error::DeviceAnomaly;

/// Tracks storage writes that have not yet been fenced by a barrier.
#[derive(Debug, Default)]
pub struct HazardTracker {
    unfenced: HashSet<BufferId>,
}

impl HazardTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a pass about to run and record its own writes.
    pub fn check(&mut self, pass: &Pass) -> Vec<DeviceAnomaly> {
        let mut found = Vec::new();
        let bindings = pass.bindings();

        for (i, (a, _)) in bindings.iter().enumerate() {
            if bindings[i + 1..].iter().any(|(b, _)| b == a) {
                found.push(DeviceAnomaly::ReadWriteAlias { pass: pass.name(), buffer: *a });
            }
        }

        for (buffer, _) in &bindings {
            if self.unfenced.contains(buffer) {
                found.push(DeviceAnomaly::MissingBarrier { pass: pass.name(), buffer: *buffer });
            }
        }

        if pass.kind() == PassKind::Storage {
            self.unfenced.insert(pass.target());
        }
        found
    }

    /// A barrier fences every outstanding storage write.
    pub fn barrier(&mut self) {
        self.unfenced.clear();
    }

    /// Buffers written by storage passes since the last barrier.
    pub fn unfenced(&self) -> usize {
        self.unfenced.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_write_needs_barrier() {
        let (lip0, lip1, lip2) = (BufferId(0), BufferId(1), BufferId(2));
        let mut tracker = HazardTracker::new();

        assert!(tracker.check(&Pass::LipBuild { src: lip0, dst: lip1 }).is_empty());
        let found = tracker.check(&Pass::LipBuild { src: lip1, dst: lip2 });
        assert_eq!(found, vec![DeviceAnomaly::MissingBarrier { pass: "lip_build", buffer: lip1 }]);

        tracker.barrier();
        assert_eq!(tracker.unfenced(), 0);
        assert!(tracker.check(&Pass::LipBuild { src: lip2, dst: lip0 }).is_empty());
    }

    #[test]
    fn test_raster_write_is_implicitly_ordered() {
        let (a, b, c) = (BufferId(0), BufferId(1), BufferId(2));
        let mut tracker = HazardTracker::new();
        assert!(tracker.check(&Pass::ComplexMul { a, b, dst: c }).is_empty());
        assert!(tracker.check(&Pass::ComplexMul { a: c, b, dst: a }).is_empty());
    }

    #[test]
    fn test_alias_detected() {
        let (a, b) = (BufferId(0), BufferId(1));
        let mut tracker = HazardTracker::new();
        let found = tracker.check(&Pass::ComplexMul { a, b, dst: a });
        assert_eq!(found, vec![DeviceAnomaly::ReadWriteAlias { pass: "complex_mul", buffer: a }]);
    }
}
