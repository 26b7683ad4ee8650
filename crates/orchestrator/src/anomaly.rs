//! Per-kind accounting of non-fatal device anomalies.

use kernel::DeviceAnomaly;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counts anomalies drained from the engine each frame.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnomalyLog {
    counts: BTreeMap<&'static str, u64>,
    last: Option<String>,
}

impl AnomalyLog {
    /// Record a batch. The first anomaly of each kind is logged; the rest are only counted.
    pub fn record(&mut self, anomalies: Vec<DeviceAnomaly>) {
        for anomaly in anomalies {
            let count = self.counts.entry(anomaly.kind()).or_insert(0);
            if *count == 0 {
                tracing::warn!("Device anomaly ({}): {}", anomaly.kind(), anomaly);
            }
            *count += 1;
            self.last = Some(anomaly.to_string());
        }
    }

    /// Occurrences of one kind.
    pub fn count(&self, kind: &str) -> u64 {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    /// Occurrences of every kind.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Counts keyed by kind.
    pub fn counts(&self) -> &BTreeMap<&'static str, u64> {
        &self.counts
    }

    /// Most recent anomaly, formatted.
    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Log the totals.
    pub fn summarize(&self) {
        if self.counts.is_empty() {
            tracing::info!("No device anomalies");
            return;
        }
        for (kind, count) in &self.counts {
            tracing::warn!("{} anomalies of kind {}", count, kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_kind() {
        let mut log = AnomalyLog::default();
        log.record(vec![
            DeviceAnomaly::SamplerFallthrough { level: 2 },
            DeviceAnomaly::DegenerateTotal { total: 0.0 },
        ]);
        log.record(vec![DeviceAnomaly::SamplerFallthrough { level: 0 }]);

        assert_eq!(log.count("sampler_fallthrough"), 2);
        assert_eq!(log.count("degenerate_total"), 1);
        assert_eq!(log.count("missing_barrier"), 0);
        assert_eq!(log.total(), 3);
    }
}
