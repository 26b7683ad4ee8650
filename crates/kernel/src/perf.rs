//! Device throughput estimate from timer queries.

use crate::device::{ComputeDevice, TimerTicket};

/// Turns-per-second estimate with a last-known-good fallback.
///
/// At most one timed region is outstanding. Until it resolves the previous
/// estimate stays in force; nothing here ever waits on the device.
#[derive(Debug, Clone)]
pub struct PerfEstimate {
    pending: Option<(TimerTicket, f64)>,
    max_turns_per_second: f64,
    samples: u64,
}

impl PerfEstimate {
    /// Start from the nominal rate.
    pub fn new(nominal_turns_per_second: f64) -> Self {
        Self { pending: None, max_turns_per_second: nominal_turns_per_second, samples: 0 }
    }

    /// Current estimate.
    pub fn max_turns_per_second(&self) -> f64 {
        self.max_turns_per_second
    }

    /// Number of timer results folded in so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// No timed region outstanding.
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Fold in the outstanding timer if it has resolved.
    pub fn poll(&mut self, device: &mut dyn ComputeDevice) -> bool {
        let Some((ticket, turns)) = self.pending else {
            return false;
        };
        let Some(seconds) = device.poll_timer(ticket) else {
            return false;
        };
        self.pending = None;
        if seconds.is_finite() && seconds > 0.0 && turns > 0.0 {
            self.max_turns_per_second = turns / seconds;
            self.samples += 1;
            tracing::debug!("{} turns in {:.3} ms, {:.0} turns/s", turns, seconds * 1e3, self.max_turns_per_second);
            true
        } else {
            false
        }
    }

    /// Open a timed region.
    pub fn begin(&mut self, device: &mut dyn ComputeDevice) {
        device.begin_timer();
    }

    /// Close the timed region, recording how many turns it covered.
    pub fn end(&mut self, device: &mut dyn ComputeDevice, turns: f64) {
        let ticket = device.end_timer();
        self.pending = Some((ticket, turns));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuDevice;

    #[test]
    fn test_estimate_holds_until_timer_resolves() {
        let mut device = CpuDevice::new();
        let mut perf = PerfEstimate::new(300.0);
        assert!(!perf.poll(&mut device));

        perf.begin(&mut device);
        std::thread::sleep(std::time::Duration::from_millis(2));
        perf.end(&mut device, 4.0);
        assert!(!perf.is_idle());
        assert!(!perf.poll(&mut device));
        assert_eq!(perf.max_turns_per_second(), 300.0);

        device.submit();
        assert!(perf.poll(&mut device));
        assert!(perf.is_idle());
        assert!(perf.max_turns_per_second() > 0.0 && perf.max_turns_per_second() <= 2000.0);
        assert_eq!(perf.samples(), 1);
    }
}
