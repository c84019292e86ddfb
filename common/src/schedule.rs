/// Fixed-interval trigger driven by an external monotonic clock.
///
/// A timer that has never fired is due immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTimer {
    interval_ms: u64,
    last_ms: Option<u64>,
}

impl IntervalTimer {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_ms: None,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn set_interval_ms(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_ms
            .map(|last| now_ms.saturating_sub(last) >= self.interval_ms)
            .unwrap_or(true)
    }

    pub fn reset(&mut self, now_ms: u64) {
        self.last_ms = Some(now_ms);
    }

    pub fn last_ms(&self) -> Option<u64> {
        self.last_ms
    }
}

/// Read-side bus work for one acquisition tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStep {
    StartConversion,
    Collect,
}

/// Time-driven half of the acquisition loop.
///
/// Commands are handled by the caller before asking for steps; this only decides what
/// the read and scan timers want.
#[derive(Debug, Clone)]
pub struct AcquisitionSchedule {
    read: IntervalTimer,
    scan: IntervalTimer,
}

impl AcquisitionSchedule {
    pub fn new(read_interval_ms: u64, scan_interval_ms: u64) -> Self {
        Self {
            read: IntervalTimer::new(read_interval_ms),
            scan: IntervalTimer::new(scan_interval_ms),
        }
    }

    pub fn set_scan_interval_ms(&mut self, interval_ms: u64) {
        self.scan.set_interval_ms(interval_ms);
    }

    pub fn scan_interval_ms(&self) -> u64 {
        self.scan.interval_ms()
    }

    /// Read/convert step for this tick.
    pub fn read_step(&self, now_ms: u64, converting: bool) -> Option<AcquisitionStep> {
        if converting {
            Some(AcquisitionStep::Collect)
        } else if self.read.is_due(now_ms) {
            Some(AcquisitionStep::StartConversion)
        } else {
            None
        }
    }

    /// Whether a periodic scan should run now, given the bus state after the read step.
    pub fn scan_due(&self, now_ms: u64, bus_idle: bool, auto_scan: bool) -> bool {
        auto_scan && bus_idle && self.scan.is_due(now_ms)
    }

    pub fn mark_collected(&mut self, now_ms: u64) {
        self.read.reset(now_ms);
    }

    pub fn mark_scanned(&mut self, now_ms: u64) {
        self.scan.reset(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_is_due_until_first_reset() {
        let mut timer = IntervalTimer::new(10_000);
        assert!(timer.is_due(0));

        timer.reset(1_000);
        assert!(!timer.is_due(10_999));
        assert!(timer.is_due(11_000));
    }

    #[test]
    fn conversion_in_progress_always_collects() {
        let mut schedule = AcquisitionSchedule::new(10_000, 30_000);
        schedule.mark_collected(0);

        assert_eq!(schedule.read_step(1_000, true), Some(AcquisitionStep::Collect));
        assert_eq!(schedule.read_step(1_000, false), None);
        assert_eq!(
            schedule.read_step(10_000, false),
            Some(AcquisitionStep::StartConversion)
        );
    }

    #[test]
    fn scan_requires_idle_bus_and_auto_scan() {
        let mut schedule = AcquisitionSchedule::new(10_000, 30_000);
        schedule.mark_scanned(0);

        assert!(!schedule.scan_due(29_999, true, true));
        assert!(schedule.scan_due(30_000, true, true));
        assert!(!schedule.scan_due(30_000, false, true));
        assert!(!schedule.scan_due(30_000, true, false));
    }
}
