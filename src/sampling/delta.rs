/// Per-interval delta over a monotonic raw counter.
///
/// The first update after construction has no previous value to compare
/// against and always reports a delta of zero. A sample smaller than the
/// previous one (counter reset, re-enumeration) also reports zero instead
/// of wrapping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeltaTracker {
    last: Option<u64>,
    delta: u64,
}

impl DeltaTracker {
    pub const fn new() -> Self {
        Self { last: None, delta: 0 }
    }

    /// Fold a new raw sample into the tracker
    pub fn update(&mut self, current: u64) {
        self.delta = match self.last {
            Some(last) => current.saturating_sub(last),
            None => 0,
        };
        self.last = Some(current);
    }

    /// Delta computed by the last update
    #[inline]
    pub fn delta(&self) -> u64 {
        self.delta
    }

    /// Last raw value seen (0 before the first update)
    #[inline]
    pub fn value(&self) -> u64 {
        self.last.unwrap_or(0)
    }

    /// Whether a baseline sample has been recorded
    #[inline]
    pub fn has_baseline(&self) -> bool {
        self.last.is_some()
    }

    /// Zero the reported delta but keep the baseline
    pub fn clear_delta(&mut self) {
        self.delta = 0;
    }
}

/// Running maximum of a raw counter.
///
/// Some drivers report counters that briefly step backwards. Feeding the
/// high-water mark into a [`DeltaTracker`] instead of the raw sample makes
/// the tracked value non-decreasing, so a dip is treated as noise.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HighWaterMark {
    value: u64,
}

impl HighWaterMark {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Record an observation and return the effective (non-decreasing) value
    pub fn advance(&mut self, observed: u64) -> u64 {
        if self.value < observed {
            self.value = observed;
        }
        self.value
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_is_zero() {
        let mut tracker = DeltaTracker::new();
        tracker.update(123_456);
        assert_eq!(tracker.delta(), 0);
        assert_eq!(tracker.value(), 123_456);
        assert!(tracker.has_baseline());
    }

    #[test]
    fn test_delta_between_samples() {
        let mut tracker = DeltaTracker::new();
        tracker.update(10);
        tracker.update(25);
        tracker.update(70);
        assert_eq!(tracker.delta(), 45);
    }

    #[test]
    fn test_decrease_clamps_to_zero() {
        let mut tracker = DeltaTracker::new();
        tracker.update(1000);
        tracker.update(400);
        assert_eq!(tracker.delta(), 0);
        // The smaller value becomes the new baseline
        tracker.update(500);
        assert_eq!(tracker.delta(), 100);
    }

    #[test]
    fn test_clear_delta_keeps_baseline() {
        let mut tracker = DeltaTracker::new();
        tracker.update(100);
        tracker.update(300);
        tracker.clear_delta();
        assert_eq!(tracker.delta(), 0);
        tracker.update(350);
        assert_eq!(tracker.delta(), 50);
    }

    #[test]
    fn test_high_water_mark_never_decreases() {
        let mut mark = HighWaterMark::new();
        assert_eq!(mark.advance(500), 500);
        assert_eq!(mark.advance(200), 500);
        assert_eq!(mark.advance(800), 800);
        assert_eq!(mark.value(), 800);
    }

    #[test]
    fn test_high_water_mark_feeds_tracker() {
        let mut mark = HighWaterMark::new();
        let mut tracker = DeltaTracker::new();

        for raw in [100, 300, 250, 400] {
            tracker.update(mark.advance(raw));
        }

        // 250 was noise: 300 was fed instead, so the last interval is 400 - 300
        assert_eq!(tracker.delta(), 100);
    }
}
