// Consecutive failure tracking for the auto-advance path

/// What to do after a track failed to play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Advance,
    Stop,
}

#[derive(Debug, Clone)]
pub struct FailureTracker {
    consecutive: u32,
    limit: u32,
}

impl FailureTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit: limit.max(1),
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn record_success(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure and decide whether to keep going.
    ///
    /// Repeat-one and online tracks never auto-advance: the same failure
    /// would just happen again. Otherwise the queue advances until `limit`
    /// failures in a row, at which point the counter resets and playback stops.
    pub fn record_failure(&mut self, repeat_one: bool, online: bool) -> FailureDecision {
        if repeat_one || online {
            self.consecutive = 0;
            return FailureDecision::Stop;
        }

        self.consecutive += 1;
        if self.consecutive >= self.limit {
            self.consecutive = 0;
            FailureDecision::Stop
        } else {
            FailureDecision::Advance
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_third_failure_stops_and_resets() {
        let mut tracker = FailureTracker::new(3);
        assert_eq!(tracker.record_failure(false, false), FailureDecision::Advance);
        assert_eq!(tracker.record_failure(false, false), FailureDecision::Advance);
        assert_eq!(tracker.consecutive(), 2);
        assert_eq!(tracker.record_failure(false, false), FailureDecision::Stop);
        assert_eq!(tracker.consecutive(), 0);
    }

    #[test]
    fn test_success_resets() {
        let mut tracker = FailureTracker::new(3);
        tracker.record_failure(false, false);
        tracker.record_failure(false, false);
        tracker.record_success();
        assert_eq!(tracker.record_failure(false, false), FailureDecision::Advance);
    }

    #[test]
    fn test_online_or_repeat_one_stop_immediately() {
        let mut tracker = FailureTracker::new(3);
        assert_eq!(tracker.record_failure(false, true), FailureDecision::Stop);
        assert_eq!(tracker.record_failure(true, false), FailureDecision::Stop);
    }
}
