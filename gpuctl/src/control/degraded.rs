//! Escalation for sustained sampling failures.
//!
//! A single failed or timed-out read is routine: the tick reuses the last
//! known value and logs a warning. When reads keep failing tick after tick the
//! controller is effectively flying blind, which deserves exactly one louder
//! message, and one more when it recovers.
//!
//! ```text
//!        degraded             streak >= threshold
//!  Ok ────────────► Counting ────────────────────► Raised
//!   ▲                  │                             │
//!   │     healthy      │          healthy            │
//!   └──────────────────┴─────────────────────────────┘
//! ```

/// Consecutive degraded ticks before the alarm is raised.
pub const DEFAULT_DEGRADED_THRESHOLD: u32 = 3;

/// Result of [`DegradedAlarm::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedStatus {
    /// All reads fresh.
    Healthy,

    /// Degraded, but not for long enough to raise.
    Pending,

    /// Threshold just reached. Returned once per episode.
    Raised,

    /// Still degraded after raising.
    Active,

    /// Fresh reads again after having raised. Returned once.
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ok,
    Counting(u32),
    Raised,
}

#[derive(Debug, Clone)]
pub struct DegradedAlarm {
    threshold: u32,
    state: State,
}

impl DegradedAlarm {
    /// A `threshold` of zero is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: State::Ok,
        }
    }

    /// Feed one tick's outcome.
    pub fn observe(&mut self, degraded: bool) -> DegradedStatus {
        match (self.state, degraded) {
            (State::Ok, false) => DegradedStatus::Healthy,

            (State::Counting(_), false) => {
                self.state = State::Ok;
                DegradedStatus::Healthy
            }

            (State::Raised, false) => {
                self.state = State::Ok;
                DegradedStatus::Cleared
            }

            (State::Ok, true) => self.count(1),

            (State::Counting(streak), true) => self.count(streak + 1),

            (State::Raised, true) => DegradedStatus::Active,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_raised(&self) -> bool {
        self.state == State::Raised
    }

    fn count(&mut self, streak: u32) -> DegradedStatus {
        if streak >= self.threshold {
            self.state = State::Raised;
            DegradedStatus::Raised
        } else {
            self.state = State::Counting(streak);
            DegradedStatus::Pending
        }
    }
}

impl Default for DegradedAlarm {
    fn default() -> Self {
        Self::new(DEFAULT_DEGRADED_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_stay_healthy_on_fresh_reads() {
        let mut alarm = DegradedAlarm::new(3);

        assert_eq!(alarm.observe(false), DegradedStatus::Healthy);
        assert_eq!(alarm.observe(false), DegradedStatus::Healthy);
    }

    #[test]
    fn should_raise_once_after_threshold() {
        let mut alarm = DegradedAlarm::new(3);

        assert_eq!(alarm.observe(true), DegradedStatus::Pending);
        assert_eq!(alarm.observe(true), DegradedStatus::Pending);
        assert_eq!(alarm.observe(true), DegradedStatus::Raised);
        assert_eq!(alarm.observe(true), DegradedStatus::Active);
        assert!(alarm.is_raised());
    }

    #[test]
    fn should_restart_count_after_fresh_read() {
        let mut alarm = DegradedAlarm::new(3);

        alarm.observe(true);
        alarm.observe(true);
        assert_eq!(alarm.observe(false), DegradedStatus::Healthy);

        assert_eq!(alarm.observe(true), DegradedStatus::Pending);
        assert_eq!(alarm.observe(true), DegradedStatus::Pending);
    }

    #[test]
    fn should_clear_once_when_reads_recover() {
        let mut alarm = DegradedAlarm::new(1);

        assert_eq!(alarm.observe(true), DegradedStatus::Raised);
        assert_eq!(alarm.observe(false), DegradedStatus::Cleared);
        assert_eq!(alarm.observe(false), DegradedStatus::Healthy);
    }

    #[test]
    fn should_rearm_after_clearing() {
        let mut alarm = DegradedAlarm::new(2);
        alarm.observe(true);
        alarm.observe(true);
        alarm.observe(false);

        assert_eq!(alarm.observe(true), DegradedStatus::Pending);
        assert_eq!(alarm.observe(true), DegradedStatus::Raised);
    }

    #[test]
    fn should_treat_zero_threshold_as_one() {
        let mut alarm = DegradedAlarm::new(0);

        assert_eq!(alarm.observe(true), DegradedStatus::Raised);
    }
}
