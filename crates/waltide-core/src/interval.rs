//! Decides when a replication interval ends.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Outcome of evaluating an idle stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleDecision {
    /// A transaction is open; the interval must not end.
    InTransaction,
    /// Keep polling; `remaining_ms` of idle budget is left.
    Wait { remaining_ms: i64 },
    /// The idle budget is used up.
    Exhausted { remaining_ms: i64 },
    /// The store clock moved backwards relative to the interval start.
    ClockSkew { remaining_ms: i64 },
}

impl IdleDecision {
    pub fn ends_interval(self) -> bool {
        matches!(
            self,
            IdleDecision::Exhausted { .. } | IdleDecision::ClockSkew { .. }
        )
    }
}

/// Idle/termination policy for a replication interval.
///
/// `max_interval` bounds how long the stream may stay idle, measured on the
/// store's clock. It does not bound the total length of an interval while
/// data keeps arriving.
#[derive(Debug, Clone, Copy)]
pub struct IntervalController {
    max_interval: Duration,
    // Accepted for configuration compatibility; not consulted.
    min_interval: Duration,
}

impl IntervalController {
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_interval,
            min_interval,
        }
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Evaluate an empty read against the idle budget.
    pub fn evaluate(
        &self,
        in_transaction: bool,
        clock_at_start: DateTime<Utc>,
        clock_now: DateTime<Utc>,
    ) -> IdleDecision {
        if in_transaction {
            return IdleDecision::InTransaction;
        }

        let max_ms = i64::try_from(self.max_interval.as_millis()).unwrap_or(i64::MAX);
        let elapsed_ms = (clock_now - clock_at_start).num_milliseconds();
        let remaining_ms = max_ms.saturating_sub(elapsed_ms);

        if remaining_ms <= 0 {
            IdleDecision::Exhausted { remaining_ms }
        } else if remaining_ms > max_ms {
            IdleDecision::ClockSkew { remaining_ms }
        } else {
            IdleDecision::Wait { remaining_ms }
        }
    }

    pub fn should_end_interval(
        &self,
        in_transaction: bool,
        clock_at_start: DateTime<Utc>,
        clock_now: DateTime<Utc>,
    ) -> bool {
        self.evaluate(in_transaction, clock_at_start, clock_now)
            .ends_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn controller(max_ms: u64) -> IntervalController {
        IntervalController::new(Duration::ZERO, Duration::from_millis(max_ms))
    }

    #[test]
    fn test_idle_budget_exhausted_ends_interval() {
        let c = controller(5000);
        assert!(c.should_end_interval(false, at(0), at(6000)));
        assert_eq!(
            c.evaluate(false, at(0), at(6000)),
            IdleDecision::Exhausted { remaining_ms: -1000 }
        );
        assert!(c.should_end_interval(false, at(0), at(5000)));
    }

    #[test]
    fn test_never_ends_inside_transaction() {
        let c = controller(5000);
        assert!(!c.should_end_interval(true, at(0), at(6000)));
        assert!(!c.should_end_interval(true, at(0), at(-6000)));
        assert_eq!(c.evaluate(true, at(0), at(6000)), IdleDecision::InTransaction);
    }

    #[test]
    fn test_waits_while_budget_remains() {
        let c = controller(5000);
        assert_eq!(
            c.evaluate(false, at(0), at(1500)),
            IdleDecision::Wait { remaining_ms: 3500 }
        );
        assert!(!c.should_end_interval(false, at(0), at(0)));
    }

    #[test]
    fn test_clock_moving_backwards_ends_interval() {
        let c = controller(5000);
        assert_eq!(
            c.evaluate(false, at(0), at(-1)),
            IdleDecision::ClockSkew { remaining_ms: 5001 }
        );
        assert!(c.should_end_interval(false, at(0), at(-1)));
    }

    #[test]
    fn test_zero_max_interval_ends_at_first_idle_read() {
        let c = controller(0);
        assert!(c.should_end_interval(false, at(0), at(0)));
    }

    #[test]
    fn test_min_interval_is_carried_but_inert() {
        let with_min = IntervalController::new(Duration::from_secs(60), Duration::from_millis(5000));
        let without_min = controller(5000);

        for elapsed in [-10, 0, 1000, 4999, 5000, 6000] {
            assert_eq!(
                with_min.evaluate(false, at(0), at(elapsed)),
                without_min.evaluate(false, at(0), at(elapsed))
            );
        }
        assert_eq!(with_min.min_interval(), Duration::from_secs(60));
    }
}
