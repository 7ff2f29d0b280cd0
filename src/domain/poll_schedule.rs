use std::time::Duration;

/// Monotonic milliseconds. Only differences between two values are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    pub fn saturating_add(self, duration: Duration) -> Self {
        TimestampMs(self.0.saturating_add(duration_ms(duration)))
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        TimestampMs(self.0.saturating_sub(duration_ms(duration)))
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

pub trait Clock: Send + Sync {
    fn now(&self) -> TimestampMs;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub idle: Duration,
    pub charging: Duration,
    pub fast_window: Duration,
    pub fast_decrement: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(300),
            charging: Duration::from_secs(5),
            fast_window: Duration::from_secs(30),
            fast_decrement: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    FastPolling,
    Charging,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalDecision {
    pub mode: PollMode,
    pub interval: Duration,
    pub changed: bool,
}

/// Interval bookkeeping of one coordinator: the current refresh interval and
/// the deadline of the fast polling window armed after a session start.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    intervals: PollIntervals,
    current: Duration,
    fast_polling_until: Option<TimestampMs>,
}

impl PollSchedule {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals,
            current: intervals.idle,
            fast_polling_until: None,
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current
    }

    pub fn fast_polling_until(&self) -> Option<TimestampMs> {
        self.fast_polling_until
    }

    pub fn arm_fast_polling(&mut self, now: TimestampMs) -> TimestampMs {
        let deadline = now.saturating_add(self.intervals.fast_window);
        self.fast_polling_until = Some(deadline);
        deadline
    }

    pub fn is_fast_polling(&self, now: TimestampMs) -> bool {
        self.fast_polling_until
            .is_some_and(|deadline| now < deadline)
    }

    /// Picks the interval for the next cycle after a successful fetch.
    ///
    /// While the fast polling window is open the charging interval is forced
    /// and the window additionally shrinks by `fast_decrement`.
    pub fn evaluate(&mut self, charging: bool, now: TimestampMs) -> IntervalDecision {
        let mode = match self.fast_polling_until {
            Some(deadline) if now < deadline => {
                self.fast_polling_until =
                    Some(deadline.saturating_sub(self.intervals.fast_decrement));
                PollMode::FastPolling
            }
            _ => {
                self.fast_polling_until = None;
                if charging {
                    PollMode::Charging
                } else {
                    PollMode::Idle
                }
            }
        };

        let interval = match mode {
            PollMode::FastPolling | PollMode::Charging => self.intervals.charging,
            PollMode::Idle => self.intervals.idle,
        };

        let changed = interval != self.current;
        if changed {
            self.current = interval;
        }

        IntervalDecision {
            mode,
            interval,
            changed,
        }
    }
}
