//! Timer entry and handle types

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Longest delay a deadline is pushed out by; anything longer never fires
/// in practice.
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `from + delay`, clamped to [`FAR_FUTURE`] instead of overflowing.
pub(crate) fn deadline_after(from: Instant, delay: Duration) -> Instant {
    from.checked_add(delay.min(FAR_FUTURE)).unwrap_or(from)
}

/// Unique timer handle for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Generate a new unique timer handle
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a timer fires once or keeps firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Single,
    Repeat,
}

/// Scheduling record for one timer; the callback is kept elsewhere.
#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub handle: TimerHandle,
    pub deadline: Instant,
    pub period: Duration,
    pub mode: TimerMode,
}

impl TimerEntry {
    pub fn new(period: Duration, mode: TimerMode) -> Self {
        Self {
            handle: TimerHandle::new(),
            deadline: deadline_after(Instant::now(), period),
            period,
            mode,
        }
    }

    /// Next occurrence of a repeating timer, measured from its deadline
    pub fn reschedule(&self) -> Option<TimerEntry> {
        match self.mode {
            TimerMode::Single => None,
            TimerMode::Repeat => Some(TimerEntry {
                handle: self.handle,
                // A zero period would refire within the same poll forever
                deadline: deadline_after(self.deadline, self.period.max(Duration::from_millis(1))),
                period: self.period,
                mode: self.mode,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_unique() {
        let a = TimerHandle::new();
        let b = TimerHandle::new();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_reschedule() {
        let single = TimerEntry::new(Duration::from_millis(5), TimerMode::Single);
        assert!(single.reschedule().is_none());

        let repeat = TimerEntry::new(Duration::from_millis(5), TimerMode::Repeat);
        let next = repeat.reschedule().unwrap();
        assert_eq!(next.handle, repeat.handle);
        assert_eq!(next.deadline, repeat.deadline + Duration::from_millis(5));
    }

    #[test]
    fn test_unbounded_period_clamps() {
        let before = Instant::now();
        let entry = TimerEntry::new(Duration::MAX, TimerMode::Repeat);
        assert!(entry.deadline >= before + Duration::from_secs(365 * 24 * 60 * 60));

        let next = entry.reschedule().unwrap();
        assert!(next.deadline >= entry.deadline);
    }
}
