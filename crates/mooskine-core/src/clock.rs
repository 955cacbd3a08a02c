//! Time source for creation timestamps

use chrono::{DateTime, Duration, DurationRound, Utc};

/// Source of "now"
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hands out strictly increasing timestamps at microsecond precision
///
/// Storage keeps microseconds, so a timestamp handed out here survives a
/// round-trip unchanged. Two records created within the same microsecond
/// still get distinct, ordered creation dates.
pub(crate) struct StampClock {
    clock: Box<dyn Clock>,
    last: Option<DateTime<Utc>>,
}

impl StampClock {
    pub(crate) fn new(clock: Box<dyn Clock>) -> Self {
        Self { clock, last: None }
    }

    pub(crate) fn stamp(&mut self) -> DateTime<Utc> {
        let now = truncate_micros(self.clock.now());
        let stamp = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }

    /// Make sure later stamps come after a timestamp already in storage
    pub(crate) fn observe(&mut self, existing: DateTime<Utc>) {
        if self.last.map_or(true, |last| existing > last) {
            self.last = Some(existing);
        }
    }
}

fn truncate_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::microseconds(1)).unwrap_or(t)
}


#[cfg(test)]
mod tests {
    use super::testing::FixedClock;
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2023-01-24T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_stamps_strictly_increase_when_clock_is_frozen() {
        let mut clock = StampClock::new(Box::new(FixedClock::at(t0())));
        let a = clock.stamp();
        let b = clock.stamp();
        let c = clock.stamp();
        assert_eq!(a, t0());
        assert!(a < b && b < c);
        assert_eq!(b - a, Duration::microseconds(1));
    }

    #[test]
    fn test_stamp_follows_clock_when_it_moves() {
        let fixed = FixedClock::at(t0());
        let mut clock = StampClock::new(Box::new(fixed.clone()));
        clock.stamp();
        fixed.advance(Duration::seconds(5));
        assert_eq!(clock.stamp(), t0() + Duration::seconds(5));
    }

    #[test]
    fn test_observe_pushes_past_stored_timestamps() {
        let mut clock = StampClock::new(Box::new(FixedClock::at(t0())));
        let stored = t0() + Duration::hours(1);
        clock.observe(stored);
        assert!(clock.stamp() > stored);
    }

    #[test]
    fn test_stamp_truncates_to_micros() {
        let fine = t0() + Duration::nanoseconds(1_500);
        let mut clock = StampClock::new(Box::new(FixedClock::at(fine)));
        assert_eq!(clock.stamp(), t0() + Duration::microseconds(1));
    }
}
