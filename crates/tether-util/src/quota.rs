//! Per-calendar-day quota counters
//!
//! Used for the emergency-unlock allowance and the reminder cap. A counter
//! silently starts over when it is consulted on a new calendar day.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Counter that allows at most `limit` uses per calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuota {
    limit: u32,
    day: NaiveDate,
    used: u32,
}

impl DailyQuota {
    pub fn new(limit: u32, today: NaiveDate) -> Self {
        Self {
            limit,
            day: today,
            used: 0,
        }
    }

    /// Restore a counter from persisted values. `used` is clamped to `limit`.
    pub fn restore(limit: u32, day: NaiveDate, used: u32) -> Self {
        Self {
            limit,
            day,
            used: used.min(limit),
        }
    }

    fn roll(&mut self, today: NaiveDate) {
        if today != self.day {
            self.day = today;
            self.used = 0;
        }
    }

    /// Try to consume one use. Returns `false` without side effects when the
    /// day's allowance is exhausted.
    pub fn try_consume(&mut self, today: NaiveDate) -> bool {
        self.roll(today);
        if self.used < self.limit {
            self.used += 1;
            true
        } else {
            false
        }
    }

    /// Uses remaining today
    pub fn remaining(&self, today: NaiveDate) -> u32 {
        if today != self.day {
            self.limit
        } else {
            self.limit.saturating_sub(self.used)
        }
    }

    /// Uses consumed on `today`
    pub fn used(&self, today: NaiveDate) -> u32 {
        if today != self.day { 0 } else { self.used }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Zero the counter for `today`
    pub fn reset(&mut self, today: NaiveDate) {
        self.day = today;
        self.used = 0;
    }

    /// Change the limit, keeping today's usage (clamped)
    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit;
        self.used = self.used.min(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_quota_allows_within_limit() {
        let mut quota = DailyQuota::new(3, day(1));

        assert!(quota.try_consume(day(1)));
        assert!(quota.try_consume(day(1)));
        assert!(quota.try_consume(day(1)));

        // 4th use should be denied
        assert!(!quota.try_consume(day(1)));
        assert_eq!(quota.remaining(day(1)), 0);
        assert_eq!(quota.used(day(1)), 3);
    }

    #[test]
    fn test_quota_rolls_over_on_new_day() {
        let mut quota = DailyQuota::new(1, day(1));
        assert!(quota.try_consume(day(1)));
        assert!(!quota.try_consume(day(1)));

        assert_eq!(quota.remaining(day(2)), 1);
        assert!(quota.try_consume(day(2)));
        assert_eq!(quota.day(), day(2));
    }

    #[test]
    fn test_restore_clamps_to_limit() {
        let quota = DailyQuota::restore(2, day(1), 7);
        assert_eq!(quota.used(day(1)), 2);
        assert_eq!(quota.remaining(day(1)), 0);
    }

    #[test]
    fn test_zero_limit_never_allows() {
        let mut quota = DailyQuota::new(0, day(1));
        assert!(!quota.try_consume(day(1)));
    }
}
