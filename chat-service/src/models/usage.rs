//! Per-session usage accounting.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;

/// Counters kept for one session key.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    /// Successful chat completions since the last daily reset.
    pub message_count: u32,

    /// Admitted requests still waiting on the upstream. They count toward
    /// the daily limit until committed or released.
    pub pending: u32,

    /// Tokens consumed over the lifetime of the record.
    pub token_count: u64,

    /// When the last accepted request arrived.
    pub last_request: DateTime<Utc>,

    /// Calendar day (UTC) the counters belong to.
    pub reset_date: NaiveDate,

    /// Distinct source addresses seen for this key.
    pub addresses: HashSet<IpAddr>,
}

impl UsageRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            message_count: 0,
            pending: 0,
            token_count: 0,
            last_request: now,
            reset_date: now.date_naive(),
            addresses: HashSet::new(),
        }
    }

    /// Completed plus in-flight requests for the current day.
    pub fn used(&self) -> u32 {
        self.message_count.saturating_add(self.pending)
    }

    /// Zero the daily counter if it belongs to a day other than `today`.
    /// In-flight requests are left alone; they land on the new day.
    pub fn reset_if_stale(&mut self, today: NaiveDate) -> bool {
        if self.reset_date == today {
            return false;
        }
        self.message_count = 0;
        self.reset_date = today;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn reset_only_when_day_changed() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();
        let mut record = UsageRecord::new(now);
        record.message_count = 7;
        record.token_count = 900;

        assert!(!record.reset_if_stale(now.date_naive()));
        assert_eq!(record.message_count, 7);

        let tomorrow = (now + Duration::hours(2)).date_naive();
        assert!(record.reset_if_stale(tomorrow));
        assert_eq!(record.message_count, 0);
        assert_eq!(record.token_count, 900);
        assert_eq!(record.reset_date, tomorrow);
    }

    #[test]
    fn pending_counts_as_used_and_survives_reset() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();
        let mut record = UsageRecord::new(now);
        record.message_count = 2;
        record.pending = 1;
        assert_eq!(record.used(), 3);

        assert!(record.reset_if_stale((now + Duration::days(1)).date_naive()));
        assert_eq!(record.used(), 1);
    }
}
