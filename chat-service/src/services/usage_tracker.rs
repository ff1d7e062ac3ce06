//! Daily message quotas and token accounting per session key.

use crate::models::UsageRecord;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::net::IpAddr;

/// Returned when a key has used up its daily allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub limit: u32,
    pub used: u32,
}

/// Usage counters, one [`UsageRecord`] per key.
///
/// Every mutation goes through the map entry, so the sweep and concurrent
/// requests for the same key are serialized on the shard lock.
#[derive(Debug)]
pub struct UsageTracker {
    records: DashMap<String, UsageRecord>,
    daily_limit: u32,
}

impl UsageTracker {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            records: DashMap::new(),
            daily_limit,
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Admit a request for `key` by reserving one slot of its daily quota.
    ///
    /// The check and the reservation happen under the same entry lock, so
    /// concurrent requests for one key cannot overshoot the limit. Admission
    /// also stamps the request time and remembers the source address.
    pub fn reserve(
        &self,
        key: &str,
        addr: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Result<QuotaReservation<'_>, QuotaExceeded> {
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| UsageRecord::new(now));

        let used = record.used();
        if used >= self.daily_limit {
            return Err(QuotaExceeded {
                limit: self.daily_limit,
                used,
            });
        }

        record.pending += 1;
        record.last_request = now;
        if let Some(addr) = addr {
            record.addresses.insert(addr);
        }

        Ok(QuotaReservation {
            tracker: self,
            key: key.to_string(),
            committed: false,
        })
    }

    fn commit(&self, key: &str, tokens: u64, now: DateTime<Utc>) {
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| UsageRecord::new(now));
        record.pending = record.pending.saturating_sub(1);
        record.message_count = record.message_count.saturating_add(1);
        record.token_count = record.token_count.saturating_add(tokens);
        record.last_request = now;
    }

    fn release(&self, key: &str) {
        if let Some(mut record) = self.records.get_mut(key) {
            record.pending = record.pending.saturating_sub(1);
        }
    }

    /// Zero the counters of every record not stamped with `today`.
    pub fn reset_stale(&self, today: NaiveDate) -> usize {
        self.records
            .iter_mut()
            .filter_map(|mut entry| entry.value_mut().reset_if_stale(today).then_some(()))
            .count()
    }

    /// Forget keys with no request since `cutoff`.
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| record.pending > 0 || record.last_request >= cutoff);
        before.saturating_sub(self.records.len())
    }

    pub fn snapshot(&self, key: &str) -> Option<UsageRecord> {
        self.records.get(key).map(|record| record.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One admitted request's claim on a daily quota slot.
///
/// [`commit`](Self::commit) turns it into a counted message. Dropping it
/// uncommitted (upstream failure, cancelled request) gives the slot back.
#[must_use]
pub struct QuotaReservation<'a> {
    tracker: &'a UsageTracker,
    key: String,
    committed: bool,
}

impl QuotaReservation<'_> {
    /// Count the completed message and the tokens it consumed.
    pub fn commit(mut self, tokens: u64, now: DateTime<Utc>) {
        self.tracker.commit(&self.key, tokens, now);
        self.committed = true;
    }
}

impl Drop for QuotaReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.tracker.release(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn rejects_once_quota_reached() {
        let tracker = UsageTracker::new(2);
        let now = noon();

        for _ in 0..2 {
            tracker.reserve("s1", None, now).unwrap().commit(10, now);
        }

        assert_eq!(
            tracker.reserve("s1", None, now).err(),
            Some(QuotaExceeded { limit: 2, used: 2 })
        );
        assert!(tracker.reserve("s2", None, now).is_ok());
    }

    #[test]
    fn outstanding_reservations_count_toward_limit() {
        let tracker = UsageTracker::new(2);
        let now = noon();

        let first = tracker.reserve("s1", None, now).unwrap();
        let _second = tracker.reserve("s1", None, now).unwrap();
        assert_eq!(
            tracker.reserve("s1", None, now).err(),
            Some(QuotaExceeded { limit: 2, used: 2 })
        );

        first.commit(3, now);
        let record = tracker.snapshot("s1").unwrap();
        assert_eq!(record.message_count, 1);
        assert_eq!(record.pending, 1);
        assert!(tracker.reserve("s1", None, now).is_err());
    }

    #[test]
    fn dropped_reservation_frees_the_slot() {
        let tracker = UsageTracker::new(1);
        let now = noon();

        drop(tracker.reserve("s1", None, now).unwrap());

        let record = tracker.snapshot("s1").unwrap();
        assert_eq!(record.pending, 0);
        assert_eq!(record.message_count, 0);
        assert!(tracker.reserve("s1", None, now).is_ok());
    }

    #[test]
    fn sweep_after_rollover_restores_quota() {
        let tracker = UsageTracker::new(1);
        let now = noon();
        tracker.reserve("s1", None, now).unwrap().commit(5, now);
        assert!(tracker.reserve("s1", None, now).is_err());

        // Same day: nothing to reset.
        assert_eq!(tracker.reset_stale(now.date_naive()), 0);
        assert!(tracker.reserve("s1", None, now).is_err());

        let tomorrow = now + Duration::days(1);
        assert_eq!(tracker.reset_stale(tomorrow.date_naive()), 1);
        assert!(tracker.reserve("s1", None, tomorrow).is_ok());
        assert_eq!(tracker.snapshot("s1").unwrap().token_count, 5);
    }

    #[test]
    fn tracks_tokens_and_addresses() {
        let tracker = UsageTracker::new(10);
        let now = noon();
        let a: IpAddr = "192.0.2.1".parse().unwrap();
        let b: IpAddr = "192.0.2.2".parse().unwrap();

        tracker.reserve("s1", Some(a), now).unwrap().commit(30, now);
        drop(tracker.reserve("s1", Some(b), now).unwrap());
        tracker.reserve("s1", Some(a), now).unwrap().commit(12, now);

        let record = tracker.snapshot("s1").unwrap();
        assert_eq!(record.message_count, 2);
        assert_eq!(record.token_count, 42);
        assert_eq!(record.addresses.len(), 2);
    }

    #[test]
    fn evicts_idle_records_without_in_flight_requests() {
        let tracker = UsageTracker::new(10);
        let now = noon();
        let old = now - Duration::days(3);
        drop(tracker.reserve("old", None, old).unwrap());
        let _busy = tracker.reserve("busy", None, old).unwrap();
        drop(tracker.reserve("fresh", None, now).unwrap());

        assert_eq!(tracker.evict_idle(now - Duration::days(1)), 1);
        assert!(tracker.snapshot("old").is_none());
        assert!(tracker.snapshot("busy").is_some());
        assert!(tracker.snapshot("fresh").is_some());
    }
}
