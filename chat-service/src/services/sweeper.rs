//! Periodic background maintenance.
//!
//! Once per interval: zero usage counters left over from a previous day,
//! evict sessions and usage records idle longer than the TTL, and prune
//! limiter state for keys that have gone quiet.

use crate::services::metrics;
use crate::services::relay::ChatRelay;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What one sweep pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub counters_reset: usize,
    pub sessions_evicted: usize,
    pub usage_evicted: usize,
    pub limiter_keys_pruned: usize,
}

pub struct Sweeper {
    relay: Arc<ChatRelay>,
    interval: Duration,
    idle_ttl: chrono::Duration,
}

impl Sweeper {
    pub fn new(
        relay: Arc<ChatRelay>,
        interval: Duration,
        idle_ttl: Duration,
    ) -> Self {
        let idle_ttl = chrono::Duration::from_std(idle_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            relay,
            interval: interval.max(Duration::from_secs(1)),
            idle_ttl,
        }
    }

    /// Run a single pass as of `now`.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = now
            .checked_sub_signed(self.idle_ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let report = SweepReport {
            counters_reset: self.relay.usage().reset_stale(now.date_naive()),
            sessions_evicted: self.relay.sessions().evict_idle(cutoff),
            usage_evicted: self.relay.usage().evict_idle(cutoff),
            limiter_keys_pruned: self.relay.api_limiter().prune(Instant::now())
                + self.relay.chat_limiter().prune(Instant::now()),
        };

        metrics::record_sweep(&report);
        tracing::info!(
            counters_reset = report.counters_reset,
            sessions_evicted = report.sessions_evicted,
            usage_evicted = report.usage_evicted,
            limiter_keys_pruned = report.limiter_keys_pruned,
            live_sessions = self.relay.sessions().len(),
            "Sweep completed"
        );

        report
    }

    /// Sweep on every tick until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so a fresh process
        // does not sweep before serving anything.
        ticker.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "Sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now());
                }
            }
        }
    }
}
