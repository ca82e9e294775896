/*
 * Telemetry: structured operation records, per-date usage counters, quota alerts, and the rate-limit event buffer.
 * I'm implementing a thread-safe collector that minimizes hot-path cost; counters are per-process and approximate between metric rollups.
 */

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-UTC-date usage counters
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UsageCounters {
    pub r2_writes: u64,
    pub r2_reads: u64,
    pub d1_queries: u64,
    pub d1_writes: u64,
    pub total_storage_bytes: u64,
    pub total_generations: u64,
    pub successful_generations: u64,
    pub failed_generations: u64,
}

/// Thresholds that trigger quota alerts at 80% usage
#[derive(Debug, Clone)]
pub struct QuotaThresholds {
    pub r2_writes: u64,
    pub r2_reads: u64,
    pub d1_queries: u64,
    pub storage_bytes: u64,
}

impl Default for QuotaThresholds {
    fn default() -> Self {
        Self {
            r2_writes: 100_000,
            r2_reads: 1_000_000,
            d1_queries: 500_000,
            storage_bytes: 10 * 1024 * 1024 * 1024,
        }
    }
}

const ALERT_THRESHOLD_RATIO: f64 = 0.8;
const ALERT_DEDUP_WINDOW_HOURS: i64 = 1;
const ALERT_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct QuotaAlert {
    pub resource: String,
    pub usage: u64,
    pub threshold: u64,
    pub fired_at: DateTime<Utc>,
}

/// One rate-limit decision worth keeping for operator queries
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitEvent {
    pub timestamp: DateTime<Utc>,
    pub identifier: String,
    pub user_id: Option<String>,
    pub tier: String,
    pub limit_exceeded: bool,
    pub request_count: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
}

const RATE_EVENT_BUFFER_CAP: usize = 10_000;

struct TelemetryInner {
    counters: RwLock<HashMap<NaiveDate, UsageCounters>>,
    unique_users: RwLock<HashMap<NaiveDate, HashSet<String>>>,
    alerts: RwLock<Vec<QuotaAlert>>,
    rate_events: RwLock<Vec<RateLimitEvent>>,
    thresholds: QuotaThresholds,
}

/// Telemetry collector shared across all handlers
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<TelemetryInner>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(QuotaThresholds::default())
    }
}

impl Telemetry {
    pub fn new(thresholds: QuotaThresholds) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                counters: RwLock::new(HashMap::new()),
                unique_users: RwLock::new(HashMap::new()),
                alerts: RwLock::new(Vec::new()),
                rate_events: RwLock::new(Vec::new()),
                thresholds,
            }),
        }
    }

    /// Emit the structured record every completed operation produces
    pub fn record_operation(
        &self,
        operation: &str,
        duration_ms: u64,
        outcome: &str,
        request_id: &str,
        metadata: Option<serde_json::Value>,
    ) {
        info!(
            operation = operation,
            duration_ms = duration_ms,
            outcome = outcome,
            request_id = %request_id,
            metadata = metadata.map(|m| m.to_string()).unwrap_or_default(),
            "operation completed"
        );
    }

    fn with_today<F: FnOnce(&mut UsageCounters)>(&self, f: F) {
        let today = Utc::now().date_naive();
        let mut counters = self.inner.counters.write();
        f(counters.entry(today).or_default());
    }

    pub fn track_blob_write(&self, bytes: u64) {
        self.with_today(|c| {
            c.r2_writes += 1;
            c.total_storage_bytes += bytes;
        });
    }

    pub fn track_blob_read(&self) {
        self.with_today(|c| c.r2_reads += 1);
    }

    pub fn track_store_query(&self) {
        self.with_today(|c| c.d1_queries += 1);
    }

    pub fn track_store_write(&self) {
        self.with_today(|c| c.d1_writes += 1);
    }

    /// Count one generation attempt and its outcome
    pub fn track_generation(&self, success: bool, user_id: Option<&str>) {
        self.with_today(|c| {
            c.total_generations += 1;
            if success {
                c.successful_generations += 1;
            } else {
                c.failed_generations += 1;
            }
        });

        if let Some(user_id) = user_id {
            let today = Utc::now().date_naive();
            self.inner
                .unique_users
                .write()
                .entry(today)
                .or_default()
                .insert(user_id.to_string());
        }
    }

    /// Snapshot of a date's counters
    pub fn counters_for(&self, date: NaiveDate) -> UsageCounters {
        self.inner
            .counters
            .read()
            .get(&date)
            .cloned()
            .unwrap_or_default()
    }

    pub fn unique_users_for(&self, date: NaiveDate) -> u64 {
        self.inner
            .unique_users
            .read()
            .get(&date)
            .map(|set| set.len() as u64)
            .unwrap_or(0)
    }

    /// Fire quota alerts for any resource at or past 80% of its threshold.
    /// An alert for the same resource within the last hour suppresses a new one.
    pub fn check_quotas(&self) -> Vec<QuotaAlert> {
        let today = Utc::now().date_naive();
        let counters = self.counters_for(today);
        let thresholds = &self.inner.thresholds;

        let usages = [
            ("r2_writes", counters.r2_writes, thresholds.r2_writes),
            ("r2_reads", counters.r2_reads, thresholds.r2_reads),
            ("d1_queries", counters.d1_queries, thresholds.d1_queries),
            (
                "storage_bytes",
                counters.total_storage_bytes,
                thresholds.storage_bytes,
            ),
        ];

        let now = Utc::now();
        let dedup_cutoff = now - Duration::hours(ALERT_DEDUP_WINDOW_HOURS);
        let mut fired = Vec::new();
        let mut alerts = self.inner.alerts.write();

        for (resource, usage, threshold) in usages {
            if threshold == 0 || (usage as f64) < (threshold as f64) * ALERT_THRESHOLD_RATIO {
                continue;
            }

            let recently_fired = alerts
                .iter()
                .any(|alert| alert.resource == resource && alert.fired_at >= dedup_cutoff);
            if recently_fired {
                continue;
            }

            let alert = QuotaAlert {
                resource: resource.to_string(),
                usage,
                threshold,
                fired_at: now,
            };
            warn!(
                resource = resource,
                usage = usage,
                threshold = threshold,
                "Quota alert: usage at or past 80% of threshold"
            );
            alerts.push(alert.clone());
            fired.push(alert);
        }

        fired
    }

    /// Janitor pass removing alerts older than 24 hours
    pub fn prune_alerts(&self) -> usize {
        let cutoff = Utc::now() - Duration::hours(ALERT_MAX_AGE_HOURS);
        let mut alerts = self.inner.alerts.write();
        let before = alerts.len();
        alerts.retain(|alert| alert.fired_at >= cutoff);
        before - alerts.len()
    }

    pub fn active_alerts(&self) -> Vec<QuotaAlert> {
        self.inner.alerts.read().clone()
    }

    /// Buffer a rate-limit decision for operator queries
    pub fn record_rate_limit_event(&self, event: RateLimitEvent) {
        let mut events = self.inner.rate_events.write();
        if events.len() >= RATE_EVENT_BUFFER_CAP {
            events.remove(0);
        }
        events.push(event);
    }

    pub fn rate_limit_events_for(&self, identifier: &str) -> Vec<RateLimitEvent> {
        self.inner
            .rate_events
            .read()
            .iter()
            .filter(|event| event.identifier == identifier)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_counters() {
        let telemetry = Telemetry::default();
        telemetry.track_generation(true, Some("user-1"));
        telemetry.track_generation(true, Some("user-1"));
        telemetry.track_generation(false, Some("user-2"));

        let today = Utc::now().date_naive();
        let counters = telemetry.counters_for(today);
        assert_eq!(counters.total_generations, 3);
        assert_eq!(counters.successful_generations, 2);
        assert_eq!(counters.failed_generations, 1);
        assert_eq!(telemetry.unique_users_for(today), 2);
    }

    #[test]
    fn test_quota_alert_fires_at_eighty_percent() {
        let telemetry = Telemetry::new(QuotaThresholds {
            r2_writes: 10,
            r2_reads: u64::MAX,
            d1_queries: u64::MAX,
            storage_bytes: u64::MAX,
        });

        for _ in 0..7 {
            telemetry.track_blob_write(1);
        }
        assert!(telemetry.check_quotas().is_empty());

        telemetry.track_blob_write(1);
        let fired = telemetry.check_quotas();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].resource, "r2_writes");
    }

    #[test]
    fn test_quota_alert_dedup_within_hour() {
        let telemetry = Telemetry::new(QuotaThresholds {
            r2_writes: 10,
            r2_reads: u64::MAX,
            d1_queries: u64::MAX,
            storage_bytes: u64::MAX,
        });

        for _ in 0..10 {
            telemetry.track_blob_write(1);
        }

        assert_eq!(telemetry.check_quotas().len(), 1);
        // The same resource alerting again inside the window is suppressed.
        assert!(telemetry.check_quotas().is_empty());
        assert_eq!(telemetry.active_alerts().len(), 1);
    }

    #[test]
    fn test_rate_event_buffer_queryable_by_identifier() {
        let telemetry = Telemetry::default();
        let event = RateLimitEvent {
            timestamp: Utc::now(),
            identifier: "192.168.1.1".to_string(),
            user_id: None,
            tier: "anonymous".to_string(),
            limit_exceeded: true,
            request_count: 6,
            limit: 5,
            reset_at: Utc::now() + Duration::hours(1),
        };
        telemetry.record_rate_limit_event(event);

        assert_eq!(telemetry.rate_limit_events_for("192.168.1.1").len(), 1);
        assert!(telemetry.rate_limit_events_for("10.0.0.1").is_empty());
    }

    #[test]
    fn test_prune_keeps_recent_alerts() {
        let telemetry = Telemetry::new(QuotaThresholds {
            r2_writes: 1,
            r2_reads: u64::MAX,
            d1_queries: u64::MAX,
            storage_bytes: u64::MAX,
        });
        telemetry.track_blob_write(1);
        telemetry.check_quotas();

        assert_eq!(telemetry.prune_alerts(), 0);
        assert_eq!(telemetry.active_alerts().len(), 1);
    }
}
