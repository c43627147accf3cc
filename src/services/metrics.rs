//! In-process counters and latency histogram for the decision path.
//!
//! Lock-free on the hot path: counters are atomics and the latency
//! histogram uses fixed bucket bounds, so recording a decision is a
//! handful of relaxed atomic increments. Snapshots are taken on demand
//! and serialized for the CLI.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::RwLock;

use crate::domain::models::Action;

/// Upper bounds of the latency buckets, in milliseconds. The final
/// implicit bucket is unbounded.
const LATENCY_BUCKET_BOUNDS_MS: [f64; 12] = [
    0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0,
];

#[derive(Default)]
struct ActionCounters {
    route: AtomicU64,
    clarify: AtomicU64,
    fallback: AtomicU64,
}

/// Shared metrics registry for the routing engine.
pub struct RouterMetrics {
    totals: ActionCounters,
    per_domain_routes: RwLock<HashMap<String, Arc<AtomicU64>>>,
    calibration_unavailable: AtomicU64,
    events_dropped: Arc<AtomicU64>,
    latency_buckets: [AtomicU64; LATENCY_BUCKET_BOUNDS_MS.len() + 1],
    latency_count: AtomicU64,
    latency_sum_micros: AtomicU64,
}

impl RouterMetrics {
    /// `events_dropped` is shared with the event logger so its drops and
    /// the engine's metrics report the same number.
    pub fn new(events_dropped: Arc<AtomicU64>) -> Self {
        Self {
            totals: ActionCounters::default(),
            per_domain_routes: RwLock::new(HashMap::new()),
            calibration_unavailable: AtomicU64::new(0),
            events_dropped,
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_count: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
        }
    }

    pub fn record_decision(&self, action: Action, routed_domain: Option<&str>, reason: &str) {
        match action {
            Action::Route => {
                self.totals.route.fetch_add(1, Ordering::Relaxed);
                if let Some(domain) = routed_domain {
                    self.domain_counter(domain).fetch_add(1, Ordering::Relaxed);
                }
            }
            Action::Clarify => {
                self.totals.clarify.fetch_add(1, Ordering::Relaxed);
            }
            Action::Fallback => {
                self.totals.fallback.fetch_add(1, Ordering::Relaxed);
            }
        }

        if reason == crate::services::policy::REASON_CALIBRATION_UNAVAILABLE {
            self.calibration_unavailable.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_latency(&self, elapsed: std::time::Duration) {
        let millis = elapsed.as_secs_f64() * 1000.0;
        let index = LATENCY_BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| millis <= *bound)
            .unwrap_or(LATENCY_BUCKET_BOUNDS_MS.len());
        self.latency_buckets[index].fetch_add(1, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_micros
            .fetch_add(elapsed.as_micros().min(u128::from(u64::MAX)) as u64, Ordering::Relaxed);
    }

    fn domain_counter(&self, domain: &str) -> Arc<AtomicU64> {
        if let Some(counter) = self.per_domain_routes.read().unwrap().get(domain) {
            return counter.clone();
        }
        self.per_domain_routes
            .write()
            .unwrap()
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// Point-in-time view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let buckets: Vec<u64> = self
            .latency_buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        let count = self.latency_count.load(Ordering::Relaxed);

        let routes_by_domain = self
            .per_domain_routes
            .read()
            .unwrap()
            .iter()
            .map(|(domain, counter)| (domain.clone(), counter.load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            route_count: self.totals.route.load(Ordering::Relaxed),
            clarify_count: self.totals.clarify.load(Ordering::Relaxed),
            fallback_count: self.totals.fallback.load(Ordering::Relaxed),
            routes_by_domain,
            calibration_unavailable_count: self.calibration_unavailable.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            decision_count: count,
            mean_latency_ms: if count == 0 {
                0.0
            } else {
                self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1000.0 / count as f64
            },
            p50_latency_ms: percentile_from_buckets(&buckets, count, 0.50),
            p95_latency_ms: percentile_from_buckets(&buckets, count, 0.95),
            p99_latency_ms: percentile_from_buckets(&buckets, count, 0.99),
        }
    }
}

/// Bucket-resolution percentile: the upper bound of the bucket containing
/// the target rank. Buckets line up with [`LATENCY_BUCKET_BOUNDS_MS`].
fn percentile_from_buckets(buckets: &[u64], count: u64, quantile: f64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    let target = (count as f64 * quantile).ceil() as u64;
    let mut cumulative = 0u64;
    for (index, bucket) in buckets.iter().enumerate() {
        cumulative += bucket;
        if cumulative >= target {
            return LATENCY_BUCKET_BOUNDS_MS
                .get(index)
                .copied()
                .unwrap_or(f64::INFINITY);
        }
    }
    f64::INFINITY
}

/// Serializable counters for the `metrics` CLI command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub route_count: u64,
    pub clarify_count: u64,
    pub fallback_count: u64,
    pub routes_by_domain: HashMap<String, u64>,
    pub calibration_unavailable_count: u64,
    pub events_dropped: u64,
    pub decision_count: u64,
    pub mean_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::policy::{REASON_CALIBRATION_UNAVAILABLE, REASON_THRESHOLDS_MET};
    use std::time::Duration;

    fn metrics() -> RouterMetrics {
        RouterMetrics::new(Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn test_action_counters() {
        let m = metrics();
        m.record_decision(Action::Route, Some("weather"), REASON_THRESHOLDS_MET);
        m.record_decision(Action::Route, Some("weather"), REASON_THRESHOLDS_MET);
        m.record_decision(Action::Route, Some("music"), REASON_THRESHOLDS_MET);
        m.record_decision(Action::Clarify, None, "below_tau");
        m.record_decision(Action::Fallback, None, REASON_CALIBRATION_UNAVAILABLE);

        let snap = m.snapshot();
        assert_eq!(snap.route_count, 3);
        assert_eq!(snap.clarify_count, 1);
        assert_eq!(snap.fallback_count, 1);
        assert_eq!(snap.routes_by_domain["weather"], 2);
        assert_eq!(snap.routes_by_domain["music"], 1);
        assert_eq!(snap.calibration_unavailable_count, 1);
    }

    #[test]
    fn test_latency_percentiles() {
        let m = metrics();
        // 90 fast decisions, 10 slow ones.
        for _ in 0..90 {
            m.record_latency(Duration::from_micros(300));
        }
        for _ in 0..10 {
            m.record_latency(Duration::from_millis(40));
        }

        let snap = m.snapshot();
        assert_eq!(snap.decision_count, 100);
        assert!((snap.p50_latency_ms - 0.5).abs() < f64::EPSILON);
        assert!((snap.p95_latency_ms - 50.0).abs() < f64::EPSILON);
        assert!((snap.p99_latency_ms - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = metrics().snapshot();
        assert_eq!(snap.decision_count, 0);
        assert!((snap.p50_latency_ms - 0.0).abs() < f64::EPSILON);
        assert!((snap.mean_latency_ms - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dropped_counter_is_shared() {
        let dropped = Arc::new(AtomicU64::new(0));
        let m = RouterMetrics::new(dropped.clone());
        dropped.fetch_add(5, Ordering::Relaxed);
        assert_eq!(m.snapshot().events_dropped, 5);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&metrics().snapshot()).unwrap();
        assert!(json.contains("route_count"));
    }
}
