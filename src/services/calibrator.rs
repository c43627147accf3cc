//! Score calibration against the promoted per-domain parameters.
//!
//! The calibrator reads from an immutable in-memory snapshot of promoted
//! parameters. Missing or stale calibration is a normal state, not an
//! error: the raw score passes through clipped to [0,1] and is tagged
//! uncalibrated so the policy can refuse to route on it.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

use crate::domain::models::{CalibratedScore, CalibrationConfig, CalibrationParameters};
use crate::domain::ports::CalibrationStore;

/// Immutable view of the promoted parameters, shared by concurrent readers.
#[derive(Debug, Default, Clone)]
pub struct CalibrationSnapshot {
    params: HashMap<String, CalibrationParameters>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl CalibrationSnapshot {
    pub fn from_records(records: Vec<CalibrationParameters>, loaded_at: DateTime<Utc>) -> Self {
        Self {
            params: records.into_iter().map(|p| (p.domain.clone(), p)).collect(),
            loaded_at: Some(loaded_at),
        }
    }

    pub fn get(&self, domain: &str) -> Option<&CalibrationParameters> {
        self.params.get(domain)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Maps raw scores to calibrated probabilities using a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Calibrator {
    staleness: Duration,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            staleness: Duration::hours(config.staleness_hours),
        }
    }

    /// Calibrate one domain's raw score. Never fails: absent or stale
    /// parameters produce an uncalibrated pass-through.
    pub fn calibrate(
        &self,
        snapshot: &CalibrationSnapshot,
        domain: &str,
        raw: f64,
        now: DateTime<Utc>,
    ) -> CalibratedScore {
        match snapshot.get(domain) {
            Some(params) if !params.is_stale(now, self.staleness) => CalibratedScore {
                domain: domain.to_string(),
                raw,
                probability: params.apply(raw),
                calibrated: true,
                version: Some(params.version),
            },
            _ => CalibratedScore {
                domain: domain.to_string(),
                raw,
                probability: raw.clamp(0.0, 1.0),
                calibrated: false,
                version: None,
            },
        }
    }

    /// Calibrate every fused score.
    pub fn calibrate_all(
        &self,
        snapshot: &CalibrationSnapshot,
        raw_scores: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Vec<CalibratedScore> {
        raw_scores
            .iter()
            .map(|(domain, raw)| self.calibrate(snapshot, domain, *raw, now))
            .collect()
    }
}

/// Copy-on-write snapshot cache over a [`CalibrationStore`].
///
/// Readers clone an `Arc` under a briefly-held read lock and then work on
/// the immutable snapshot; a refresh builds the new snapshot off-lock and
/// swaps the pointer. The refresh mutex's `try_lock` keeps concurrent
/// callers from stampeding the store: losers keep serving the old snapshot.
pub struct CalibrationCache {
    snapshot: RwLock<Arc<CalibrationSnapshot>>,
    refresh_guard: Mutex<()>,
    refreshed_at: RwLock<Option<Instant>>,
    ttl: std::time::Duration,
}

impl CalibrationCache {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(CalibrationSnapshot::default())),
            refresh_guard: Mutex::new(()),
            refreshed_at: RwLock::new(None),
            ttl: std::time::Duration::from_secs(config.cache_ttl_secs),
        }
    }

    /// Current snapshot; never blocks on a refresh in progress.
    pub async fn load(&self) -> Arc<CalibrationSnapshot> {
        self.snapshot.read().await.clone()
    }

    pub async fn is_fresh(&self) -> bool {
        self.refreshed_at
            .read()
            .await
            .is_some_and(|at| at.elapsed() < self.ttl)
    }

    /// Kick off a background reload when the TTL has expired. The caller
    /// never waits on the store: it keeps reading the snapshot already in
    /// memory, and the reloaded one becomes visible to later loads.
    pub fn spawn_refresh_if_due(self: &Arc<Self>, store: Arc<dyn CalibrationStore>) {
        let fresh = self
            .refreshed_at
            .try_read()
            .map(|at| at.is_some_and(|at| at.elapsed() < self.ttl))
            // Write-locked means a refresh is completing right now.
            .unwrap_or(true);
        if fresh {
            return;
        }
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.refresh_if_due(&*store).await;
        });
    }

    /// Reload from the store if the TTL has expired. A refresh already in
    /// flight makes this a no-op for the caller.
    pub async fn refresh_if_due<S: CalibrationStore + ?Sized>(&self, store: &S) {
        if self.is_fresh().await {
            return;
        }
        let Ok(_guard) = self.refresh_guard.try_lock() else {
            return;
        };

        match store.load_active().await {
            Ok(records) => {
                let next = Arc::new(CalibrationSnapshot::from_records(records, Utc::now()));
                *self.snapshot.write().await = next;
                *self.refreshed_at.write().await = Some(Instant::now());
            }
            Err(err) => {
                // Keep serving the previous snapshot; staleness degrades to
                // uncalibrated scores rather than failed decisions.
                tracing::warn!(error = %err, "calibration snapshot refresh failed");
            }
        }
    }

    /// Unconditional reload, used at startup and after promotions.
    pub async fn refresh<S: CalibrationStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<(), crate::domain::error::StoreError> {
        let records = store.load_active().await?;
        let next = Arc::new(CalibrationSnapshot::from_records(records, Utc::now()));
        *self.snapshot.write().await = next;
        *self.refreshed_at.write().await = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(domain: &str, fitted_at: DateTime<Utc>) -> CalibrationParameters {
        CalibrationParameters {
            domain: domain.to_string(),
            version: 3,
            scale: 4.0,
            bias: -2.0,
            fitted_at,
            accuracy: 0.9,
            ece: 0.02,
            promoted: true,
        }
    }

    fn calibrator() -> Calibrator {
        Calibrator::new(CalibrationConfig {
            staleness_hours: 168,
            cache_ttl_secs: 30,
        })
    }

    #[test]
    fn test_fresh_parameters_apply_mapping() {
        let now = Utc::now();
        let snapshot = CalibrationSnapshot::from_records(vec![params("weather", now)], now);

        let score = calibrator().calibrate(&snapshot, "weather", 0.5, now);
        assert!(score.calibrated);
        assert_eq!(score.version, Some(3));
        // sigmoid(4*0.5 - 2) = sigmoid(0) = 0.5
        assert!((score.probability - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_missing_parameters_pass_through() {
        let now = Utc::now();
        let snapshot = CalibrationSnapshot::default();

        let score = calibrator().calibrate(&snapshot, "weather", 1.3, now);
        assert!(!score.calibrated);
        assert_eq!(score.version, None);
        assert!((score.probability - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stale_parameters_pass_through() {
        let now = Utc::now();
        let old = now - Duration::hours(200);
        let snapshot = CalibrationSnapshot::from_records(vec![params("weather", old)], now);

        let score = calibrator().calibrate(&snapshot, "weather", 0.8, now);
        assert!(!score.calibrated);
        assert!((score.probability - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_calibrate_all_mixed_domains() {
        let now = Utc::now();
        let snapshot = CalibrationSnapshot::from_records(vec![params("weather", now)], now);
        let raw = HashMap::from([("weather".to_string(), 0.5), ("music".to_string(), 0.5)]);

        let scores = calibrator().calibrate_all(&snapshot, &raw, now);
        let weather = scores.iter().find(|s| s.domain == "weather").unwrap();
        let music = scores.iter().find(|s| s.domain == "music").unwrap();
        assert!(weather.calibrated);
        assert!(!music.calibrated);
    }
}
