//! The online decision path.
//!
//! One `decide` call fuses signals, calibrates against the cached
//! snapshot, applies the policy, assigns the experiment arm, and hands
//! the resulting event to the fire-and-forget logger. Nothing on the
//! decision path awaits storage: a due TTL refresh is kicked off in the
//! background and decisions keep reading the snapshot already in memory.
//! Callers populate the first snapshot with [`DecisionEngine::refresh_calibration`].

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{
    Config, Decision, RoutingEvent, SignalScores, ThresholdConfig,
};
use crate::domain::ports::CalibrationStore;
use crate::services::assignment::ConversationAssigner;
use crate::services::calibrator::{CalibrationCache, Calibrator};
use crate::services::event_logger::EventLogger;
use crate::services::fusion::SignalFusion;
use crate::services::metrics::{MetricsSnapshot, RouterMetrics};
use crate::services::policy::DecisionPolicy;

/// Orchestrates the full decision pipeline.
pub struct DecisionEngine {
    fusion: SignalFusion,
    calibrator: Calibrator,
    cache: Arc<CalibrationCache>,
    calibration_store: Arc<dyn CalibrationStore>,
    thresholds: RwLock<ThresholdConfig>,
    assigner: ConversationAssigner,
    logger: EventLogger,
    metrics: Arc<RouterMetrics>,
}

impl DecisionEngine {
    pub fn new(
        config: &Config,
        calibration_store: Arc<dyn CalibrationStore>,
        logger: EventLogger,
    ) -> Self {
        let metrics = Arc::new(RouterMetrics::new(logger.dropped_counter()));
        Self {
            fusion: SignalFusion::new(config.fusion),
            calibrator: Calibrator::new(config.calibration),
            cache: Arc::new(CalibrationCache::new(config.calibration)),
            calibration_store,
            thresholds: RwLock::new(config.thresholds.clone()),
            assigner: ConversationAssigner::new(config.experiment.clone()),
            logger,
            metrics,
        }
    }

    /// Decide how to route one utterance's signals.
    pub async fn decide(
        &self,
        conversation_id: &str,
        signals: &HashMap<String, SignalScores>,
    ) -> Decision {
        let started = Instant::now();
        let now = Utc::now();

        self.cache
            .spawn_refresh_if_due(Arc::clone(&self.calibration_store));
        let snapshot = self.cache.load().await;

        let raw_scores = self.fusion.fuse_all(signals);
        let calibrated = self.calibrator.calibrate_all(&snapshot, &raw_scores, now);

        let outcome = {
            let thresholds = self.thresholds.read().await;
            DecisionPolicy::decide(&calibrated, &thresholds)
        };
        let arm = self.assigner.assign_arm(conversation_id);

        let calibrated_probabilities: HashMap<String, f64> = calibrated
            .iter()
            .map(|s| (s.domain.clone(), s.probability))
            .collect();
        let calibration_versions: HashMap<String, i64> = calibrated
            .iter()
            .map(|s| (s.domain.clone(), s.version.unwrap_or(0)))
            .collect();

        let event = RoutingEvent {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            timestamp: now,
            raw_scores,
            calibrated_probabilities: calibrated_probabilities.clone(),
            calibration_versions: calibration_versions.clone(),
            action: outcome.action,
            routed_domain: outcome.domain.clone(),
            arm: arm.clone(),
            split: ConversationAssigner::assign_split(conversation_id),
            true_domain: None,
            labeled_at: None,
        };
        self.logger.log(event);

        self.metrics
            .record_decision(outcome.action, outcome.domain.as_deref(), outcome.reason);
        self.metrics.record_latency(started.elapsed());

        tracing::debug!(
            conversation_id,
            action = outcome.action.as_str(),
            domain = outcome.domain.as_deref().unwrap_or("-"),
            reason = outcome.reason,
            arm = %arm,
            "routing decision"
        );

        Decision {
            action: outcome.action,
            domain: outcome.domain,
            calibrated_probabilities,
            calibration_versions_used: calibration_versions,
            arm,
        }
    }

    /// Swap in new thresholds without restarting. In-flight decisions
    /// finish under the config they started with.
    pub async fn reload_thresholds(&self, thresholds: ThresholdConfig) {
        *self.thresholds.write().await = thresholds;
        tracing::info!("decision thresholds reloaded");
    }

    /// Force a calibration snapshot reload, bypassing the TTL.
    pub async fn refresh_calibration(&self) -> Result<(), crate::domain::error::StoreError> {
        self.cache.refresh(&*self.calibration_store).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::StoreError;
    use crate::domain::models::{Action, CalibrationParameters, DomainThresholds};
    use crate::domain::ports::event_store::{EventQuery, EventStoreStats};
    use crate::domain::ports::RoutingEventStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct MemoryCalibrationStore {
        active: Vec<CalibrationParameters>,
        /// When set, reads hang forever instead of answering.
        stalled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CalibrationStore for MemoryCalibrationStore {
        async fn get_active(
            &self,
            domain: &str,
        ) -> Result<Option<CalibrationParameters>, StoreError> {
            Ok(self.active.iter().find(|p| p.domain == domain).cloned())
        }

        async fn load_active(&self) -> Result<Vec<CalibrationParameters>, StoreError> {
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(self.active.clone())
        }

        async fn history(
            &self,
            _domain: &str,
            _limit: u32,
        ) -> Result<Vec<CalibrationParameters>, StoreError> {
            Ok(vec![])
        }

        async fn promote(&self, _params: &CalibrationParameters) -> Result<(), StoreError> {
            unimplemented!("not used in tests")
        }

        async fn try_acquire_trainer_lock(
            &self,
            _holder: &str,
            _expires_at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn release_trainer_lock(&self, _holder: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn record_trainer_run(
            &self,
            _run_id: &str,
            _started_at: DateTime<Utc>,
            _finished_at: DateTime<Utc>,
            _promoted: bool,
            _outcome: &str,
            _report_json: &str,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn latest_trainer_run(
            &self,
        ) -> Result<Option<(DateTime<Utc>, bool, String)>, StoreError> {
            Ok(None)
        }
    }

    struct MemoryEventStore {
        events: Mutex<Vec<RoutingEvent>>,
    }

    #[async_trait]
    impl RoutingEventStore for MemoryEventStore {
        async fn append(&self, event: &RoutingEvent) -> Result<(), StoreError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn query(&self, _query: EventQuery) -> Result<Vec<RoutingEvent>, StoreError> {
            Ok(self.events.lock().unwrap().clone())
        }

        async fn attach_label(&self, _id: Uuid, _domain: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn stats(&self) -> Result<EventStoreStats, StoreError> {
            unimplemented!("not used in tests")
        }
    }

    fn identity_params(domain: &str) -> CalibrationParameters {
        // Steep sigmoid centered at 0.5 keeps high scores high.
        CalibrationParameters {
            domain: domain.to_string(),
            version: 1,
            scale: 12.0,
            bias: -6.0,
            fitted_at: Utc::now(),
            accuracy: 0.9,
            ece: 0.02,
            promoted: true,
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.thresholds.default = DomainThresholds {
            tau: 0.7,
            delta_top2: 0.1,
        };
        config
    }

    fn build_engine(
        config: &Config,
        active: Vec<CalibrationParameters>,
    ) -> (DecisionEngine, Arc<MemoryEventStore>, Arc<AtomicBool>) {
        let event_store = Arc::new(MemoryEventStore {
            events: Mutex::new(vec![]),
        });
        let (logger, _handle) = EventLogger::spawn(event_store.clone(), config.event_logger);
        let stalled = Arc::new(AtomicBool::new(false));
        let engine = DecisionEngine::new(
            config,
            Arc::new(MemoryCalibrationStore {
                active,
                stalled: stalled.clone(),
            }),
            logger,
        );
        (engine, event_store, stalled)
    }

    /// Engine with the initial snapshot already loaded, as `main` does it.
    async fn engine_with(active: Vec<CalibrationParameters>) -> (DecisionEngine, Arc<MemoryEventStore>) {
        let (engine, event_store, _stalled) = build_engine(&test_config(), active);
        engine.refresh_calibration().await.unwrap();
        (engine, event_store)
    }

    #[tokio::test]
    async fn test_decide_routes_with_calibration() {
        let (engine, store) = engine_with(vec![
            identity_params("weather"),
            identity_params("music"),
        ])
        .await;

        let signals = HashMap::from([
            ("weather".to_string(), SignalScores::new(0.95, 0.9, 1.0)),
            ("music".to_string(), SignalScores::new(0.1, 0.1, 0.0)),
        ]);
        let decision = engine.decide("conv-0001", &signals).await;

        assert_eq!(decision.action, Action::Route);
        assert_eq!(decision.domain.as_deref(), Some("weather"));
        assert_eq!(decision.calibration_versions_used["weather"], 1);

        // Event is logged asynchronously; give the writer a beat.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = store.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].conversation_id, "conv-0001");
        assert_eq!(events[0].action, Action::Route);
    }

    #[tokio::test]
    async fn test_decide_falls_back_without_calibration() {
        let (engine, _store) = engine_with(vec![]).await;

        let signals = HashMap::from([(
            "weather".to_string(),
            SignalScores::new(0.99, 0.99, 1.0),
        )]);
        let decision = engine.decide("conv-0001", &signals).await;

        // High raw confidence is not enough without promoted parameters.
        assert_eq!(decision.action, Action::Fallback);
        assert!(decision.domain.is_none());
        assert_eq!(decision.calibration_versions_used["weather"], 0);
    }

    #[tokio::test]
    async fn test_repeated_decide_is_deterministic() {
        let (engine, _store) = engine_with(vec![
            identity_params("weather"),
            identity_params("music"),
        ])
        .await;
        let signals = HashMap::from([
            ("weather".to_string(), SignalScores::new(0.9, 0.8, 0.7)),
            ("music".to_string(), SignalScores::new(0.4, 0.3, 0.2)),
        ]);

        let first = engine.decide("conv-7", &signals).await;
        for _ in 0..5 {
            let next = engine.decide("conv-7", &signals).await;
            assert_eq!(next.action, first.action);
            assert_eq!(next.domain, first.domain);
            assert_eq!(next.arm, first.arm);
        }
    }

    #[tokio::test]
    async fn test_threshold_reload_changes_outcome() {
        let (engine, _store) = engine_with(vec![identity_params("weather")]).await;
        let signals = HashMap::from([(
            "weather".to_string(),
            SignalScores::new(0.8, 0.8, 0.8),
        )]);

        let before = engine.decide("conv-1", &signals).await;
        assert_eq!(before.action, Action::Route);

        let mut strict = ThresholdConfig::default();
        strict.default.tau = 0.999;
        engine.reload_thresholds(strict).await;

        let after = engine.decide("conv-1", &signals).await;
        assert_eq!(after.action, Action::Clarify);
    }

    #[tokio::test]
    async fn test_decide_serves_snapshot_while_store_is_unreachable() {
        let mut config = test_config();
        // Every decision finds the snapshot past its TTL.
        config.calibration.cache_ttl_secs = 0;
        let (engine, _store, stalled) =
            build_engine(&config, vec![identity_params("weather")]);
        engine.refresh_calibration().await.unwrap();

        // Any further store read hangs forever.
        stalled.store(true, Ordering::SeqCst);

        let signals = HashMap::from([(
            "weather".to_string(),
            SignalScores::new(0.95, 0.9, 1.0),
        )]);
        let decision = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            engine.decide("conv-0001", &signals),
        )
        .await
        .expect("decision must not wait on the calibration store");
        assert_eq!(decision.action, Action::Route);
    }

    #[tokio::test]
    async fn test_background_refresh_becomes_visible() {
        let mut config = test_config();
        config.calibration.cache_ttl_secs = 0;
        let (engine, _store, _stalled) =
            build_engine(&config, vec![identity_params("weather")]);

        let signals = HashMap::from([(
            "weather".to_string(),
            SignalScores::new(0.95, 0.9, 1.0),
        )]);

        // The snapshot starts empty and the first decision only triggers
        // the reload, so it falls back.
        let first = engine.decide("conv-1", &signals).await;
        assert_eq!(first.action, Action::Fallback);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let second = engine.decide("conv-1", &signals).await;
        assert_eq!(second.action, Action::Route);
    }

    #[tokio::test]
    async fn test_metrics_reflect_decisions() {
        let (engine, _store) = engine_with(vec![identity_params("weather")]).await;
        let signals = HashMap::from([(
            "weather".to_string(),
            SignalScores::new(0.95, 0.95, 0.95),
        )]);

        engine.decide("conv-1", &signals).await;
        engine.decide("conv-2", &signals).await;

        let snap = engine.metrics();
        assert_eq!(snap.route_count, 2);
        assert_eq!(snap.decision_count, 2);
        assert_eq!(snap.routes_by_domain["weather"], 2);
    }
}
