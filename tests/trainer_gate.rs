//! Trainer promotion gates and atomicity, exercised through the SQLite
//! repositories.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use helmsman::adapters::sqlite::{
    create_test_pool, run_test_migrations, SqliteCalibrationRepository,
    SqliteRoutingEventRepository,
};
use helmsman::domain::models::{
    Action, RoutingEvent, Split, ThresholdConfig, TrainerConfig,
};
use helmsman::domain::ports::{CalibrationStore, RoutingEventStore};
use helmsman::services::Trainer;

async fn setup() -> (
    Arc<SqliteRoutingEventRepository>,
    Arc<SqliteCalibrationRepository>,
    Trainer,
) {
    let pool = create_test_pool().await.unwrap();
    run_test_migrations(&pool).await.unwrap();
    let events = Arc::new(SqliteRoutingEventRepository::new(pool.clone()));
    let calibrations = Arc::new(SqliteCalibrationRepository::new(pool));
    let trainer = Trainer::new(
        events.clone(),
        calibrations.clone(),
        TrainerConfig {
            min_samples: 20,
            latency_samples: 50,
            ..TrainerConfig::default()
        },
        ThresholdConfig::default(),
    );
    (events, calibrations, trainer)
}

fn labeled_event(
    index: usize,
    split: Split,
    domain: &str,
    raw: f64,
    true_domain: &str,
) -> RoutingEvent {
    let now = Utc::now();
    RoutingEvent {
        id: Uuid::new_v4(),
        conversation_id: format!("conv-{}-{index}", split.as_str()),
        timestamp: now,
        raw_scores: HashMap::from([(domain.to_string(), raw)]),
        calibrated_probabilities: HashMap::from([(domain.to_string(), raw)]),
        calibration_versions: HashMap::from([(domain.to_string(), 0)]),
        action: Action::Clarify,
        routed_domain: None,
        arm: "control".to_string(),
        split,
        true_domain: Some(true_domain.to_string()),
        labeled_at: Some(now),
    }
}

async fn seed(
    events: &SqliteRoutingEventRepository,
    domain: &str,
    split: Split,
    inverted: bool,
) {
    for i in 0..30 {
        let jitter = (i % 10) as f64 * 0.01;
        let (high_label, low_label) = if inverted {
            ("other", domain)
        } else {
            (domain, "other")
        };
        events
            .append(&labeled_event(i, split, domain, 0.85 + jitter, high_label))
            .await
            .unwrap();
        events
            .append(&labeled_event(
                i + 100,
                split,
                domain,
                0.05 + jitter,
                low_label,
            ))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn low_accuracy_candidate_is_rejected_and_previous_stays_active() {
    let (events, calibrations, trainer) = setup().await;

    // First run on clean data promotes version 1.
    seed(&events, "weather", Split::Train, false).await;
    seed(&events, "weather", Split::Validation, false).await;
    let report = trainer.run(false).await.unwrap();
    assert!(report.domains["weather"].promoted);

    let before = calibrations.get_active("weather").await.unwrap().unwrap();
    assert_eq!(before.version, 1);

    // Poisoned labels make the next candidate fail the accuracy gate.
    seed(&events, "weather", Split::Train, true).await;
    seed(&events, "weather", Split::Validation, true).await;
    let report = trainer.run(false).await.unwrap();
    assert!(!report.domains["weather"].promoted);

    let after = calibrations.get_active("weather").await.unwrap().unwrap();
    assert_eq!(after.version, 1);
    assert!((after.scale - before.scale).abs() < f64::EPSILON);
}

#[tokio::test]
async fn promotion_leaves_exactly_one_promoted_row() {
    let (events, calibrations, trainer) = setup().await;
    seed(&events, "weather", Split::Train, false).await;
    seed(&events, "weather", Split::Validation, false).await;

    // Several sequential runs accumulate history, never concurrent
    // promoted rows.
    for expected_version in 1..=3 {
        let report = trainer.run(false).await.unwrap();
        assert_eq!(
            report.domains["weather"].version,
            Some(expected_version)
        );
    }

    let history = calibrations.history("weather", 10).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|p| p.promoted).count(), 1);
    assert_eq!(history[0].version, 3);
    assert!(history[0].promoted);
}

#[tokio::test]
async fn validation_only_domains_are_not_fitted() {
    let (events, calibrations, trainer) = setup().await;
    seed(&events, "weather", Split::Train, false).await;
    seed(&events, "weather", Split::Validation, false).await;
    // music appears only in the validation split.
    seed(&events, "music", Split::Validation, false).await;

    let report = trainer.run(false).await.unwrap();
    assert!(report.domains["weather"].promoted);
    assert!(!report.domains.contains_key("music"));
    assert!(calibrations.get_active("music").await.unwrap().is_none());
}

#[tokio::test]
async fn test_split_events_are_never_used_for_training() {
    let (events, calibrations, trainer) = setup().await;
    // Plenty of labeled data, but all of it in the held-out test split.
    seed(&events, "weather", Split::Test, false).await;

    let result = trainer.run(false).await;
    assert!(result.is_err(), "test-split data must not train");
    assert!(calibrations.get_active("weather").await.unwrap().is_none());
}
