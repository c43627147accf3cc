//! Offline calibration trainer.
//!
//! Fits per-domain Platt parameters on the labeled train split, evaluates
//! them on the validation split, and promotes only the candidates that
//! clear every quality gate. Fitting is deterministic full-batch gradient
//! descent, so two runs over the same event log produce identical
//! parameters. A store-backed lease keeps concurrent runs out.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::error::TrainerError;
use crate::domain::models::{
    CalibratedScore, CalibrationParameters, Split, ThresholdConfig, TrainerConfig,
};
use crate::domain::ports::event_store::EventQuery;
use crate::domain::ports::{CalibrationStore, RoutingEventStore};
use crate::services::policy::DecisionPolicy;

const FIT_ITERATIONS: usize = 2000;
const FIT_LEARNING_RATE: f64 = 1.0;
/// Scale stays strictly positive so the fitted mapping is monotonic.
const MIN_SCALE: f64 = 1e-6;
const ECE_BUCKETS: usize = 10;

pub const REASON_PROMOTED: &str = "promoted";
pub const REASON_DRY_RUN: &str = "dry_run_pass";
pub const REASON_INSUFFICIENT_SAMPLES: &str = "insufficient_samples";
pub const REASON_NO_VALIDATION_SAMPLES: &str = "no_validation_samples";
pub const REASON_ACCURACY_BELOW_FLOOR: &str = "accuracy_below_floor";
pub const REASON_ECE_ABOVE_CEILING: &str = "ece_above_ceiling";
pub const REASON_LATENCY_OVER_BUDGET: &str = "latency_over_budget";

/// Per-domain fit and gate results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainFitReport {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub scale: f64,
    pub bias: f64,
    pub accuracy: f64,
    pub ece: f64,
    pub promoted: bool,
    /// Promoted version, when promotion happened.
    pub version: Option<i64>,
    pub reason: String,
}

/// Full result of one trainer run, persisted as JSON alongside the run row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub train_events: usize,
    pub validation_events: usize,
    /// p95 of simulated policy evaluations, shared across domains.
    pub p95_latency_ms: f64,
    pub domains: BTreeMap<String, DomainFitReport>,
}

impl TrainerReport {
    pub fn promoted_domains(&self) -> Vec<&str> {
        self.domains
            .iter()
            .filter(|(_, report)| report.promoted)
            .map(|(domain, _)| domain.as_str())
            .collect()
    }

    /// Domains that were fitted and evaluated but failed a quality gate.
    /// Skipped domains (too few samples, no validation data) do not count.
    pub fn gate_failures(&self) -> Vec<&str> {
        self.domains
            .iter()
            .filter(|(_, report)| {
                matches!(
                    report.reason.as_str(),
                    REASON_ACCURACY_BELOW_FLOOR
                        | REASON_ECE_ABOVE_CEILING
                        | REASON_LATENCY_OVER_BUDGET
                )
            })
            .map(|(domain, _)| domain.as_str())
            .collect()
    }
}

/// Offline trainer over the event log and calibration store.
pub struct Trainer {
    events: Arc<dyn RoutingEventStore>,
    calibrations: Arc<dyn CalibrationStore>,
    config: TrainerConfig,
    thresholds: ThresholdConfig,
}

impl Trainer {
    pub fn new(
        events: Arc<dyn RoutingEventStore>,
        calibrations: Arc<dyn CalibrationStore>,
        config: TrainerConfig,
        thresholds: ThresholdConfig,
    ) -> Self {
        Self {
            events,
            calibrations,
            config,
            thresholds,
        }
    }

    /// Run one training pass over the full event log. `dry_run` evaluates
    /// gates but never promotes.
    pub async fn run(&self, dry_run: bool) -> Result<TrainerReport, TrainerError> {
        self.run_window(dry_run, None, None).await
    }

    /// Run one training pass over events inside an optional time window.
    pub async fn run_window(
        &self,
        dry_run: bool,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<TrainerReport, TrainerError> {
        let holder = format!("helmsman-trainer-{}", Uuid::new_v4());
        let lease = Utc::now() + Duration::seconds(self.config.lock_lease_secs);

        if !self
            .calibrations
            .try_acquire_trainer_lock(&holder, lease)
            .await?
        {
            return Err(TrainerError::LockHeld);
        }

        let result = self.run_locked(dry_run, since, until).await;

        if let Err(err) = self.calibrations.release_trainer_lock(&holder).await {
            tracing::warn!(error = %err, "failed to release trainer lock, lease will expire");
        }

        result
    }

    async fn run_locked(
        &self,
        dry_run: bool,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<TrainerReport, TrainerError> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        tracing::info!(run_id = %run_id, dry_run, "trainer run started");

        let windowed = |mut query: EventQuery| {
            if let Some(since) = since {
                query = query.since(since);
            }
            if let Some(until) = until {
                query = query.until(until);
            }
            query
        };

        let train_events = self
            .events
            .query(windowed(EventQuery::new().split(Split::Train).labeled_only()))
            .await?;
        if train_events.is_empty() {
            return Err(TrainerError::NoTrainingData);
        }

        let validation_events = self
            .events
            .query(windowed(
                EventQuery::new().split(Split::Validation).labeled_only(),
            ))
            .await?;

        let train_pairs = pairs_by_domain(&train_events);
        let validation_pairs = pairs_by_domain(&validation_events);

        // Sorted domain set keeps the report and the promotion order stable.
        let domains: BTreeSet<&String> = train_pairs.keys().collect();

        let mut reports: BTreeMap<String, DomainFitReport> = BTreeMap::new();
        let mut candidates: Vec<(String, CalibrationParameters)> = Vec::new();

        for domain in domains {
            let pairs = &train_pairs[domain.as_str()];
            if pairs.len() < self.config.min_samples {
                reports.insert(
                    domain.to_string(),
                    DomainFitReport {
                        train_samples: pairs.len(),
                        validation_samples: 0,
                        scale: 0.0,
                        bias: 0.0,
                        accuracy: 0.0,
                        ece: 0.0,
                        promoted: false,
                        version: None,
                        reason: REASON_INSUFFICIENT_SAMPLES.to_string(),
                    },
                );
                continue;
            }

            let fit = fit_platt(pairs);
            let holdout = validation_pairs
                .get(domain.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let mut report = DomainFitReport {
                train_samples: pairs.len(),
                validation_samples: holdout.len(),
                scale: fit.scale,
                bias: fit.bias,
                accuracy: 0.0,
                ece: 0.0,
                promoted: false,
                version: None,
                reason: REASON_NO_VALIDATION_SAMPLES.to_string(),
            };

            if !holdout.is_empty() {
                let (accuracy, ece) = evaluate(fit.scale, fit.bias, holdout);
                report.accuracy = accuracy;
                report.ece = ece;
                report.reason = if accuracy < self.config.accuracy_floor {
                    REASON_ACCURACY_BELOW_FLOOR.to_string()
                } else if ece > self.config.ece_ceiling {
                    REASON_ECE_ABOVE_CEILING.to_string()
                } else {
                    // Provisionally passing; the latency gate applies below.
                    REASON_PROMOTED.to_string()
                };
            }

            if report.reason == REASON_PROMOTED {
                candidates.push((
                    domain.to_string(),
                    CalibrationParameters {
                        domain: domain.to_string(),
                        version: 0, // assigned at promotion
                        scale: fit.scale,
                        bias: fit.bias,
                        fitted_at: started_at,
                        accuracy: report.accuracy,
                        ece: report.ece,
                        promoted: true,
                    },
                ));
            }
            reports.insert(domain.to_string(), report);
        }

        // The latency gate measures the policy itself, with the candidate
        // domains as the score vector, and applies to every candidate.
        let p95_latency_ms = self.measure_policy_p95(&candidates);
        if p95_latency_ms > self.config.latency_budget_ms {
            for (domain, _) in candidates.drain(..) {
                if let Some(report) = reports.get_mut(&domain) {
                    report.reason = REASON_LATENCY_OVER_BUDGET.to_string();
                }
            }
        }

        for (domain, mut params) in candidates {
            let Some(report) = reports.get_mut(&domain) else {
                continue;
            };
            if dry_run {
                report.reason = REASON_DRY_RUN.to_string();
                continue;
            }

            let current_version = self
                .calibrations
                .get_active(&domain)
                .await?
                .map_or(0, |p| p.version);
            params.version = current_version + 1;
            self.calibrations.promote(&params).await?;

            report.promoted = true;
            report.version = Some(params.version);
            tracing::info!(
                domain = %domain,
                version = params.version,
                accuracy = report.accuracy,
                ece = report.ece,
                "calibration promoted"
            );
        }

        let finished_at = Utc::now();
        let report = TrainerReport {
            run_id: run_id.clone(),
            started_at,
            finished_at,
            dry_run,
            train_events: train_events.len(),
            validation_events: validation_events.len(),
            p95_latency_ms,
            domains: reports,
        };

        let promoted_any = !report.promoted_domains().is_empty();
        let outcome = if dry_run {
            "dry_run".to_string()
        } else if promoted_any {
            format!(
                "promoted {} of {} domains",
                report.promoted_domains().len(),
                report.domains.len()
            )
        } else {
            "rejected".to_string()
        };
        let report_json = serde_json::to_string(&report)
            .map_err(|e| crate::domain::error::StoreError::Serialization(e.to_string()))?;
        self.calibrations
            .record_trainer_run(
                &run_id,
                started_at,
                finished_at,
                promoted_any,
                &outcome,
                &report_json,
            )
            .await?;

        tracing::info!(run_id = %run_id, outcome = %outcome, "trainer run finished");
        Ok(report)
    }

    /// p95 wall time of repeated policy evaluations over the candidate
    /// score vector.
    fn measure_policy_p95(&self, candidates: &[(String, CalibrationParameters)]) -> f64 {
        let samples = self.config.latency_samples.max(1);

        let scores: Vec<CalibratedScore> = candidates
            .iter()
            .enumerate()
            .map(|(index, (domain, params))| CalibratedScore {
                domain: domain.clone(),
                raw: 0.5,
                probability: 0.9 - 0.05 * index as f64,
                calibrated: true,
                version: Some(params.version.max(1)),
            })
            .collect();

        let mut durations: Vec<std::time::Duration> = Vec::with_capacity(samples);
        for _ in 0..samples {
            let start = Instant::now();
            let _ = DecisionPolicy::decide(&scores, &self.thresholds);
            durations.push(start.elapsed());
        }
        durations.sort_unstable();
        let index = (samples * 95).div_ceil(100).saturating_sub(1);
        durations[index.min(samples - 1)].as_secs_f64() * 1000.0
    }
}

/// (raw score, was this domain correct) pairs per domain, from labeled
/// events. An event contributes a pair to every domain it scored.
fn pairs_by_domain(
    events: &[crate::domain::models::RoutingEvent],
) -> HashMap<String, Vec<(f64, bool)>> {
    let mut pairs: HashMap<String, Vec<(f64, bool)>> = HashMap::new();
    for event in events {
        for (domain, raw) in &event.raw_scores {
            if let Some(outcome) = event.outcome_for(domain) {
                pairs.entry(domain.clone()).or_default().push((*raw, outcome));
            }
        }
    }
    pairs
}

struct PlattFit {
    scale: f64,
    bias: f64,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Full-batch gradient descent on the logistic loss. Deterministic for a
/// given sample set; the scale is clamped positive every step so higher
/// raw scores always map to higher probabilities.
fn fit_platt(pairs: &[(f64, bool)]) -> PlattFit {
    let n = pairs.len() as f64;
    let mut scale = 1.0_f64;
    let mut bias = 0.0_f64;

    for _ in 0..FIT_ITERATIONS {
        let mut grad_scale = 0.0;
        let mut grad_bias = 0.0;
        for (raw, outcome) in pairs {
            let target = f64::from(u8::from(*outcome));
            let residual = sigmoid(scale * raw + bias) - target;
            grad_scale += residual * raw;
            grad_bias += residual;
        }
        scale -= FIT_LEARNING_RATE * grad_scale / n;
        bias -= FIT_LEARNING_RATE * grad_bias / n;
        scale = scale.max(MIN_SCALE);
    }

    PlattFit { scale, bias }
}

/// Thresholded accuracy (p >= 0.5) and expected calibration error over
/// equal-width probability buckets.
fn evaluate(scale: f64, bias: f64, pairs: &[(f64, bool)]) -> (f64, f64) {
    let n = pairs.len() as f64;
    let mut correct = 0usize;
    let mut bucket_count = [0usize; ECE_BUCKETS];
    let mut bucket_prob_sum = [0.0_f64; ECE_BUCKETS];
    let mut bucket_outcome_sum = [0.0_f64; ECE_BUCKETS];

    for (raw, outcome) in pairs {
        let probability = sigmoid(scale * raw + bias);
        let predicted = probability >= 0.5;
        if predicted == *outcome {
            correct += 1;
        }

        let bucket = ((probability * ECE_BUCKETS as f64) as usize).min(ECE_BUCKETS - 1);
        bucket_count[bucket] += 1;
        bucket_prob_sum[bucket] += probability;
        bucket_outcome_sum[bucket] += f64::from(u8::from(*outcome));
    }

    let accuracy = correct as f64 / n;
    let ece: f64 = (0..ECE_BUCKETS)
        .filter(|b| bucket_count[*b] > 0)
        .map(|b| {
            let count = bucket_count[b] as f64;
            let mean_prob = bucket_prob_sum[b] / count;
            let mean_outcome = bucket_outcome_sum[b] / count;
            count / n * (mean_prob - mean_outcome).abs()
        })
        .sum();

    (accuracy, ece)
}
