//! The route / clarify / fallback decision policy.
//!
//! A pure function of the calibrated scores and threshold configuration:
//! identical inputs always produce identical actions. Exact probability
//! ties are broken by the configured domain priority order, never by
//! iteration order or randomness.

use crate::domain::models::{Action, CalibratedScore, PolicyOutcome, ThresholdConfig};

pub const REASON_THRESHOLDS_MET: &str = "thresholds_met";
pub const REASON_BELOW_TAU: &str = "below_tau";
pub const REASON_MARGIN_TOO_SMALL: &str = "margin_too_small";
pub const REASON_CALIBRATION_UNAVAILABLE: &str = "calibration_unavailable";
pub const REASON_NO_CANDIDATES: &str = "no_candidates";

/// Decision policy over calibrated probabilities.
#[derive(Debug, Clone, Default)]
pub struct DecisionPolicy;

impl DecisionPolicy {
    /// Decide an action from the candidate domains' calibrated scores.
    pub fn decide(scores: &[CalibratedScore], thresholds: &ThresholdConfig) -> PolicyOutcome {
        let mut ranked: Vec<&CalibratedScore> = scores.iter().collect();
        // Descending by probability; ties by priority rank, then name so
        // the order is total even for unlisted domains.
        ranked.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| {
                    thresholds
                        .priority_rank(&a.domain)
                        .cmp(&thresholds.priority_rank(&b.domain))
                })
                .then_with(|| a.domain.cmp(&b.domain))
        });

        let Some(top) = ranked.first() else {
            return PolicyOutcome {
                action: Action::Fallback,
                domain: None,
                reason: REASON_NO_CANDIDATES,
            };
        };

        // Uncalibrated scores are not trustworthy enough to route on,
        // however high they are.
        if !top.calibrated {
            return PolicyOutcome {
                action: Action::Fallback,
                domain: None,
                reason: REASON_CALIBRATION_UNAVAILABLE,
            };
        }

        let second_probability = ranked.get(1).map_or(0.0, |s| s.probability);
        let domain_thresholds = thresholds.for_domain(&top.domain);

        if top.probability < domain_thresholds.tau {
            return PolicyOutcome {
                action: Action::Clarify,
                domain: None,
                reason: REASON_BELOW_TAU,
            };
        }

        if top.probability - second_probability < domain_thresholds.delta_top2 {
            return PolicyOutcome {
                action: Action::Clarify,
                domain: None,
                reason: REASON_MARGIN_TOO_SMALL,
            };
        }

        PolicyOutcome {
            action: Action::Route,
            domain: Some(top.domain.clone()),
            reason: REASON_THRESHOLDS_MET,
        }
    }
}
