//! Online decision types: signal inputs, calibrated scores, and the
//! decision returned to the conversational dispatcher.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw confidence signals for one candidate domain.
///
/// Each score is in [0,1]. `None` means the producer abstained for this
/// utterance (for example the rule engine matched nothing); fusion
/// renormalizes the remaining weights for that call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SignalScores {
    /// Embedding-similarity score.
    #[serde(default)]
    pub embedding: Option<f64>,
    /// Classifier probability.
    #[serde(default)]
    pub classifier: Option<f64>,
    /// Rule-engine vote.
    #[serde(default)]
    pub rule: Option<f64>,
}

impl SignalScores {
    pub fn new(embedding: f64, classifier: f64, rule: f64) -> Self {
        Self {
            embedding: Some(embedding),
            classifier: Some(classifier),
            rule: Some(rule),
        }
    }
}

/// A calibrated (or pass-through) probability for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedScore {
    pub domain: String,
    /// Fused raw score, before calibration.
    pub raw: f64,
    /// Probability in [0,1]. Equals the clipped raw score when uncalibrated.
    pub probability: f64,
    /// Whether fresh calibration parameters were applied.
    pub calibrated: bool,
    /// Version of the parameters used, if calibrated.
    pub version: Option<i64>,
}

/// Action chosen by the decision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Dispatch directly to the chosen domain handler.
    Route,
    /// Ask a clarifying question before dispatching.
    Clarify,
    /// Confidence cannot be trusted; hand off to the fallback handler.
    Fallback,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::Clarify => "clarify",
            Self::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "route" => Ok(Self::Route),
            "clarify" => Ok(Self::Clarify),
            "fallback" => Ok(Self::Fallback),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Outcome of the pure decision policy, before event logging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyOutcome {
    pub action: Action,
    /// Chosen domain when `action == Route`.
    pub domain: Option<String>,
    /// Why this action was taken ("thresholds_met", "margin_too_small",
    /// "calibration_unavailable", ...).
    pub reason: &'static str,
}

/// Decision returned to the caller of the online path.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub action: Action,
    pub domain: Option<String>,
    pub calibrated_probabilities: HashMap<String, f64>,
    /// Calibration version used per domain; 0 when uncalibrated.
    pub calibration_versions_used: HashMap<String, i64>,
    pub arm: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for action in [Action::Route, Action::Clarify, Action::Fallback] {
            let parsed: Action = action.as_str().parse().unwrap();
            assert_eq!(parsed, action);
        }
        assert!("reroute".parse::<Action>().is_err());
    }

    #[test]
    fn test_signal_scores_partial_deserialization() {
        let scores: SignalScores = serde_json::from_str(r#"{"embedding": 0.8}"#).unwrap();
        assert_eq!(scores.embedding, Some(0.8));
        assert_eq!(scores.classifier, None);
        assert_eq!(scores.rule, None);
    }
}
