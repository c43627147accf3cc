//! Routing event model: one immutable record per decision, feeding the
//! offline trainer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::decision::Action;

/// Dataset split an event belongs to.
///
/// Assigned once at write time from a stable hash of the conversation id,
/// so every turn of a conversation lands in the same split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }
}

impl std::str::FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "validation" => Ok(Self::Validation),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown split: {other}")),
        }
    }
}

/// One routing decision, as persisted.
///
/// Decision fields are immutable once written. The ground-truth label
/// (`true_domain`, `labeled_at`) is the only part that may be attached
/// later, by the feedback path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingEvent {
    pub id: Uuid,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    /// Fused raw score per candidate domain.
    pub raw_scores: HashMap<String, f64>,
    /// Calibrated probability per candidate domain.
    pub calibrated_probabilities: HashMap<String, f64>,
    /// Calibration version used per domain at decision time; 0 when the
    /// domain was uncalibrated. Never relabeled after a later promotion.
    pub calibration_versions: HashMap<String, i64>,
    pub action: Action,
    pub routed_domain: Option<String>,
    pub arm: String,
    pub split: Split,
    /// Ground-truth domain, attached by feedback after the fact.
    pub true_domain: Option<String>,
    pub labeled_at: Option<DateTime<Utc>>,
}

impl RoutingEvent {
    pub fn is_labeled(&self) -> bool {
        self.true_domain.is_some()
    }

    /// Binary outcome for one domain: was this the correct handler?
    /// `None` when the event is unlabeled.
    pub fn outcome_for(&self, domain: &str) -> Option<bool> {
        self.true_domain.as_deref().map(|t| t == domain)
    }
}
