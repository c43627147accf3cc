//! Calibration parameter records: a Platt-style monotonic mapping from a
//! fused raw score to a probability, versioned per domain.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One fitted calibration record for a domain.
///
/// At most one record per domain carries `promoted = true` at any time;
/// promotion demotes the previous record in the same atomic step. Older
/// records are retained for audit and rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    pub domain: String,
    /// Monotonically increasing per domain.
    pub version: i64,
    /// Sigmoid slope. Kept strictly positive so the mapping is monotonic.
    pub scale: f64,
    /// Sigmoid intercept.
    pub bias: f64,
    pub fitted_at: DateTime<Utc>,
    /// Accuracy measured on the validation split at fit time.
    pub accuracy: f64,
    /// Expected calibration error measured on the validation split.
    pub ece: f64,
    pub promoted: bool,
}

impl CalibrationParameters {
    /// Apply the fitted monotonic mapping to a raw score.
    pub fn apply(&self, raw: f64) -> f64 {
        let z = self.scale * raw + self.bias;
        1.0 / (1.0 + (-z).exp())
    }

    /// A promoted record older than the staleness window must not be used
    /// for autonomous routing.
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        now - self.fitted_at > staleness
    }
}
