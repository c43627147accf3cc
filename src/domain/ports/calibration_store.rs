use crate::domain::error::StoreError;
use crate::domain::models::CalibrationParameters;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Store contract for versioned calibration parameters.
///
/// Promotion is the only strictly atomic operation in the system: the new
/// record becomes the single promoted one for its domain and the previous
/// record is demoted in the same step.
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Currently promoted record for a domain, or None.
    async fn get_active(&self, domain: &str) -> Result<Option<CalibrationParameters>, StoreError>;

    /// All currently promoted records, for snapshot loads.
    async fn load_active(&self) -> Result<Vec<CalibrationParameters>, StoreError>;

    /// Version history for a domain, newest first.
    async fn history(&self, domain: &str, limit: u32)
        -> Result<Vec<CalibrationParameters>, StoreError>;

    /// Atomically demote the current record and insert `params` as the
    /// promoted one. `params.version` must exceed the current version.
    async fn promote(&self, params: &CalibrationParameters) -> Result<(), StoreError>;

    /// Take the single-instance trainer lease. Returns false when another
    /// live holder exists; an expired lease is taken over.
    async fn try_acquire_trainer_lock(
        &self,
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Release the lease if `holder` owns it.
    async fn release_trainer_lock(&self, holder: &str) -> Result<(), StoreError>;

    /// Record a completed trainer run for the metrics surface.
    async fn record_trainer_run(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        promoted: bool,
        outcome: &str,
        report_json: &str,
    ) -> Result<(), StoreError>;

    /// Latest recorded trainer run as (finished_at, promoted, outcome),
    /// if any run has completed.
    async fn latest_trainer_run(
        &self,
    ) -> Result<Option<(DateTime<Utc>, bool, String)>, StoreError>;
}
