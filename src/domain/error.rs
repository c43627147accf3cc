use thiserror::Error;

/// Errors from the calibration and event store contracts.
///
/// The online path never surfaces these to the caller: a failed calibration
/// read degrades to uncalibrated scores and a failed event write is dropped
/// with a counted metric.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Append failed: {0}")]
    Append(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Event not found: {0}")]
    EventNotFound(uuid::Uuid),

    #[error("Promotion failed for domain {domain}: {reason}")]
    Promotion { domain: String, reason: String },
}

/// Errors from the offline trainer.
#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Another trainer instance holds the run lock")]
    LockHeld,

    #[error("No labeled training events in the requested window")]
    NoTrainingData,
}
