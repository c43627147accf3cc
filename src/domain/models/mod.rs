//! Domain models: pure data types with no I/O.

pub mod calibration;
pub mod config;
pub mod decision;
pub mod routing_event;
pub mod thresholds;

pub use calibration::CalibrationParameters;
pub use config::{
    CalibrationConfig, Config, DatabaseConfig, EventLoggerConfig, ExperimentConfig, FusionConfig,
    LoggingConfig, TrainerConfig,
};
pub use decision::{Action, CalibratedScore, Decision, PolicyOutcome, SignalScores};
pub use routing_event::{RoutingEvent, Split};
pub use thresholds::{DomainThresholds, ThresholdConfig};
