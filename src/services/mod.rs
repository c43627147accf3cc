//! Service layer: the online decision pipeline and the offline trainer.

pub mod assignment;
pub mod calibrator;
pub mod engine;
pub mod event_logger;
pub mod fusion;
pub mod metrics;
pub mod policy;
pub mod trainer;

pub use assignment::ConversationAssigner;
pub use calibrator::{CalibrationCache, CalibrationSnapshot, Calibrator};
pub use engine::DecisionEngine;
pub use event_logger::EventLogger;
pub use fusion::SignalFusion;
pub use metrics::{MetricsSnapshot, RouterMetrics};
pub use policy::DecisionPolicy;
pub use trainer::{DomainFitReport, Trainer, TrainerReport};
