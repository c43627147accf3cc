//! Helmsman - Calibrated multi-signal routing decision engine
//!
//! Helmsman decides how a conversational assistant should dispatch each
//! utterance: route it to a domain handler, ask a clarifying question, or
//! hand off to a fallback. Raw confidence signals are fused, mapped
//! through per-domain calibration parameters, and compared against
//! configurable thresholds. Every decision is logged to an append-only
//! event log that an offline trainer later fits new calibration
//! parameters from, promoting them only when they clear accuracy,
//! calibration-error, and latency gates.
//!
//! # Architecture
//!
//! The crate follows a hexagonal layout:
//!
//! - **Domain Layer** (`domain`): models and the store port traits
//! - **Service Layer** (`services`): the online decision pipeline and the
//!   offline trainer
//! - **Adapters** (`adapters`): SQLite implementations of the store ports
//! - **Infrastructure** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    Action, CalibratedScore, CalibrationParameters, Config, Decision, RoutingEvent, SignalScores,
    Split, ThresholdConfig,
};
pub use domain::ports::{CalibrationStore, RoutingEventStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{DecisionEngine, EventLogger, Trainer};
