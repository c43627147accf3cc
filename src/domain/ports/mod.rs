//! Ports: store contracts consumed by services and implemented by adapters.

pub mod calibration_store;
pub mod event_store;

pub use calibration_store::CalibrationStore;
pub use event_store::{EventQuery, EventStoreStats, RoutingEventStore};
