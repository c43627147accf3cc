//! Domain layer: pure business types, errors, and store contracts.

pub mod error;
pub mod models;
pub mod ports;
