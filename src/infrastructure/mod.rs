//! Infrastructure layer: configuration loading and logging setup.
//!
//! Storage adapters live under `crate::adapters`; this module covers the
//! remaining ambient concerns.

pub mod config;
pub mod logging;
