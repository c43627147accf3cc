//! Command implementations, one module per subcommand.

pub mod calibration;
pub mod decide;
pub mod event;
pub mod init;
pub mod metrics;
pub mod train;
