//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

use crate::cli::commands::{
    calibration::CalibrationCommands, decide::DecideArgs, event::EventCommands, init::InitArgs,
    metrics::MetricsArgs, train::TrainArgs,
};

#[derive(Parser)]
#[command(name = "helmsman")]
#[command(about = "Helmsman - Calibrated multi-signal routing decision engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize Helmsman configuration and database
    Init(InitArgs),

    /// Make one routing decision from a set of domain signals
    Decide(DecideArgs),

    /// Run the offline calibration trainer
    Train(TrainArgs),

    /// Calibration parameter commands
    #[command(subcommand)]
    Calibration(CalibrationCommands),

    /// Routing event log commands
    #[command(subcommand)]
    Event(EventCommands),

    /// Show event log statistics and the latest trainer run
    Metrics(MetricsArgs),
}
