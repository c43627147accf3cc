//! Implementation of the `helmsman decide` command.
//!
//! One-shot decision: builds the engine against the project database,
//! runs a single decision for the given conversation, and waits for the
//! event writer to flush before exiting.

use anyhow::{Context, Result};
use clap::Args;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapters::sqlite::{
    initialize_database, SqliteCalibrationRepository, SqliteRoutingEventRepository,
};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, SignalScores};
use crate::services::{DecisionEngine, EventLogger};

#[derive(Args, Debug)]
pub struct DecideArgs {
    /// Conversation identifier (drives split and arm assignment)
    pub conversation_id: String,

    /// Candidate signals as JSON: {"weather": {"embedding": 0.9, "classifier": 0.7}, ...}
    #[arg(long, conflicts_with = "signals_file")]
    pub signals: Option<String>,

    /// Read the signals JSON from a file instead
    #[arg(long)]
    pub signals_file: Option<PathBuf>,
}

#[derive(Debug, serde::Serialize)]
pub struct DecideOutput {
    pub action: String,
    pub domain: Option<String>,
    pub arm: String,
    pub calibrated_probabilities: Vec<(String, f64)>,
    pub calibration_versions_used: HashMap<String, i64>,
}

impl CommandOutput for DecideOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Action: {}{}",
            self.action,
            self.domain
                .as_deref()
                .map(|d| format!(" -> {d}"))
                .unwrap_or_default()
        )];
        lines.push(format!("Arm: {}", self.arm));
        lines.push("Calibrated probabilities:".to_string());
        for (domain, probability) in &self.calibrated_probabilities {
            let version = self
                .calibration_versions_used
                .get(domain)
                .copied()
                .unwrap_or(0);
            let tag = if version == 0 {
                " (uncalibrated)".to_string()
            } else {
                format!(" (v{version})")
            };
            lines.push(format!("  {domain}: {probability:.4}{tag}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: DecideArgs, config: Config, json_mode: bool) -> Result<()> {
    let signals_json = match (&args.signals, &args.signals_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read signals from {path:?}"))?,
        (None, None) => anyhow::bail!("Provide --signals or --signals-file"),
    };
    let signals: HashMap<String, SignalScores> =
        serde_json::from_str(&signals_json).context("Failed to parse signals JSON")?;

    let db_url = format!("sqlite:{}", config.database.path);
    let pool = initialize_database(&db_url)
        .await
        .context("Failed to open database; run `helmsman init` first")?;

    let event_store = Arc::new(SqliteRoutingEventRepository::new(pool.clone()));
    let calibration_store = Arc::new(SqliteCalibrationRepository::new(pool));

    let (logger, writer) = EventLogger::spawn(event_store, config.event_logger);
    let engine = DecisionEngine::new(&config, calibration_store, logger);
    engine
        .refresh_calibration()
        .await
        .context("Failed to load calibration snapshot")?;

    let decision = engine.decide(&args.conversation_id, &signals).await;

    // Dropping the engine closes the event channel so the writer drains.
    drop(engine);
    writer.await.context("Event writer task failed")?;

    let mut calibrated_probabilities: Vec<(String, f64)> =
        decision.calibrated_probabilities.into_iter().collect();
    calibrated_probabilities
        .sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let output_data = DecideOutput {
        action: decision.action.as_str().to_string(),
        domain: decision.domain,
        arm: decision.arm,
        calibrated_probabilities,
        calibration_versions_used: decision.calibration_versions_used,
    };
    output(&output_data, json_mode);
    Ok(())
}
