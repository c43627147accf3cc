//! Implementation of the `helmsman train` command.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;

use crate::adapters::sqlite::{
    initialize_database, SqliteCalibrationRepository, SqliteRoutingEventRepository,
};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::{Trainer, TrainerReport};

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Fit and evaluate but never promote
    #[arg(long)]
    pub dry_run: bool,

    /// Only use events at or after this RFC3339 timestamp
    #[arg(long)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,

    /// Only use events at or before this RFC3339 timestamp
    #[arg(long)]
    pub until: Option<chrono::DateTime<chrono::Utc>>,

    /// Exit successfully even when domains failed their gates or
    /// nothing was promoted
    #[arg(long)]
    pub allow_empty: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct TrainOutput {
    pub report: TrainerReport,
}

impl CommandOutput for TrainOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let mut lines = vec![format!(
            "Trainer run {} ({} train / {} validation events, policy p95 {:.3} ms)",
            report.run_id, report.train_events, report.validation_events, report.p95_latency_ms
        )];
        for (domain, fit) in &report.domains {
            let status = if fit.promoted {
                format!("promoted v{}", fit.version.unwrap_or(0))
            } else {
                fit.reason.clone()
            };
            lines.push(format!(
                "  {domain}: {status} (samples {}/{}, accuracy {:.3}, ece {:.3})",
                fit.train_samples, fit.validation_samples, fit.accuracy, fit.ece
            ));
        }
        if report.dry_run {
            lines.push("Dry run: nothing was promoted.".to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: TrainArgs, config: Config, json_mode: bool) -> Result<()> {
    let db_url = format!("sqlite:{}", config.database.path);
    let pool = initialize_database(&db_url)
        .await
        .context("Failed to open database; run `helmsman init` first")?;

    let events = Arc::new(SqliteRoutingEventRepository::new(pool.clone()));
    let calibrations = Arc::new(SqliteCalibrationRepository::new(pool));
    let trainer = Trainer::new(events, calibrations, config.trainer, config.thresholds);

    let report = trainer
        .run_window(args.dry_run, args.since, args.until)
        .await?;
    let promoted = !report.promoted_domains().is_empty();
    let gate_failures: Vec<String> = report
        .gate_failures()
        .iter()
        .map(ToString::to_string)
        .collect();
    let had_candidates = !report.domains.is_empty();

    output(&TrainOutput { report }, json_mode);

    if !args.dry_run && !args.allow_empty {
        // Partial success is still a failed run: automation must see a
        // non-zero exit whenever any fitted domain was rejected.
        if !gate_failures.is_empty() {
            anyhow::bail!(
                "Calibration rejected for domain(s): {}",
                gate_failures.join(", ")
            );
        }
        if !promoted && had_candidates {
            anyhow::bail!("No calibration candidate cleared the promotion gates");
        }
    }
    Ok(())
}
