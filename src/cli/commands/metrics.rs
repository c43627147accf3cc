//! Implementation of the `helmsman metrics` command.
//!
//! In-process counters (action counts, latency percentiles) live and die
//! with an engine instance; what this command reports is the durable
//! side: event log statistics and the latest trainer run.

use anyhow::{Context, Result};
use clap::Args;

use crate::adapters::sqlite::{
    initialize_database, SqliteCalibrationRepository, SqliteRoutingEventRepository,
};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::domain::ports::{CalibrationStore, RoutingEventStore};

#[derive(Args, Debug)]
pub struct MetricsArgs {}

#[derive(Debug, serde::Serialize)]
pub struct MetricsOutput {
    pub total_events: u64,
    pub labeled_events: u64,
    pub events_by_action: Vec<(String, u64)>,
    pub events_by_split: Vec<(String, u64)>,
    /// Fraction of all decisions that fell back.
    pub fallback_rate: f64,
    pub promoted_domains: Vec<DomainQuality>,
    pub last_trainer_run: Option<TrainerRunSummary>,
}

#[derive(Debug, serde::Serialize)]
pub struct DomainQuality {
    pub domain: String,
    pub version: i64,
    pub accuracy: f64,
    pub ece: f64,
    pub fitted_at: String,
}

#[derive(Debug, serde::Serialize)]
pub struct TrainerRunSummary {
    pub finished_at: String,
    pub promoted: bool,
    pub outcome: String,
}

impl CommandOutput for MetricsOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Events: {} total, {} labeled",
            self.total_events, self.labeled_events
        )];
        for (action, count) in &self.events_by_action {
            lines.push(format!("  {action}: {count}"));
        }
        lines.push(format!("Fallback rate: {:.1}%", self.fallback_rate * 100.0));
        if self.promoted_domains.is_empty() {
            lines.push("Calibrated domains: none".to_string());
        } else {
            lines.push("Calibrated domains:".to_string());
            for quality in &self.promoted_domains {
                lines.push(format!(
                    "  {} v{}: accuracy {:.3}, ece {:.3}, fitted {}",
                    quality.domain,
                    quality.version,
                    quality.accuracy,
                    quality.ece,
                    quality.fitted_at
                ));
            }
        }
        match &self.last_trainer_run {
            Some(run) => lines.push(format!(
                "Last trainer run: {} at {} ({})",
                if run.promoted { "promoted" } else { "no promotion" },
                run.finished_at,
                run.outcome
            )),
            None => lines.push("Last trainer run: never".to_string()),
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(_args: MetricsArgs, config: Config, json_mode: bool) -> Result<()> {
    let db_url = format!("sqlite:{}", config.database.path);
    let pool = initialize_database(&db_url)
        .await
        .context("Failed to open database; run `helmsman init` first")?;

    let events = SqliteRoutingEventRepository::new(pool.clone());
    let calibrations = SqliteCalibrationRepository::new(pool);

    let stats = events.stats().await?;
    let fallback_count = stats
        .events_by_action
        .iter()
        .find(|(action, _)| action == "fallback")
        .map_or(0, |(_, count)| *count);
    let fallback_rate = if stats.total_events == 0 {
        0.0
    } else {
        fallback_count as f64 / stats.total_events as f64
    };

    let mut promoted_domains: Vec<DomainQuality> = calibrations
        .load_active()
        .await?
        .into_iter()
        .map(|p| DomainQuality {
            domain: p.domain,
            version: p.version,
            accuracy: p.accuracy,
            ece: p.ece,
            fitted_at: p.fitted_at.to_rfc3339(),
        })
        .collect();
    promoted_domains.sort_by(|a, b| a.domain.cmp(&b.domain));

    let last_trainer_run =
        calibrations
            .latest_trainer_run()
            .await?
            .map(|(finished_at, promoted, outcome)| TrainerRunSummary {
                finished_at: finished_at.to_rfc3339(),
                promoted,
                outcome,
            });

    let output_data = MetricsOutput {
        total_events: stats.total_events,
        labeled_events: stats.labeled_events,
        events_by_action: stats.events_by_action,
        events_by_split: stats.events_by_split,
        fallback_rate,
        promoted_domains,
        last_trainer_run,
    };
    output(&output_data, json_mode);
    Ok(())
}
