//! Implementation of the `helmsman calibration` commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::sync::Arc;

use crate::adapters::sqlite::{initialize_database, SqliteCalibrationRepository};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{CalibrationParameters, Config};
use crate::domain::ports::CalibrationStore;

#[derive(Subcommand, Debug)]
pub enum CalibrationCommands {
    /// List the promoted parameters for every domain
    List,

    /// Show the promoted parameters for one domain
    Show {
        /// Domain name
        domain: String,
    },

    /// Show the version history for a domain
    History {
        domain: String,

        /// Maximum number of versions to display
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct CalibrationOutput {
    pub records: Vec<CalibrationParameters>,
}

impl CommandOutput for CalibrationOutput {
    fn to_human(&self) -> String {
        if self.records.is_empty() {
            return "No calibration records found.".to_string();
        }
        self.records
            .iter()
            .map(|p| {
                format!(
                    "{} v{}{}: scale {:.4}, bias {:.4}, accuracy {:.3}, ece {:.3}, fitted {}",
                    p.domain,
                    p.version,
                    if p.promoted { " (promoted)" } else { "" },
                    p.scale,
                    p.bias,
                    p.accuracy,
                    p.ece,
                    p.fitted_at.to_rfc3339()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(command: CalibrationCommands, config: Config, json_mode: bool) -> Result<()> {
    let db_url = format!("sqlite:{}", config.database.path);
    let pool = initialize_database(&db_url)
        .await
        .context("Failed to open database; run `helmsman init` first")?;
    let store = Arc::new(SqliteCalibrationRepository::new(pool));

    let records = match command {
        CalibrationCommands::List => {
            let mut records = store.load_active().await?;
            records.sort_by(|a, b| a.domain.cmp(&b.domain));
            records
        }
        CalibrationCommands::Show { domain } => {
            store.get_active(&domain).await?.into_iter().collect()
        }
        CalibrationCommands::History { domain, limit } => store.history(&domain, limit).await?,
    };

    output(&CalibrationOutput { records }, json_mode);
    Ok(())
}
