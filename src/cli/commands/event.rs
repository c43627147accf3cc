//! Implementation of the `helmsman event` commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use uuid::Uuid;

use crate::adapters::sqlite::{initialize_database, SqliteRoutingEventRepository};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, RoutingEvent, Split};
use crate::domain::ports::event_store::EventQuery;
use crate::domain::ports::RoutingEventStore;

#[derive(Subcommand, Debug)]
pub enum EventCommands {
    /// Attach a ground-truth label to a logged decision
    Label {
        /// Event ID
        event_id: Uuid,

        /// The domain that turned out to be correct
        true_domain: String,
    },

    /// List logged routing events
    List {
        /// Filter by split (train, validation, test)
        #[arg(short, long)]
        split: Option<Split>,

        /// Only labeled events
        #[arg(long)]
        labeled: bool,

        /// Maximum number of events to display
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Show event log statistics
    Stats,
}

#[derive(Debug, serde::Serialize)]
pub struct LabelOutput {
    pub event_id: Uuid,
    pub true_domain: String,
}

impl CommandOutput for LabelOutput {
    fn to_human(&self) -> String {
        format!("Labeled event {} as {}", self.event_id, self.true_domain)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct EventListOutput {
    pub events: Vec<RoutingEvent>,
}

impl CommandOutput for EventListOutput {
    fn to_human(&self) -> String {
        if self.events.is_empty() {
            return "No events found.".to_string();
        }
        self.events
            .iter()
            .map(|e| {
                format!(
                    "{} {} [{}] {}{} arm={} label={}",
                    e.timestamp.to_rfc3339(),
                    e.id,
                    e.split.as_str(),
                    e.action.as_str(),
                    e.routed_domain
                        .as_deref()
                        .map(|d| format!("->{d}"))
                        .unwrap_or_default(),
                    e.arm,
                    e.true_domain.as_deref().unwrap_or("-"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct EventStatsOutput {
    pub total_events: u64,
    pub labeled_events: u64,
    pub events_by_action: Vec<(String, u64)>,
    pub events_by_split: Vec<(String, u64)>,
    pub oldest_event: Option<String>,
    pub newest_event: Option<String>,
}

impl CommandOutput for EventStatsOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Total events: {}", self.total_events),
            format!("Labeled events: {}", self.labeled_events),
        ];
        lines.push("By action:".to_string());
        for (action, count) in &self.events_by_action {
            lines.push(format!("  {action}: {count}"));
        }
        lines.push("By split:".to_string());
        for (split, count) in &self.events_by_split {
            lines.push(format!("  {split}: {count}"));
        }
        if let (Some(oldest), Some(newest)) = (&self.oldest_event, &self.newest_event) {
            lines.push(format!("Window: {oldest} .. {newest}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(command: EventCommands, config: Config, json_mode: bool) -> Result<()> {
    let db_url = format!("sqlite:{}", config.database.path);
    let pool = initialize_database(&db_url)
        .await
        .context("Failed to open database; run `helmsman init` first")?;
    let store = SqliteRoutingEventRepository::new(pool);

    match command {
        EventCommands::Label {
            event_id,
            true_domain,
        } => {
            store.attach_label(event_id, &true_domain).await?;
            output(
                &LabelOutput {
                    event_id,
                    true_domain,
                },
                json_mode,
            );
        }
        EventCommands::List {
            split,
            labeled,
            limit,
        } => {
            let mut query = EventQuery::new().limit(limit);
            if let Some(split) = split {
                query = query.split(split);
            }
            if labeled {
                query = query.labeled_only();
            }
            let events = store.query(query).await?;
            output(&EventListOutput { events }, json_mode);
        }
        EventCommands::Stats => {
            let stats = store.stats().await?;
            output(
                &EventStatsOutput {
                    total_events: stats.total_events,
                    labeled_events: stats.labeled_events,
                    events_by_action: stats.events_by_action,
                    events_by_split: stats.events_by_split,
                    oldest_event: stats.oldest_event.map(|t| t.to_rfc3339()),
                    newest_event: stats.newest_event.map(|t| t.to_rfc3339()),
                },
                json_mode,
            );
        }
    }

    Ok(())
}
