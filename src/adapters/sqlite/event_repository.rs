//! SQLite implementation of the RoutingEventStore trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{Action, RoutingEvent, Split};
use crate::domain::ports::event_store::{EventQuery, EventStoreStats, RoutingEventStore};

/// SQLite-backed routing event repository.
#[derive(Clone)]
pub struct SqliteRoutingEventRepository {
    pool: SqlitePool,
}

impl SqliteRoutingEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: EventRow) -> Result<RoutingEvent, StoreError> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| StoreError::Query(format!("Invalid event id: {e}")))?;

        let timestamp = parse_datetime(&row.timestamp)?;

        let raw_scores: HashMap<String, f64> = serde_json::from_str(&row.raw_scores)
            .map_err(|e| StoreError::Serialization(format!("Invalid raw_scores: {e}")))?;
        let calibrated_probabilities: HashMap<String, f64> =
            serde_json::from_str(&row.calibrated_probabilities).map_err(|e| {
                StoreError::Serialization(format!("Invalid calibrated_probabilities: {e}"))
            })?;
        let calibration_versions: HashMap<String, i64> =
            serde_json::from_str(&row.calibration_versions).map_err(|e| {
                StoreError::Serialization(format!("Invalid calibration_versions: {e}"))
            })?;

        let action: Action = row
            .action
            .parse()
            .map_err(|e: String| StoreError::Query(e))?;
        let split: Split = row
            .split
            .parse()
            .map_err(|e: String| StoreError::Query(e))?;

        let labeled_at = row.labeled_at.as_deref().map(parse_datetime).transpose()?;

        Ok(RoutingEvent {
            id,
            conversation_id: row.conversation_id,
            timestamp,
            raw_scores,
            calibrated_probabilities,
            calibration_versions,
            action,
            routed_domain: row.routed_domain,
            arm: row.arm,
            split,
            true_domain: row.true_domain,
            labeled_at,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("Invalid timestamp: {e}")))
}

#[async_trait]
impl RoutingEventStore for SqliteRoutingEventRepository {
    async fn append(&self, event: &RoutingEvent) -> Result<(), StoreError> {
        let raw_scores = serde_json::to_string(&event.raw_scores)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let probabilities = serde_json::to_string(&event.calibrated_probabilities)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let versions = serde_json::to_string(&event.calibration_versions)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO routing_events (
                id, conversation_id, timestamp, raw_scores, calibrated_probabilities,
                calibration_versions, action, routed_domain, arm, split,
                true_domain, labeled_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.conversation_id)
        .bind(event.timestamp.to_rfc3339())
        .bind(raw_scores)
        .bind(probabilities)
        .bind(versions)
        .bind(event.action.as_str())
        .bind(event.routed_domain.as_deref())
        .bind(&event.arm)
        .bind(event.split.as_str())
        .bind(event.true_domain.as_deref())
        .bind(event.labeled_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Append(e.to_string()))?;

        Ok(())
    }

    async fn query(&self, query: EventQuery) -> Result<Vec<RoutingEvent>, StoreError> {
        let mut sql = String::from(
            "SELECT id, conversation_id, timestamp, raw_scores, calibrated_probabilities, \
             calibration_versions, action, routed_domain, arm, split, true_domain, labeled_at \
             FROM routing_events WHERE 1=1",
        );
        let mut binds: Vec<String> = Vec::new();

        if let Some(split) = query.split {
            sql.push_str(" AND split = ?");
            binds.push(split.as_str().to_string());
        }
        if let Some(since) = query.since {
            sql.push_str(" AND timestamp >= ?");
            binds.push(since.to_rfc3339());
        }
        if let Some(until) = query.until {
            sql.push_str(" AND timestamp <= ?");
            binds.push(until.to_rfc3339());
        }
        if let Some(ref domain) = query.domain {
            // raw_scores is a JSON object keyed by domain
            sql.push_str(" AND json_extract(raw_scores, '$.' || ?) IS NOT NULL");
            binds.push(domain.clone());
        }
        if query.labeled_only {
            sql.push_str(" AND true_domain IS NOT NULL");
        }

        sql.push_str(" ORDER BY timestamp ASC");

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, EventRow>(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn attach_label(&self, event_id: Uuid, true_domain: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE routing_events SET true_domain = ?, labeled_at = ? WHERE id = ?",
        )
        .bind(true_domain)
        .bind(Utc::now().to_rfc3339())
        .bind(event_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn stats(&self) -> Result<EventStoreStats, StoreError> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM routing_events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let (labeled,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM routing_events WHERE true_domain IS NOT NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        let by_action: Vec<(String, i64)> =
            sqlx::query_as("SELECT action, COUNT(*) FROM routing_events GROUP BY action")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        let by_split: Vec<(String, i64)> =
            sqlx::query_as("SELECT split, COUNT(*) FROM routing_events GROUP BY split")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        let time_bounds: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT MIN(timestamp), MAX(timestamp) FROM routing_events")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        let (oldest, newest) = match time_bounds {
            Some((Some(min_ts), Some(max_ts))) => (
                Some(parse_datetime(&min_ts)?),
                Some(parse_datetime(&max_ts)?),
            ),
            _ => (None, None),
        };

        Ok(EventStoreStats {
            total_events: total as u64,
            labeled_events: labeled as u64,
            events_by_action: by_action
                .into_iter()
                .map(|(a, c)| (a, c as u64))
                .collect(),
            events_by_split: by_split.into_iter().map(|(s, c)| (s, c as u64)).collect(),
            oldest_event: oldest,
            newest_event: newest,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    conversation_id: String,
    timestamp: String,
    raw_scores: String,
    calibrated_probabilities: String,
    calibration_versions: String,
    action: String,
    routed_domain: Option<String>,
    arm: String,
    split: String,
    true_domain: Option<String>,
    labeled_at: Option<String>,
}
