use crate::domain::error::StoreError;
use crate::domain::models::{RoutingEvent, Split};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Filters for querying routing events.
#[derive(Default, Debug, Clone)]
pub struct EventQuery {
    pub split: Option<Split>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Only events that scored this domain.
    pub domain: Option<String>,
    /// Only events with a ground-truth label attached.
    pub labeled_only: bool,
    pub limit: Option<u32>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn split(mut self, split: Split) -> Self {
        self.split = Some(split);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn labeled_only(mut self) -> Self {
        self.labeled_only = true;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregate statistics for the event store.
#[derive(Debug, Clone)]
pub struct EventStoreStats {
    pub total_events: u64,
    pub labeled_events: u64,
    pub events_by_action: Vec<(String, u64)>,
    pub events_by_split: Vec<(String, u64)>,
    pub oldest_event: Option<DateTime<Utc>>,
    pub newest_event: Option<DateTime<Utc>>,
}

/// Store contract for the append-only routing event log.
#[async_trait]
pub trait RoutingEventStore: Send + Sync {
    /// Append one event. Decision fields are immutable after this call.
    async fn append(&self, event: &RoutingEvent) -> Result<(), StoreError>;

    /// Query events, oldest first.
    async fn query(&self, query: EventQuery) -> Result<Vec<RoutingEvent>, StoreError>;

    /// Attach a ground-truth label to an existing event. Only the label
    /// columns change; the decision fields are never touched.
    async fn attach_label(&self, event_id: Uuid, true_domain: &str) -> Result<(), StoreError>;

    async fn stats(&self) -> Result<EventStoreStats, StoreError>;
}
