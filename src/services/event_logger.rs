//! Fire-and-forget routing event logging.
//!
//! The online path must never wait on the event store. `log` pushes into a
//! bounded channel with `try_send`; a background writer drains the channel
//! and appends with a bounded retry. A full buffer or a persistently
//! failing store drops events and increments a counter that the metrics
//! surface reports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::models::{EventLoggerConfig, RoutingEvent};
use crate::domain::ports::RoutingEventStore;

/// Handle used by the online path to enqueue events.
#[derive(Clone)]
pub struct EventLogger {
    sender: mpsc::Sender<RoutingEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventLogger {
    /// Spawn the writer task and return the logger handle alongside it.
    pub fn spawn(
        store: Arc<dyn RoutingEventStore>,
        config: EventLoggerConfig,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.buffer_size.max(1));
        let dropped = Arc::new(AtomicU64::new(0));

        let writer = EventWriter {
            store,
            max_retries: config.max_write_retries,
            dropped: dropped.clone(),
        };
        let handle = tokio::spawn(writer.run(receiver));

        (Self { sender, dropped }, handle)
    }

    /// Enqueue an event without blocking. A full buffer drops the event.
    pub fn log(&self, event: RoutingEvent) {
        if let Err(err) = self.sender.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "routing event buffer full, event dropped");
        }
    }

    /// Events dropped due to a full buffer or exhausted write retries.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

struct EventWriter {
    store: Arc<dyn RoutingEventStore>,
    max_retries: u32,
    dropped: Arc<AtomicU64>,
}

impl EventWriter {
    async fn run(self, mut receiver: mpsc::Receiver<RoutingEvent>) {
        while let Some(event) = receiver.recv().await {
            self.write_with_retry(event).await;
        }
    }

    async fn write_with_retry(&self, event: RoutingEvent) {
        let attempts = self.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.store.append(&event).await {
                Ok(()) => return,
                Err(err) if attempt < attempts => {
                    tracing::warn!(
                        event_id = %event.id,
                        attempt,
                        error = %err,
                        "routing event write failed, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        50 * u64::from(attempt),
                    ))
                    .await;
                }
                Err(err) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        event_id = %event.id,
                        error = %err,
                        "routing event dropped after exhausting retries"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::StoreError;
    use crate::domain::models::{Action, Split};
    use crate::domain::ports::event_store::{EventQuery, EventStoreStats};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::sync::Notify;
    use uuid::Uuid;

    fn make_event() -> RoutingEvent {
        RoutingEvent {
            id: Uuid::new_v4(),
            conversation_id: "conv".to_string(),
            timestamp: Utc::now(),
            raw_scores: HashMap::new(),
            calibrated_probabilities: HashMap::new(),
            calibration_versions: HashMap::new(),
            action: Action::Clarify,
            routed_domain: None,
            arm: "control".to_string(),
            split: Split::Train,
            true_domain: None,
            labeled_at: None,
        }
    }

    /// Store whose appends park until released, to saturate the buffer.
    struct StalledStore {
        release: Arc<Notify>,
        appended: Arc<AtomicU64>,
    }

    #[async_trait]
    impl RoutingEventStore for StalledStore {
        async fn append(&self, _event: &RoutingEvent) -> Result<(), StoreError> {
            self.release.notified().await;
            self.appended.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn query(&self, _query: EventQuery) -> Result<Vec<RoutingEvent>, StoreError> {
            Ok(vec![])
        }

        async fn attach_label(&self, _id: Uuid, _domain: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn stats(&self) -> Result<EventStoreStats, StoreError> {
            unimplemented!("not used in tests")
        }
    }

    struct FailingStore;

    #[async_trait]
    impl RoutingEventStore for FailingStore {
        async fn append(&self, _event: &RoutingEvent) -> Result<(), StoreError> {
            Err(StoreError::Append("store unreachable".to_string()))
        }

        async fn query(&self, _query: EventQuery) -> Result<Vec<RoutingEvent>, StoreError> {
            Ok(vec![])
        }

        async fn attach_label(&self, _id: Uuid, _domain: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn stats(&self) -> Result<EventStoreStats, StoreError> {
            unimplemented!("not used in tests")
        }
    }

    #[tokio::test]
    async fn test_saturated_buffer_drops_without_blocking() {
        let release = Arc::new(Notify::new());
        let appended = Arc::new(AtomicU64::new(0));
        let store = Arc::new(StalledStore {
            release: release.clone(),
            appended: appended.clone(),
        });

        let (logger, _handle) = EventLogger::spawn(
            store,
            EventLoggerConfig {
                buffer_size: 2,
                max_write_retries: 1,
            },
        );

        // Writer is parked on the first event; buffer holds two more.
        // Everything beyond that must drop immediately, not block.
        let start = std::time::Instant::now();
        for _ in 0..10 {
            logger.log(make_event());
        }
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
        assert!(logger.dropped_count() >= 7, "dropped {}", logger.dropped_count());
    }

    #[tokio::test]
    async fn test_persistent_store_failure_counts_drops() {
        let (logger, _handle) = EventLogger::spawn(
            Arc::new(FailingStore),
            EventLoggerConfig {
                buffer_size: 8,
                max_write_retries: 2,
            },
        );

        logger.log(make_event());

        // Retries are 50ms-spaced; give the writer time to exhaust them.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(logger.dropped_count(), 1);
    }
}
