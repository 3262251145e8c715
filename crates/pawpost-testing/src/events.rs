//! Recording event handler for observing background dispatch.
//!
//! Dispatch never reports back to its caller, so tests watch the
//! observability stream instead. All waits are bounded by a timeout.

use std::time::Duration;

use anyhow::{bail, Result};
use pawpost_core::{
    models::{AttemptOutcome, EventId, SubscriptionId},
    DeliveryEvent, DispatchCompletedEvent, EventHandler,
};
use tokio::sync::RwLock;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Event handler that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: RwLock<Vec<DeliveryEvent>>,
}

impl RecordingEventHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded events in arrival order.
    pub async fn events(&self) -> Vec<DeliveryEvent> {
        self.events.read().await.clone()
    }

    /// Returns recorded events belonging to one domain event.
    pub async fn events_for(&self, event_id: EventId) -> Vec<DeliveryEvent> {
        self.events.read().await.iter().filter(|e| e.event_id() == event_id).cloned().collect()
    }

    /// Counts HTTP attempts made towards one subscription.
    pub async fn attempts_for(&self, subscription_id: SubscriptionId) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| {
                matches!(e, DeliveryEvent::AttemptCompleted(a)
                    if a.attempt.subscription_id == subscription_id)
            })
            .count()
    }

    /// Counts successful attempts across all subscriptions.
    pub async fn successful_attempts(&self) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| {
                matches!(e, DeliveryEvent::AttemptCompleted(a)
                    if a.attempt.outcome == AttemptOutcome::Success)
            })
            .count()
    }

    /// Waits until `condition` holds for the recorded events.
    ///
    /// # Errors
    ///
    /// Returns error if the condition does not hold within `timeout`.
    pub async fn wait_for<F>(&self, mut condition: F, timeout: Duration) -> Result<()>
    where
        F: FnMut(&[DeliveryEvent]) -> bool,
    {
        let result = tokio::time::timeout(timeout, async {
            loop {
                if condition(&self.events.read().await) {
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await;

        if result.is_err() {
            bail!("condition not met within {timeout:?}");
        }
        Ok(())
    }

    /// Waits until dispatch of `event_id` has completed or aborted.
    ///
    /// Returns the completion summary, or `None` if the dispatch aborted.
    ///
    /// # Errors
    ///
    /// Returns error if neither happens within `timeout`.
    pub async fn wait_for_completion(
        &self,
        event_id: EventId,
        timeout: Duration,
    ) -> Result<Option<DispatchCompletedEvent>> {
        self.wait_for(
            |events| {
                events.iter().any(|e| {
                    e.event_id() == event_id
                        && matches!(
                            e,
                            DeliveryEvent::DispatchCompleted(_) | DeliveryEvent::DispatchAborted(_)
                        )
                })
            },
            timeout,
        )
        .await?;

        Ok(self.events.read().await.iter().find_map(|e| match e {
            DeliveryEvent::DispatchCompleted(c) if c.event_id == event_id => Some(c.clone()),
            _ => None,
        }))
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        self.events.write().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pawpost_core::{models::EventKind, DispatchAbortedEvent};

    use super::*;

    #[tokio::test]
    async fn wait_for_completion_returns_none_on_abort() {
        let recorder = RecordingEventHandler::new();
        let event_id = EventId::new();

        recorder
            .handle_event(DeliveryEvent::DispatchAborted(DispatchAbortedEvent {
                event_id,
                kind: EventKind::NewDogAdded,
                reason: "store offline".to_string(),
                aborted_at: Utc::now(),
            }))
            .await;

        let summary =
            recorder.wait_for_completion(event_id, Duration::from_millis(100)).await.unwrap();
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let recorder = RecordingEventHandler::new();

        let result = recorder.wait_for(|events| !events.is_empty(), Duration::from_millis(50)).await;

        assert!(result.is_err());
    }
}
