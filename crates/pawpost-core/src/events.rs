//! Observability events emitted by the dispatcher.
//!
//! The dispatcher is fire-and-forget: nothing flows back to the producer of
//! a domain event. Delivery outcomes are instead published through the
//! `EventHandler` trait so logging sinks, metrics exporters and tests can
//! observe them without the dispatcher knowing about any of them.
//!
//! ```text
//!                  AttemptCompleted / DeliveryExhausted / ...
//! ┌─────────────────┐          events          ┌────────────────────┐
//! │ Dispatcher      │ ───────────────────────▶ │ FanoutEventHandler │
//! │ (Producer)      │                          │ (Fan-out)          │
//! └─────────────────┘                          └────────────────────┘
//!                                                        │
//!                                                        ▼
//!                                              alerting, metrics, tests
//! ```
//!
//! No event ever carries a decrypted subscriber secret.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DeliveryAttempt, EventId, EventKind, SubscriptionId};

/// Events emitted by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
    /// A single HTTP attempt finished, successfully or not.
    AttemptCompleted(AttemptCompletedEvent),

    /// All attempts for one subscriber failed; the delivery is abandoned.
    DeliveryExhausted(DeliveryExhaustedEvent),

    /// A subscriber was skipped before any attempt, e.g. undecryptable secret.
    SubscriberSkipped(SubscriberSkippedEvent),

    /// The subscriber snapshot could not be loaded; nothing was delivered.
    DispatchAborted(DispatchAbortedEvent),

    /// Every subscriber pipeline for an event has finished.
    DispatchCompleted(DispatchCompletedEvent),
}

impl DeliveryEvent {
    /// Returns the domain event this observability event belongs to.
    pub fn event_id(&self) -> EventId {
        match self {
            Self::AttemptCompleted(e) => e.attempt.event_id,
            Self::DeliveryExhausted(e) => e.event_id,
            Self::SubscriberSkipped(e) => e.event_id,
            Self::DispatchAborted(e) => e.event_id,
            Self::DispatchCompleted(e) => e.event_id,
        }
    }
}

/// Event emitted after every delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptCompletedEvent {
    /// The attempt that finished.
    pub attempt: DeliveryAttempt,

    /// URL the attempt was sent to.
    pub endpoint_url: String,
}

/// Event emitted when a subscriber's delivery is abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryExhaustedEvent {
    /// Event that could not be delivered.
    pub event_id: EventId,

    /// Subscription that never acknowledged the event.
    pub subscription_id: SubscriptionId,

    /// URL of the failing endpoint.
    pub endpoint_url: String,

    /// Number of attempts made.
    pub attempts: u32,

    /// Error from the final attempt.
    pub last_error: String,

    /// Why no further attempt was made.
    pub reason: String,

    /// When the delivery was abandoned.
    pub exhausted_at: DateTime<Utc>,
}

/// Event emitted when a subscriber is skipped without any attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberSkippedEvent {
    /// Event that was not delivered to this subscriber.
    pub event_id: EventId,

    /// Subscription that was skipped.
    pub subscription_id: SubscriptionId,

    /// Why the subscriber was skipped.
    pub reason: String,

    /// When the subscriber was skipped.
    pub skipped_at: DateTime<Utc>,
}

/// Event emitted when a dispatch fails before any subscriber is contacted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAbortedEvent {
    /// Event whose dispatch was aborted.
    pub event_id: EventId,

    /// Kind of the aborted event.
    pub kind: EventKind,

    /// Error that aborted the dispatch.
    pub reason: String,

    /// When the dispatch was aborted.
    pub aborted_at: DateTime<Utc>,
}

/// Summary emitted once all subscriber pipelines for an event finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchCompletedEvent {
    /// Event that was fanned out.
    pub event_id: EventId,

    /// Kind of the event.
    pub kind: EventKind,

    /// Number of subscribers in the snapshot.
    pub subscribers: usize,

    /// Subscribers that acknowledged the event.
    pub delivered: usize,

    /// Subscribers whose attempts were exhausted.
    pub exhausted: usize,

    /// Subscribers skipped before any attempt.
    pub skipped: usize,

    /// Pipelines that were cancelled or crashed.
    pub interrupted: usize,

    /// When the last pipeline finished.
    pub completed_at: DateTime<Utc>,
}

/// Trait for handling delivery events.
///
/// Implementations must not block: the dispatcher awaits `handle_event`
/// inline on the delivery path. Failures inside a handler should be logged
/// by the handler, never propagated.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a delivery event.
    async fn handle_event(&self, event: DeliveryEvent);
}

/// No-op event handler that discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DeliveryEvent) {}
}

/// Forwards every delivery event to a list of handlers.
///
/// All handlers see the event; they run concurrently and the call returns
/// once the slowest one is done.
#[derive(Debug, Clone, Default)]
pub struct FanoutEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl FanoutEventHandler {
    /// Creates a fan-out over `handlers`.
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self { handlers }
    }

    /// Appends `handler` to the fan-out.
    pub fn push(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of handlers events are forwarded to.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true when events are forwarded nowhere.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait::async_trait]
impl EventHandler for FanoutEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        futures::future::join_all(
            self.handlers.iter().map(|handler| handler.handle_event(event.clone())),
        )
        .await;
    }
}
