//! Core domain models and event types.
//!
//! Provides strongly-typed domain primitives, delivery observability events,
//! the clock abstraction and subscription persistence for the notification
//! subsystem. The delivery crate and the facade depend on these types for
//! type safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    AttemptCompletedEvent, DeliveryEvent, DeliveryExhaustedEvent, DispatchAbortedEvent,
    DispatchCompletedEvent, EventHandler, FanoutEventHandler, NoOpEventHandler,
    SubscriberSkippedEvent,
};
pub use models::{
    AttemptOutcome, DeliveryAttempt, DogLinks, DogRecord, Event, EventId, EventKind,
    NewSubscription, OwnerId, Subscription, SubscriptionId, SubscriptionUpdate,
};
pub use time::{Clock, RealClock, TestClock};
