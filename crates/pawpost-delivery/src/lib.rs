//! Fire-and-forget webhook delivery for domain events.
//!
//! This crate turns a domain event into HTTP notifications for every
//! subscriber registered for its kind. Delivery is best-effort: each
//! subscriber gets a bounded number of attempts with a fixed pause between
//! them, and nothing is reported back to the code that raised the event.
//!
//! # Architecture
//!
//! 1. **Dispatch** - the producer calls [`Dispatcher::dispatch`], which
//!    returns immediately
//! 2. **Snapshot** - a background task loads the current subscribers from a
//!    [`SubscriptionStore`]
//! 3. **Decrypt** - each subscriber's stored secret is opened with the
//!    [`SecretCipher`]
//! 4. **Deliver** - the [`DeliveryClient`] POSTs the envelope, driven by the
//!    [`RetryPolicy`]
//!
//! Subscribers are processed concurrently in isolated tasks; attempts for
//! one subscriber are strictly sequential.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pawpost_core::models::{Event, EventKind};
//! use pawpost_delivery::{
//!     storage::mock::MockSubscriptionStore, DeliveryClient, DispatchConfig, Dispatcher,
//!     SecretCipher,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cipher = SecretCipher::new(b"0123456789abcdef0123456789abcdef")?;
//! let dispatcher = Dispatcher::new(
//!     Arc::new(MockSubscriptionStore::new()),
//!     cipher,
//!     DeliveryClient::with_defaults()?,
//!     DispatchConfig::default(),
//! )?;
//!
//! dispatcher.dispatch(Event::new(EventKind::NewDogAdded, serde_json::json!({ "id": 1 })));
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod client;
pub mod dispatcher;
pub mod error;
mod pipeline;
pub mod retry;
pub mod storage;

pub use cipher::{CryptoError, SecretCipher};
pub use client::{ClientConfig, DeliveryClient, DeliveryEnvelope, DeliveryOutcome};
pub use dispatcher::{DispatchConfig, DispatchStats, Dispatcher};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use retry::{RetryDecision, RetryPolicy};
pub use storage::{PostgresSubscriptionStore, SubscriptionStore};

/// Default upper bound on concurrently running subscriber pipelines.
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 32;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
