//! Test fixtures and helpers for pawpost.
//!
//! Provides deterministic keys, subscription builders, an event recorder for
//! observing background dispatch, HTTP helpers for unreachable or flaky
//! subscriber endpoints and access to a shared test database.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod database;
pub mod events;
pub mod fixtures;
pub mod http;

pub use database::TestDatabase;
pub use events::RecordingEventHandler;
pub use fixtures::{corrupt_ciphertext, sample_dog, test_cipher, SubscriptionBuilder, TEST_KEY};
pub use http::{mount_status_sequence, unreachable_endpoint};
pub use pawpost_core::TestClock;
