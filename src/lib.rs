//! Webhook notifications for the dog adoption backend.
//!
//! Wires configuration, the secret cipher, the subscription store and the
//! background dispatcher into a single [`Notifier`] the API layer calls
//! after a domain change commits.
//!
//! ```no_run
//! use pawpost::{Config, Notifier};
//!
//! # async fn example(dog: pawpost_core::models::DogRecord) -> anyhow::Result<()> {
//! let config = Config::load()?;
//! pawpost::telemetry::init_from_config(&config);
//!
//! let notifier = Notifier::connect(&config).await?;
//!
//! // Returns immediately; delivery happens in the background.
//! notifier.notify_new_dog(&dog);
//!
//! notifier.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod notifier;
pub mod telemetry;

pub use config::Config;
pub use notifier::Notifier;
