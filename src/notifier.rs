//! Entry point used by the API layer to announce domain changes.
//!
//! A [`Notifier`] owns the dispatcher and everything it needs. Callers hand
//! it an event after their own write has committed and move on; delivery
//! outcomes are only visible in logs and [`DispatchStats`].

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use pawpost_core::{
    models::{DogRecord, Event},
    storage::Storage,
    EventHandler, FanoutEventHandler,
};
use pawpost_delivery::{
    DeliveryClient, DispatchStats, Dispatcher, PostgresSubscriptionStore, SecretCipher,
    SubscriptionStore,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use crate::config::Config;

/// Fire-and-forget webhook notifier.
pub struct Notifier {
    dispatcher: Dispatcher,
    cipher: SecretCipher,
    event_handlers: FanoutEventHandler,
    storage: Option<Arc<Storage>>,
    shutdown_timeout: Duration,
}

impl Notifier {
    /// Connects to the database and builds the full delivery stack.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, the key is unusable,
    /// or the database cannot be reached.
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate()?;

        let cipher = SecretCipher::new(config.encryption_key.as_bytes())
            .context("Failed to initialise secret cipher")?;

        info!(
            database_url = %config.database_url_masked(),
            max_connections = config.database_max_connections,
            "Connecting notifier to subscription database"
        );

        let pool = create_database_pool(config).await?;
        let storage = Arc::new(Storage::new(pool));
        storage.ensure_schema().await.context("Failed to ensure subscription schema")?;

        let store = Arc::new(PostgresSubscriptionStore::new(storage.clone()));
        let mut notifier = Self::from_parts(store, cipher, config)?;
        notifier.storage = Some(storage);

        info!(
            max_attempts = config.max_delivery_attempts,
            retry_delay_ms = config.retry_delay_ms,
            max_concurrent_deliveries = config.max_concurrent_deliveries,
            "Notifier ready"
        );

        Ok(notifier)
    }

    /// Builds a notifier around an existing subscription store.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client or dispatcher cannot be built from
    /// `config`.
    pub fn from_parts(
        store: Arc<dyn SubscriptionStore>,
        cipher: SecretCipher,
        config: &Config,
    ) -> Result<Self> {
        let client = DeliveryClient::new(config.to_client_config())
            .context("Failed to build delivery client")?;

        let dispatcher = Dispatcher::new(store, cipher.clone(), client, config.to_dispatch_config())
            .context("Failed to build dispatcher")?;

        Ok(Self {
            dispatcher,
            cipher,
            event_handlers: FanoutEventHandler::default(),
            storage: None,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Adds `handler` to the receivers of delivery events.
    ///
    /// Handlers added earlier keep receiving events.
    #[must_use]
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handlers.push(handler);
        self.dispatcher =
            self.dispatcher.with_event_handler(Arc::new(self.event_handlers.clone()));
        self
    }

    /// Hands `event` to the background dispatcher and returns immediately.
    pub fn notify(&self, event: Event) {
        self.dispatcher.dispatch(event);
    }

    /// Announces a newly added dog to `new_dog_added` subscribers.
    pub fn notify_new_dog(&self, dog: &DogRecord) {
        match Event::new_dog_added(dog) {
            Ok(event) => self.notify(event),
            Err(e) => error!(dog_id = dog.id, error = %e, "Failed to build new dog event"),
        }
    }

    /// The cipher subscriber secrets are sealed with.
    ///
    /// The CRUD layer must encrypt new secrets with this same cipher.
    pub fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }

    /// Database storage, when connected through [`Notifier::connect`].
    pub fn storage(&self) -> Option<&Arc<Storage>> {
        self.storage.as_ref()
    }

    /// Returns a snapshot of the dispatcher counters.
    pub async fn stats(&self) -> DispatchStats {
        self.dispatcher.stats().await
    }

    /// Drains in-flight deliveries and closes the database pool.
    ///
    /// # Errors
    ///
    /// Returns error if deliveries had to be cancelled after the configured
    /// shutdown timeout.
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.dispatcher.shutdown(self.shutdown_timeout).await;

        if let Some(storage) = &self.storage {
            storage.subscriptions.pool().close().await;
            info!("Database connections closed");
        }

        result.context("Notifier shutdown did not complete cleanly")
    }
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
