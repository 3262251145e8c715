//! Database access for repository tests.
//!
//! Every test shares one pool against `DATABASE_URL`. Repository methods
//! write through that pool, so tests keep their rows apart with
//! [`TestDatabase::unique_owner`] and remove them afterwards. Work that
//! should never be visible to other tests goes through
//! [`TestDatabase::begin`] and is rolled back.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use pawpost_core::{models::OwnerId, storage::Storage};
use rand::Rng;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tokio::sync::OnceCell;
use tracing::debug;

static SHARED_POOL: OnceCell<PgPool> = OnceCell::const_new();

/// Handle to the shared test database.
#[derive(Debug, Clone)]
pub struct TestDatabase {
    pool: PgPool,
}

impl TestDatabase {
    /// Connects to the shared test database and makes sure the
    /// subscription table exists.
    ///
    /// Returns `None` when `DATABASE_URL` is not set, so suites can run on
    /// machines without Postgres.
    ///
    /// # Errors
    ///
    /// Returns error if `DATABASE_URL` is set but unusable.
    pub async fn from_env() -> Result<Option<Self>> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping database test");
            return Ok(None);
        };

        let pool = SHARED_POOL
            .get_or_try_init(|| async {
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect(&database_url)
                    .await
                    .context("failed to create shared test pool")?;

                Storage::new(pool.clone())
                    .ensure_schema()
                    .await
                    .context("failed to create subscription table")?;

                debug!("shared test pool ready");
                anyhow::Ok(pool)
            })
            .await?;

        Ok(Some(Self { pool: pool.clone() }))
    }

    /// The shared connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Storage backed by the shared pool.
    pub fn storage(&self) -> Arc<Storage> {
        Arc::new(Storage::new(self.pool.clone()))
    }

    /// Begins a transaction that rolls back when dropped uncommitted.
    ///
    /// # Errors
    ///
    /// Returns error if no connection can be acquired.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Returns an owner ID no other test is likely to use.
    pub fn unique_owner() -> OwnerId {
        OwnerId(rand::rng().random_range(1_000_000..i32::MAX))
    }

    /// Removes every subscription owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn remove_owner(&self, owner_id: OwnerId) -> Result<()> {
        sqlx::query("DELETE FROM UserWebhooks WHERE user_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
