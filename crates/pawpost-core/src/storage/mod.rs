//! Database access layer for subscriber records.
//!
//! The repository translates between the domain `Subscription` model and
//! the `UserWebhooks` table owned by the surrounding CRUD layer. All SQL
//! touching that table lives in this module.

use std::sync::Arc;

use sqlx::PgPool;

pub mod subscriptions;

use crate::error::Result;

/// Container for repository instances sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Repository for subscriber records.
    pub subscriptions: Arc<subscriptions::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self { subscriptions: Arc::new(subscriptions::Repository::new(pool)) }
    }

    /// Creates the subscription table if it does not exist yet.
    ///
    /// The CRUD layer normally owns the schema; this keeps the notifier
    /// usable against a fresh database. The owner foreign key is left to
    /// the owning schema.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS UserWebhooks (
                id SERIAL PRIMARY KEY,
                webhook_endpoint TEXT NOT NULL,
                client_secret TEXT NOT NULL,
                webhook_actions TEXT[] NOT NULL,
                user_id INTEGER NOT NULL
            )
            ",
        )
        .execute(&*self.subscriptions.pool())
        .await?;

        Ok(())
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.subscriptions.pool()).await?;

        Ok(())
    }
}
