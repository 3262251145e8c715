//! Repository for subscriber records.
//!
//! Subscriptions map onto the `UserWebhooks` table: the endpoint URL, the
//! encrypted shared secret, the array of subscribed action names and the
//! owning user. Action names the system does not recognise are ignored on
//! read so older or newer rows never break a dispatch.

use std::{str::FromStr, sync::Arc};

use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{
        EventKind, NewSubscription, OwnerId, Subscription, SubscriptionId, SubscriptionUpdate,
    },
};

const SELECT_COLUMNS: &str =
    "SELECT id, webhook_endpoint, client_secret, webhook_actions, user_id FROM UserWebhooks";

/// Raw row shape of the `UserWebhooks` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubscriptionRow {
    id: i32,
    webhook_endpoint: String,
    client_secret: String,
    webhook_actions: Vec<String>,
    user_id: i32,
}

impl SubscriptionRow {
    fn into_subscription(self) -> Subscription {
        Subscription {
            id: SubscriptionId(self.id),
            endpoint_url: self.webhook_endpoint,
            encrypted_secret: self.client_secret,
            event_kinds: parse_event_kinds(&self.webhook_actions),
            owner_id: OwnerId(self.user_id),
        }
    }
}

/// Parses stored action names, dropping unknown ones and duplicates.
pub(crate) fn parse_event_kinds(actions: &[String]) -> Vec<EventKind> {
    let mut kinds = Vec::with_capacity(actions.len());
    for kind in actions.iter().filter_map(|a| EventKind::from_str(a).ok()) {
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    kinds
}

/// Repository for subscription database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Registers a new subscription.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if validation fails, or a database
    /// error if the insert fails.
    pub async fn create(&self, subscription: &NewSubscription) -> Result<SubscriptionId> {
        self.create_impl(&*self.pool, subscription).await
    }

    /// Registers a new subscription within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if validation or the insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        subscription: &NewSubscription,
    ) -> Result<SubscriptionId> {
        self.create_impl(&mut **tx, subscription).await
    }

    async fn create_impl<'e, E>(
        &self,
        executor: E,
        subscription: &NewSubscription,
    ) -> Result<SubscriptionId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        subscription.validate()?;

        let actions: Vec<&str> = subscription.event_kinds.iter().map(EventKind::as_str).collect();

        let id: i32 = sqlx::query_scalar(
            r"
            INSERT INTO UserWebhooks (webhook_endpoint, client_secret, webhook_actions, user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            ",
        )
        .bind(&subscription.endpoint_url)
        .bind(&subscription.encrypted_secret)
        .bind(&actions)
        .bind(subscription.owner_id)
        .fetch_one(executor)
        .await?;

        Ok(SubscriptionId(id))
    }

    /// Finds every subscription interested in `kind`.
    ///
    /// Always reads the current table state; callers must not cache the
    /// result across events.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_event_kind(&self, kind: EventKind) -> Result<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE $1 = ANY(webhook_actions) ORDER BY id"))
                .bind(kind.as_str())
                .fetch_all(&*self.pool)
                .await?;

        Ok(rows.into_iter().map(SubscriptionRow::into_subscription).collect())
    }

    /// Finds a subscription by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row.map(SubscriptionRow::into_subscription))
    }

    /// Finds all subscriptions registered by one user.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE user_id = $1 ORDER BY id"))
                .bind(owner_id)
                .fetch_all(&*self.pool)
                .await?;

        Ok(rows.into_iter().map(SubscriptionRow::into_subscription).collect())
    }

    /// Applies a partial update to a subscription.
    ///
    /// Only the fields set in `update` change; the rest keep their stored
    /// values.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if validation fails,
    /// `CoreError::NotFound` if no subscription has this ID, or a database
    /// error if the update fails.
    pub async fn update(&self, id: SubscriptionId, update: &SubscriptionUpdate) -> Result<()> {
        update.validate()?;

        let actions: Option<Vec<&str>> =
            update.event_kinds.as_ref().map(|kinds| kinds.iter().map(EventKind::as_str).collect());

        let result = sqlx::query(
            r"
            UPDATE UserWebhooks
            SET webhook_endpoint = COALESCE($2, webhook_endpoint),
                client_secret = COALESCE($3, client_secret),
                webhook_actions = COALESCE($4, webhook_actions)
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(update.endpoint_url.as_deref())
        .bind(update.encrypted_secret.as_deref())
        .bind(actions)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("subscription {id}")));
        }

        Ok(())
    }

    /// Deletes a subscription, returning whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, id: SubscriptionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM UserWebhooks WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_and_duplicate_actions_are_dropped() {
        let actions = vec![
            "new_dog_added".to_string(),
            "dog_adopted".to_string(),
            "new_dog_added".to_string(),
        ];

        assert_eq!(parse_event_kinds(&actions), vec![EventKind::NewDogAdded]);
        assert!(parse_event_kinds(&[]).is_empty());
    }

    #[test]
    fn row_maps_onto_subscription() {
        let row = SubscriptionRow {
            id: 11,
            webhook_endpoint: "https://hooks.example.com/dogs".to_string(),
            client_secret: "Y2lwaGVydGV4dA==".to_string(),
            webhook_actions: vec!["new_dog_added".to_string()],
            user_id: 5,
        };

        let subscription = row.into_subscription();

        assert_eq!(subscription.id, SubscriptionId(11));
        assert_eq!(subscription.owner_id, OwnerId(5));
        assert_eq!(subscription.encrypted_secret, "Y2lwaGVydGV4dA==");
        assert!(subscription.is_subscribed_to(EventKind::NewDogAdded));
    }
}
