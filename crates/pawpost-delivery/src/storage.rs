//! Subscription store abstraction for the dispatcher.
//!
//! The dispatcher only ever reads a snapshot of the subscribers interested
//! in one event kind. Production reads go through
//! `pawpost_core::storage::Storage`; tests use the in-memory store in
//! [`mock`].

use std::{future::Future, pin::Pin, sync::Arc};

use pawpost_core::{
    error::Result,
    models::{EventKind, Subscription},
};

/// Read access to subscriber records required by the dispatcher.
///
/// Implementations must tolerate concurrent calls from many dispatches and
/// must return the current state on every call.
pub trait SubscriptionStore: Send + Sync + 'static {
    /// Returns every subscription interested in `kind`.
    fn find_by_event_kind(
        &self,
        kind: EventKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>>;
}

/// Production store backed by PostgreSQL.
pub struct PostgresSubscriptionStore {
    storage: Arc<pawpost_core::storage::Storage>,
}

impl PostgresSubscriptionStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<pawpost_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl SubscriptionStore for PostgresSubscriptionStore {
    fn find_by_event_kind(
        &self,
        kind: EventKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>> {
        Box::pin(async move { self.storage.subscriptions.find_by_event_kind(kind).await })
    }
}

pub mod mock {
    //! In-memory subscription store for tests.
    //!
    //! Stores subscriptions in insertion order, supports one-shot error
    //! injection and counts queries so tests can verify the dispatcher
    //! re-reads the snapshot for every event.

    use std::{
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use pawpost_core::{
        error::{CoreError, Result},
        models::{EventKind, Subscription, SubscriptionId},
    };
    use tokio::sync::RwLock;

    use super::SubscriptionStore;

    /// Mock store holding subscriptions in memory.
    #[derive(Clone, Default)]
    pub struct MockSubscriptionStore {
        subscriptions: Arc<RwLock<Vec<Subscription>>>,
        query_error: Arc<RwLock<Option<String>>>,
        query_count: Arc<AtomicUsize>,
    }

    impl MockSubscriptionStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds a subscription.
        pub async fn add_subscription(&self, subscription: Subscription) {
            self.subscriptions.write().await.push(subscription);
        }

        /// Removes a subscription, returning whether it existed.
        pub async fn remove_subscription(&self, id: SubscriptionId) -> bool {
            let mut subscriptions = self.subscriptions.write().await;
            let before = subscriptions.len();
            subscriptions.retain(|s| s.id != id);
            subscriptions.len() != before
        }

        /// Makes the next query fail with a database error.
        pub async fn inject_query_error(&self, error: impl Into<String>) {
            *self.query_error.write().await = Some(error.into());
        }

        /// Number of snapshot queries served so far.
        pub fn query_count(&self) -> usize {
            self.query_count.load(Ordering::SeqCst)
        }
    }

    impl SubscriptionStore for MockSubscriptionStore {
        fn find_by_event_kind(
            &self,
            kind: EventKind,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>> {
            Box::pin(async move {
                self.query_count.fetch_add(1, Ordering::SeqCst);

                if let Some(error) = self.query_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                Ok(self
                    .subscriptions
                    .read()
                    .await
                    .iter()
                    .filter(|s| s.is_subscribed_to(kind))
                    .cloned()
                    .collect())
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use pawpost_core::models::OwnerId;

        use super::*;

        fn subscription(id: i32, kinds: Vec<EventKind>) -> Subscription {
            Subscription {
                id: SubscriptionId(id),
                endpoint_url: format!("https://hooks.example.com/{id}"),
                encrypted_secret: "c2VhbGVk".to_string(),
                event_kinds: kinds,
                owner_id: OwnerId(1),
            }
        }

        #[tokio::test]
        async fn filters_by_event_kind() {
            let store = MockSubscriptionStore::new();
            store.add_subscription(subscription(1, vec![EventKind::NewDogAdded])).await;
            store.add_subscription(subscription(2, vec![])).await;

            let found = store.find_by_event_kind(EventKind::NewDogAdded).await.unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, SubscriptionId(1));
        }

        #[tokio::test]
        async fn injected_error_is_consumed_once() {
            let store = MockSubscriptionStore::new();
            store.inject_query_error("connection refused").await;

            assert!(store.find_by_event_kind(EventKind::NewDogAdded).await.is_err());
            assert!(store.find_by_event_kind(EventKind::NewDogAdded).await.is_ok());
            assert_eq!(store.query_count(), 2);
        }

        #[tokio::test]
        async fn removed_subscriptions_disappear_from_snapshots() {
            let store = MockSubscriptionStore::new();
            store.add_subscription(subscription(1, vec![EventKind::NewDogAdded])).await;

            assert!(store.remove_subscription(SubscriptionId(1)).await);
            assert!(!store.remove_subscription(SubscriptionId(1)).await);
            assert!(store.find_by_event_kind(EventKind::NewDogAdded).await.unwrap().is_empty());
        }
    }
}
