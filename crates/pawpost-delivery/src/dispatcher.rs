//! Fire-and-forget fan-out of domain events to subscribers.
//!
//! `Dispatcher::dispatch` hands an event to a background task and returns
//! at once. The task loads the current subscriber snapshot and runs one
//! isolated pipeline per subscriber. Nothing is reported back to the caller;
//! outcomes surface as logs, [`DispatchStats`] and [`DeliveryEvent`]s.
//!
//! All background work is tracked, so [`Dispatcher::shutdown`] can drain it
//! or cancel it deterministically.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use pawpost_core::{
    models::Event, Clock, DeliveryEvent, DispatchAbortedEvent, DispatchCompletedEvent,
    EventHandler, NoOpEventHandler, RealClock,
};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{RwLock, Semaphore},
    task::JoinSet,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    cipher::SecretCipher,
    client::DeliveryClient,
    error::{DeliveryError, ErrorCategory, Result},
    pipeline::{PipelineOutcome, SubscriberPipeline},
    retry::RetryPolicy,
    storage::SubscriptionStore,
};

/// Configuration for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Retry policy applied to every subscriber.
    pub retry_policy: RetryPolicy,

    /// Upper bound on subscriber pipelines running at once, across events.
    pub max_concurrent_deliveries: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            max_concurrent_deliveries: crate::DEFAULT_MAX_CONCURRENT_DELIVERIES,
        }
    }
}

/// Counters for dispatcher monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events accepted and fanned out.
    pub events_dispatched: u64,
    /// Events whose subscriber snapshot could not be loaded.
    pub events_aborted: u64,
    /// Events refused because the dispatcher was shutting down.
    pub events_rejected: u64,
    /// Subscriber deliveries acknowledged by the endpoint.
    pub deliveries_succeeded: u64,
    /// Subscriber deliveries abandoned after the final attempt.
    pub deliveries_exhausted: u64,
    /// Subscribers skipped before any attempt.
    pub subscribers_skipped: u64,
    /// HTTP attempts made.
    pub attempts_made: u64,
}

/// Background dispatcher for domain events.
pub struct Dispatcher {
    store: Arc<dyn SubscriptionStore>,
    cipher: SecretCipher,
    client: DeliveryClient,
    config: DispatchConfig,
    permits: Arc<Semaphore>,
    stats: Arc<RwLock<DispatchStats>>,
    rejected: AtomicU64,
    tracker: TaskTracker,
    cancellation_token: CancellationToken,
    event_handler: Arc<dyn EventHandler>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the policy allows no
    /// attempts or no pipeline may run concurrently.
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        cipher: SecretCipher,
        client: DeliveryClient,
        config: DispatchConfig,
    ) -> Result<Self> {
        if config.retry_policy.max_attempts == 0 {
            return Err(DeliveryError::configuration("max_attempts must be greater than 0"));
        }
        if config.max_concurrent_deliveries == 0 {
            return Err(DeliveryError::configuration(
                "max_concurrent_deliveries must be greater than 0",
            ));
        }

        Ok(Self {
            store,
            cipher,
            client,
            permits: Arc::new(Semaphore::new(config.max_concurrent_deliveries)),
            config,
            stats: Arc::new(RwLock::new(DispatchStats::default())),
            rejected: AtomicU64::new(0),
            tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
            event_handler: Arc::new(NoOpEventHandler::new()),
            clock: Arc::new(RealClock::new()),
        })
    }

    /// Replaces the observability event handler.
    #[must_use]
    pub fn with_event_handler(mut self, event_handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = event_handler;
        self
    }

    /// Replaces the clock used for backoff sleeps and timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the dispatcher configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Hands an event to the background and returns immediately.
    ///
    /// Never blocks on I/O and never reports delivery results. Must be
    /// called from within a Tokio runtime; otherwise, or once shutdown has
    /// begun, the event is dropped and logged.
    pub fn dispatch(&self, event: Event) {
        if self.tracker.is_closed() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_id = %event.id(),
                kind = %event.kind(),
                "dispatcher is shutting down, event dropped"
            );
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                error!(event_id = %event.id(), error = %e, "no async runtime, event dropped");
                return;
            },
        };

        debug!(event_id = %event.id(), kind = %event.kind(), "event accepted for dispatch");

        let task = DispatchTask {
            store: self.store.clone(),
            cipher: self.cipher.clone(),
            client: self.client.clone(),
            policy: self.config.retry_policy.clone(),
            permits: self.permits.clone(),
            stats: self.stats.clone(),
            tracker: self.tracker.clone(),
            cancellation_token: self.cancellation_token.clone(),
            event_handler: self.event_handler.clone(),
            clock: self.clock.clone(),
        };

        self.tracker.spawn_on(task.run(event), &handle);
    }

    /// Number of dispatch and pipeline tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Returns a snapshot of the dispatcher counters.
    pub async fn stats(&self) -> DispatchStats {
        let mut stats = self.stats.read().await.clone();
        stats.events_rejected = self.rejected.load(Ordering::Relaxed);
        stats
    }

    /// Stops accepting events and waits for in-flight work to finish.
    ///
    /// If the work does not drain within `timeout`, remaining pipelines are
    /// cancelled at their next suspension point.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if in-flight work had to be
    /// cancelled.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!(
            in_flight = self.tracker.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful dispatcher shutdown"
        );

        self.tracker.close();

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            info!("dispatcher shutdown completed");
            return Ok(());
        }

        error!(
            timeout_seconds = timeout.as_secs(),
            in_flight = self.tracker.len(),
            "dispatcher shutdown timed out, cancelling in-flight deliveries"
        );
        self.cancellation_token.cancel();
        self.tracker.wait().await;

        Err(DeliveryError::ShutdownTimeout { timeout })
    }

    /// Stops accepting events and cancels all in-flight work without waiting.
    pub fn cancel(&self) {
        self.tracker.close();
        self.cancellation_token.cancel();
    }
}

/// Background task fanning one event out to its subscribers.
struct DispatchTask {
    store: Arc<dyn SubscriptionStore>,
    cipher: SecretCipher,
    client: DeliveryClient,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
    stats: Arc<RwLock<DispatchStats>>,
    tracker: TaskTracker,
    cancellation_token: CancellationToken,
    event_handler: Arc<dyn EventHandler>,
    clock: Arc<dyn Clock>,
}

impl DispatchTask {
    async fn run(self, event: Event) {
        self.stats.write().await.events_dispatched += 1;

        let snapshot = tokio::select! {
            result = self.store.find_by_event_kind(event.kind()) => result,
            () = self.cancellation_token.cancelled() => {
                info!(event_id = %event.id(), "dispatch cancelled before subscribers were loaded");
                return;
            },
        };

        let subscriptions = match snapshot {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                let e = DeliveryError::from(e);
                error!(
                    event_id = %event.id(),
                    kind = %event.kind(),
                    category = %ErrorCategory::from(&e),
                    error = %e,
                    "failed to load subscribers, dispatch aborted"
                );
                self.stats.write().await.events_aborted += 1;
                self.event_handler
                    .handle_event(DeliveryEvent::DispatchAborted(DispatchAbortedEvent {
                        event_id: event.id(),
                        kind: event.kind(),
                        reason: e.to_string(),
                        aborted_at: self.clock.now_utc(),
                    }))
                    .await;
                return;
            },
        };

        let subscriber_count = subscriptions.len();
        info!(
            event_id = %event.id(),
            kind = %event.kind(),
            subscribers = subscriber_count,
            "dispatching event"
        );

        let event = Arc::new(event);
        let mut pipelines = JoinSet::new();

        for subscription in subscriptions {
            let pipeline = SubscriberPipeline {
                event: event.clone(),
                subscription,
                cipher: self.cipher.clone(),
                client: self.client.clone(),
                policy: self.policy.clone(),
                permits: self.permits.clone(),
                stats: self.stats.clone(),
                cancellation_token: self.cancellation_token.clone(),
                event_handler: self.event_handler.clone(),
                clock: self.clock.clone(),
            };
            pipelines.spawn(self.tracker.track_future(pipeline.run()));
        }

        let mut summary = Summary::default();
        while let Some(result) = pipelines.join_next().await {
            match result {
                Ok(PipelineOutcome::Delivered { attempts }) => {
                    summary.delivered += 1;
                    summary.attempts += attempts;
                },
                Ok(PipelineOutcome::Exhausted { attempts }) => {
                    summary.exhausted += 1;
                    summary.attempts += attempts;
                },
                Ok(PipelineOutcome::Skipped) => summary.skipped += 1,
                Ok(PipelineOutcome::Cancelled) => summary.interrupted += 1,
                Err(join_error) => {
                    error!(
                        event_id = %event.id(),
                        error = %join_error,
                        "subscriber pipeline crashed"
                    );
                    summary.interrupted += 1;
                },
            }
        }

        info!(
            event_id = %event.id(),
            subscribers = subscriber_count,
            delivered = summary.delivered,
            exhausted = summary.exhausted,
            skipped = summary.skipped,
            interrupted = summary.interrupted,
            attempts = summary.attempts,
            "dispatch finished"
        );

        self.event_handler
            .handle_event(DeliveryEvent::DispatchCompleted(DispatchCompletedEvent {
                event_id: event.id(),
                kind: event.kind(),
                subscribers: subscriber_count,
                delivered: summary.delivered,
                exhausted: summary.exhausted,
                skipped: summary.skipped,
                interrupted: summary.interrupted,
                completed_at: self.clock.now_utc(),
            }))
            .await;
    }
}

#[derive(Debug, Default)]
struct Summary {
    delivered: usize,
    exhausted: usize,
    skipped: usize,
    interrupted: usize,
    attempts: u32,
}

#[cfg(test)]
mod tests {
    use pawpost_core::{
        models::{EventKind, OwnerId, Subscription, SubscriptionId},
        TestClock,
    };
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::storage::mock::MockSubscriptionStore;

    const KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

    fn dispatcher(store: MockSubscriptionStore, config: DispatchConfig) -> Dispatcher {
        Dispatcher::new(
            Arc::new(store),
            SecretCipher::new(KEY).unwrap(),
            DeliveryClient::with_defaults().unwrap(),
            config,
        )
        .unwrap()
        .with_clock(Arc::new(TestClock::new()))
    }

    fn subscription(id: i32, url: String, secret: &str) -> Subscription {
        Subscription {
            id: SubscriptionId(id),
            endpoint_url: url,
            encrypted_secret: SecretCipher::new(KEY).unwrap().encrypt(secret).unwrap(),
            event_kinds: vec![EventKind::NewDogAdded],
            owner_id: OwnerId(1),
        }
    }

    fn event() -> Event {
        Event::new(EventKind::NewDogAdded, json!({ "id": 1, "name": "Fido" }))
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = DispatchConfig {
            retry_policy: RetryPolicy { max_attempts: 0, ..RetryPolicy::default() },
            ..DispatchConfig::default()
        };
        let result = Dispatcher::new(
            Arc::new(MockSubscriptionStore::new()),
            SecretCipher::new(KEY).unwrap(),
            DeliveryClient::with_defaults().unwrap(),
            config,
        );

        assert!(matches!(result, Err(DeliveryError::ConfigurationError { .. })));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = DispatchConfig { max_concurrent_deliveries: 0, ..DispatchConfig::default() };
        let result = Dispatcher::new(
            Arc::new(MockSubscriptionStore::new()),
            SecretCipher::new(KEY).unwrap(),
            DeliveryClient::with_defaults().unwrap(),
            config,
        );

        assert!(result.is_err());
    }

    #[test]
    fn dispatch_outside_runtime_is_dropped() {
        let dispatcher = dispatcher(MockSubscriptionStore::new(), DispatchConfig::default());

        dispatcher.dispatch(event());

        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(dispatcher.rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn drained_dispatch_updates_stats() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = MockSubscriptionStore::new();
        store.add_subscription(subscription(1, server.uri(), "shared-secret-one")).await;

        let dispatcher = dispatcher(store, DispatchConfig::default());
        dispatcher.dispatch(event());
        dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();

        let stats = dispatcher.stats().await;
        assert_eq!(stats.events_dispatched, 1);
        assert_eq!(stats.deliveries_succeeded, 1);
        assert_eq!(stats.attempts_made, 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn events_after_shutdown_are_rejected() {
        let dispatcher = dispatcher(MockSubscriptionStore::new(), DispatchConfig::default());
        dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();

        dispatcher.dispatch(event());

        assert_eq!(dispatcher.stats().await.events_rejected, 1);
        assert_eq!(dispatcher.stats().await.events_dispatched, 0);
    }
}
