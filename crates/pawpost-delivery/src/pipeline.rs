//! Per-subscriber delivery pipeline.
//!
//! One pipeline runs for every subscriber of an event:
//!
//! ```text
//! acquire permit → decrypt secret → attempt 1 ─┬─ success ──────────▶ done
//!                                              └─ failure → policy ─┬─ retry: sleep, attempt n+1
//!                                                                   └─ give up ─▶ exhausted
//! ```
//!
//! Pipelines share nothing mutable except the stats counters, so one
//! subscriber's failure never affects another's delivery. Every suspension
//! point races the dispatcher's cancellation token.

use std::sync::Arc;

use pawpost_core::{
    models::{AttemptOutcome, DeliveryAttempt, Event, Subscription},
    AttemptCompletedEvent, Clock, DeliveryEvent, DeliveryExhaustedEvent, EventHandler,
    SubscriberSkippedEvent,
};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cipher::SecretCipher,
    client::{DeliveryClient, DeliveryEnvelope, DeliveryOutcome},
    dispatcher::DispatchStats,
    error::{DeliveryError, ErrorCategory},
    retry::{RetryDecision, RetryPolicy},
};

/// How a pipeline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineOutcome {
    /// The subscriber acknowledged the event.
    Delivered {
        /// Attempts it took
        attempts: u32,
    },
    /// Every allowed attempt failed.
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
    /// The subscriber was skipped before any attempt.
    Skipped,
    /// Shutdown cancelled the pipeline.
    Cancelled,
}

/// Delivers one event to one subscriber.
pub(crate) struct SubscriberPipeline {
    pub(crate) event: Arc<Event>,
    pub(crate) subscription: Subscription,
    pub(crate) cipher: SecretCipher,
    pub(crate) client: DeliveryClient,
    pub(crate) policy: RetryPolicy,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) stats: Arc<RwLock<DispatchStats>>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) event_handler: Arc<dyn EventHandler>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl SubscriberPipeline {
    /// Runs the pipeline to completion or cancellation.
    pub(crate) async fn run(self) -> PipelineOutcome {
        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return PipelineOutcome::Cancelled,
            },
            () = self.cancellation_token.cancelled() => return PipelineOutcome::Cancelled,
        };

        let secret = match self.cipher.decrypt(&self.subscription.encrypted_secret) {
            Ok(secret) => secret,
            Err(e) => {
                self.skip(format!("secret could not be decrypted: {e}")).await;
                return PipelineOutcome::Skipped;
            },
        };

        let envelope =
            DeliveryEnvelope::new(self.event.kind().envelope_key(), self.event.payload(), secret);

        self.deliver(&envelope).await
    }

    async fn deliver(&self, envelope: &DeliveryEnvelope<'_>) -> PipelineOutcome {
        let url = self.subscription.endpoint_url.as_str();
        let mut attempt_number = 1;

        loop {
            let outcome = tokio::select! {
                outcome = self.client.send(url, envelope, attempt_number) => outcome,
                () = self.cancellation_token.cancelled() => {
                    info!(
                        event_id = %self.event.id(),
                        subscription_id = %self.subscription.id,
                        attempt = attempt_number,
                        "delivery cancelled by shutdown"
                    );
                    return PipelineOutcome::Cancelled;
                },
            };

            self.record_attempt(attempt_number, &outcome).await;

            let error = match outcome {
                DeliveryOutcome::Success { .. } => {
                    self.stats.write().await.deliveries_succeeded += 1;
                    return PipelineOutcome::Delivered { attempts: attempt_number };
                },
                DeliveryOutcome::TransientFailure { error, .. } => error,
            };

            match self.policy.decide(attempt_number, &error) {
                RetryDecision::Retry { delay } => {
                    debug!(
                        event_id = %self.event.id(),
                        subscription_id = %self.subscription.id,
                        attempt = attempt_number,
                        delay_ms = delay.as_millis(),
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        "delivery attempt failed, retrying"
                    );

                    tokio::select! {
                        () = self.clock.sleep(delay) => {},
                        () = self.cancellation_token.cancelled() => return PipelineOutcome::Cancelled,
                    }

                    attempt_number += 1;
                },
                RetryDecision::GiveUp { reason } => {
                    self.exhaust(attempt_number, &error, reason).await;
                    return PipelineOutcome::Exhausted { attempts: attempt_number };
                },
            }
        }
    }

    async fn record_attempt(&self, attempt_number: u32, outcome: &DeliveryOutcome) {
        let attempt_outcome = match outcome {
            DeliveryOutcome::Success { .. } => AttemptOutcome::Success,
            DeliveryOutcome::TransientFailure { .. } => AttemptOutcome::TransientFailure,
        };

        self.stats.write().await.attempts_made += 1;

        let attempt = DeliveryAttempt {
            event_id: self.event.id(),
            subscription_id: self.subscription.id,
            attempt_number,
            outcome: attempt_outcome,
            response_status: outcome.status_code(),
            error_message: outcome.error().map(ToString::to_string),
            duration_ms: u64::try_from(outcome.duration().as_millis()).unwrap_or(u64::MAX),
            attempted_at: self.clock.now_utc(),
        };

        self.event_handler
            .handle_event(DeliveryEvent::AttemptCompleted(AttemptCompletedEvent {
                attempt,
                endpoint_url: self.subscription.endpoint_url.clone(),
            }))
            .await;
    }

    async fn skip(&self, reason: String) {
        warn!(
            event_id = %self.event.id(),
            subscription_id = %self.subscription.id,
            reason = %reason,
            "skipping subscriber"
        );

        self.stats.write().await.subscribers_skipped += 1;

        self.event_handler
            .handle_event(DeliveryEvent::SubscriberSkipped(SubscriberSkippedEvent {
                event_id: self.event.id(),
                subscription_id: self.subscription.id,
                reason,
                skipped_at: self.clock.now_utc(),
            }))
            .await;
    }

    async fn exhaust(&self, attempts: u32, last_error: &DeliveryError, reason: String) {
        error!(
            event_id = %self.event.id(),
            subscription_id = %self.subscription.id,
            url = %self.subscription.endpoint_url,
            attempts,
            category = %ErrorCategory::from(last_error),
            error = %last_error,
            reason = %reason,
            "delivery abandoned"
        );

        self.stats.write().await.deliveries_exhausted += 1;

        self.event_handler
            .handle_event(DeliveryEvent::DeliveryExhausted(DeliveryExhaustedEvent {
                event_id: self.event.id(),
                subscription_id: self.subscription.id,
                endpoint_url: self.subscription.endpoint_url.clone(),
                attempts,
                last_error: last_error.to_string(),
                reason,
                exhausted_at: self.clock.now_utc(),
            }))
            .await;
    }
}
