//! HTTP client for single delivery attempts.
//!
//! Builds the JSON envelope, performs one POST and classifies the outcome
//! for the retry policy. The client never retries on its own and never
//! logs the envelope body.

use std::{fmt, time::Duration};

use bytes::Bytes;
use reqwest::Response;
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use tracing::{info_span, Instrument};
use zeroize::Zeroizing;

use crate::error::{DeliveryError, Result};

/// Largest response body kept for diagnostics.
const MAX_DIAGNOSTIC_BODY: usize = 1024;

/// Configuration for the delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for one HTTP attempt.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Pawpost-Webhook-Delivery/1.0".to_string(),
            max_redirects: 10,
        }
    }
}

/// JSON body sent to a subscriber.
///
/// Serializes as `{ "<envelope key>": <payload>, "secret": "<secret>" }`.
/// Exists only for the duration of one subscriber's attempts and never
/// appears in `Debug` output. The envelope's own copy of the secret is
/// wiped when it drops, and so is each request body once the HTTP stack
/// releases it. Buffers inside the TLS layer are not covered.
pub struct DeliveryEnvelope<'a> {
    key: &'static str,
    payload: &'a serde_json::Value,
    secret: Zeroizing<String>,
}

impl<'a> DeliveryEnvelope<'a> {
    /// Creates an envelope for one subscriber.
    pub fn new(key: &'static str, payload: &'a serde_json::Value, secret: Zeroizing<String>) -> Self {
        Self { key, payload, secret }
    }

    /// Serializes the envelope into a request body.
    ///
    /// The body buffer is zeroized when the last handle to it drops.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::SerializationError` if the payload cannot be
    /// encoded.
    pub fn to_body(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(|body| Bytes::from_owner(Zeroizing::new(body)))
            .map_err(|e| DeliveryError::serialization(e.to_string()))
    }
}

impl Serialize for DeliveryEnvelope<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.key, self.payload)?;
        map.serialize_entry("secret", self.secret.as_str())?;
        map.end()
    }
}

impl fmt::Debug for DeliveryEnvelope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryEnvelope")
            .field("key", &self.key)
            .field("payload", self.payload)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Classified result of one delivery attempt.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// Endpoint answered with a status in 200..=399.
    Success {
        /// HTTP status code
        status_code: u16,
        /// Round-trip duration
        duration: Duration,
    },
    /// Any other result; eligible for retry.
    TransientFailure {
        /// What went wrong
        error: DeliveryError,
        /// Round-trip duration, zero if the request never left the process
        duration: Duration,
    },
}

impl DeliveryOutcome {
    /// Returns true for a successful attempt.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// HTTP status code, if the endpoint answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Success { status_code, .. } => Some(*status_code),
            Self::TransientFailure { error, .. } => error.status_code(),
        }
    }

    /// Duration of the request.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Success { duration, .. } | Self::TransientFailure { duration, .. } => *duration,
        }
    }

    /// The error for failed attempts.
    pub fn error(&self) -> Option<&DeliveryError> {
        match self {
            Self::Success { .. } => None,
            Self::TransientFailure { error, .. } => Some(error),
        }
    }
}

/// HTTP client for subscriber deliveries.
///
/// Uses connection pooling so concurrent pipelines share sockets. Cheap to
/// clone.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs one delivery attempt.
    ///
    /// POSTs the envelope as `application/json` and classifies the result:
    /// 200..=399 is a success. Everything else is a transient failure,
    /// including an unusable URL or an envelope that cannot be serialized.
    pub async fn send(
        &self,
        url: &str,
        envelope: &DeliveryEnvelope<'_>,
        attempt_number: u32,
    ) -> DeliveryOutcome {
        let span = info_span!("webhook_delivery", url = %url, attempt = attempt_number);

        async move {
            let target = match reqwest::Url::parse(url) {
                Ok(target) => target,
                Err(e) => {
                    tracing::warn!(error = %e, "Endpoint URL is not valid");
                    return DeliveryOutcome::TransientFailure {
                        error: DeliveryError::configuration(format!("invalid endpoint url: {e}")),
                        duration: Duration::ZERO,
                    };
                },
            };

            let body = match envelope.to_body() {
                Ok(body) => body,
                Err(error) => {
                    tracing::warn!(error = %error, "Envelope could not be serialized");
                    return DeliveryOutcome::TransientFailure { error, duration: Duration::ZERO };
                },
            };

            tracing::debug!(body_bytes = body.len(), "Starting webhook delivery");
            let start_time = std::time::Instant::now();

            let response = match self
                .client
                .post(target)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "Request failed: {}", e);
                    return DeliveryOutcome::TransientFailure {
                        error: self.classify_transport_error(&e),
                        duration,
                    };
                },
            };

            let status_code = response.status().as_u16();
            let duration = start_time.elapsed();

            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "Received response"
            );

            match status_code {
                200..=399 => {
                    tracing::info!(status = status_code, "Webhook delivered successfully");
                    DeliveryOutcome::Success { status_code, duration }
                },
                400..=499 => {
                    let body = read_diagnostic_body(response).await;
                    tracing::warn!(status = status_code, "Client error response");
                    DeliveryOutcome::TransientFailure {
                        error: DeliveryError::client_error(status_code, body),
                        duration,
                    }
                },
                _ => {
                    let body = read_diagnostic_body(response).await;
                    tracing::warn!(status = status_code, "Server error response");
                    DeliveryOutcome::TransientFailure {
                        error: DeliveryError::server_error(status_code, body),
                        duration,
                    }
                },
            }
        }
        .instrument(span)
        .await
    }

    fn classify_transport_error(&self, e: &reqwest::Error) -> DeliveryError {
        if e.is_timeout() {
            return DeliveryError::timeout(self.config.timeout.as_secs());
        }
        if e.is_connect() {
            return DeliveryError::network(format!("connection failed: {e}"));
        }
        DeliveryError::network(e.to_string())
    }
}

/// Reads at most `MAX_DIAGNOSTIC_BODY` bytes of a response for error context.
async fn read_diagnostic_body(response: Response) -> String {
    match response.bytes().await {
        Ok(bytes) => truncate_body(&bytes),
        Err(e) => {
            tracing::debug!("Failed to read response body: {}", e);
            format!("[Failed to read response body: {e}]")
        },
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_DIAGNOSTIC_BODY {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    let suffix = "... (truncated)";
    let truncated = String::from_utf8_lossy(&bytes[..MAX_DIAGNOSTIC_BODY - suffix.len()]);
    format!("{truncated}{suffix}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn payload() -> serde_json::Value {
        json!({ "id": 42, "name": "Rex", "breed": "Beagle" })
    }

    fn secret() -> Zeroizing<String> {
        Zeroizing::new("subscriber-shared-secret".to_string())
    }

    async fn send_to(server: &MockServer, status: u16) -> DeliveryOutcome {
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("response body"))
            .mount(server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let payload = payload();
        let envelope = DeliveryEnvelope::new("new_dog", &payload, secret());
        client.send(&format!("{}/hooks", server.uri()), &envelope, 1).await
    }

    #[tokio::test]
    async fn successful_delivery() {
        let server = MockServer::start().await;
        let outcome = send_to(&server, 200).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.status_code(), Some(200));
        assert!(outcome.error().is_none());
    }

    #[tokio::test]
    async fn redirect_class_status_counts_as_success() {
        let server = MockServer::start().await;
        let outcome = send_to(&server, 300).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.status_code(), Some(300));
    }

    #[tokio::test]
    async fn client_error_is_transient() {
        let server = MockServer::start().await;
        let outcome = send_to(&server, 404).await;

        match outcome {
            DeliveryOutcome::TransientFailure {
                error: DeliveryError::ClientError { status_code, body },
                ..
            } => {
                assert_eq!(status_code, 404);
                assert_eq!(body, "response body");
            },
            other => panic!("expected transient client error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        let outcome = send_to(&server, 503).await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::TransientFailure {
                error: DeliveryError::ServerError { status_code: 503, .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn envelope_wire_format() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hooks"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_json(json!({
                "new_dog": { "id": 42, "name": "Rex", "breed": "Beagle" },
                "secret": "subscriber-shared-secret"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let payload = payload();
        let envelope = DeliveryEnvelope::new("new_dog", &payload, secret());
        let outcome = client.send(&format!("{}/hooks", server.uri()), &envelope, 1).await;

        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn connection_refused_is_transient_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = DeliveryClient::with_defaults().unwrap();
        let payload = payload();
        let envelope = DeliveryEnvelope::new("new_dog", &payload, secret());
        let outcome = client.send(&format!("http://{addr}/hooks"), &envelope, 2).await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::TransientFailure { error: DeliveryError::NetworkError { .. }, .. }
        ));
        assert_eq!(outcome.status_code(), None);
    }

    #[tokio::test]
    async fn request_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = DeliveryClient::new(ClientConfig {
            timeout: Duration::from_millis(100),
            ..ClientConfig::default()
        })
        .unwrap();
        let payload = payload();
        let envelope = DeliveryEnvelope::new("new_dog", &payload, secret());
        let outcome = client.send(&server.uri(), &envelope, 1).await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::TransientFailure { error: DeliveryError::Timeout { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn invalid_url_is_transient() {
        let client = DeliveryClient::with_defaults().unwrap();
        let payload = payload();
        let envelope = DeliveryEnvelope::new("new_dog", &payload, secret());
        let outcome = client.send("not a url", &envelope, 1).await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::TransientFailure {
                error: DeliveryError::ConfigurationError { .. },
                ..
            }
        ));
        assert_eq!(outcome.duration(), Duration::ZERO);
    }

    #[test]
    fn each_body_is_a_fresh_copy_of_the_envelope() {
        let payload = payload();
        let envelope = DeliveryEnvelope::new("new_dog", &payload, secret());

        let first = envelope.to_body().unwrap();
        let second = envelope.to_body().unwrap();
        assert_eq!(first, second);
        assert_ne!(first.as_ptr(), second.as_ptr());

        let parsed: serde_json::Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(parsed, json!({ "new_dog": self::payload(), "secret": "subscriber-shared-secret" }));
    }

    #[test]
    fn envelope_debug_redacts_secret() {
        let payload = payload();
        let envelope = DeliveryEnvelope::new("new_dog", &payload, secret());
        let debug = format!("{envelope:?}");

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("subscriber-shared-secret"));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = vec![b'x'; 4096];
        let truncated = truncate_body(&body);

        assert_eq!(truncated.len(), MAX_DIAGNOSTIC_BODY);
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncate_body(b"short"), "short");
    }
}
