//! Error types for webhook delivery operations.
//!
//! Defines every failure a delivery attempt or the dispatcher lifecycle can
//! run into, with categorisation used by the retry policy and for
//! structured logging.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure (refused, reset, TLS, DNS).
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// HTTP response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content, truncated
        body: String,
    },

    /// HTTP response indicated server error (5xx) or another non-success status.
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Response body content, truncated
        body: String,
    },

    /// Subscription store could not be queried.
    #[error("subscription store error: {message}")]
    StoreError {
        /// Store error message
        message: String,
    },

    /// Invalid endpoint or client configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Envelope could not be serialized.
    #[error("envelope serialization failed: {message}")]
    SerializationError {
        /// Serialization error message
        message: String,
    },

    /// Dispatcher shutdown did not finish in time.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a client error from HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError { message: message.into() }
    }

    /// Determines if a delivery attempt that failed with this error may be
    /// followed by another one.
    ///
    /// Every attempt-level failure qualifies, an unusable endpoint URL
    /// included. Client errors (4xx) are left to the retry policy switch.
    /// Store and shutdown failures never come out of a delivery attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::ConfigurationError { .. }
            | Self::SerializationError { .. } => true,

            Self::ClientError { .. } | Self::StoreError { .. } | Self::ShutdownTimeout { .. } => {
                false
            },
        }
    }

    /// Returns the HTTP status code if the endpoint responded.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. } | Self::ServerError { status_code, .. } => {
                Some(*status_code)
            },
            _ => None,
        }
    }
}

impl From<pawpost_core::CoreError> for DeliveryError {
    fn from(err: pawpost_core::CoreError) -> Self {
        Self::store(err.to_string())
    }
}

/// Category of delivery error for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Subscription store failures.
    Store,
    /// Configuration or serialization problems.
    Configuration,
    /// Dispatcher lifecycle errors.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::StoreError { .. } => Self::Store,
            DeliveryError::ConfigurationError { .. } | DeliveryError::SerializationError { .. } => {
                Self::Configuration
            },
            DeliveryError::ShutdownTimeout { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Store => write!(f, "store"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
