use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Classification of request failures for metrics labels and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failed before a response was produced.
    Network,
    /// Transport produced a response encoding a non-2xx outcome.
    Http,
    /// Response could not be decoded.
    Parsing,
    /// Request exceeded the configured timeout.
    Timeout,
    /// Request was superseded or aborted by its consumer.
    Cancelled,
    /// Base query reported a structured error payload.
    Custom,
}

impl ErrorKind {
    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Http => "http",
            Self::Parsing => "parsing",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Custom => "custom",
        }
    }
}

/// Error surfaced to consumers through a cache entry or a mutation result.
///
/// Errors are values: they are stored on entries, delivered to every subscriber and cloned
/// freely. Only `MutationHandle::unwrap` turns them into an `Err` for the caller.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum QueryError {
    /// Transport failed (connection refused, reset, DNS, ...).
    #[error("Network error: {message}")]
    Network { message: String },

    /// Non-2xx outcome. `body` carries whatever the transport decoded from the response.
    #[error("HTTP error: {status}")]
    Http { status: u16, body: Value },

    /// Response payload could not be decoded.
    #[error("Parsing error: {message}")]
    Parsing { message: String },

    /// Request exceeded the configured timeout.
    #[error("Request timeout")]
    Timeout,

    /// Request was superseded by a newer one or aborted by its consumer.
    #[error("Request cancelled")]
    Cancelled,

    /// Structured error payload reported by the base query.
    #[error("Custom error: {payload}")]
    Custom { payload: Value },
}

impl QueryError {
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    #[must_use]
    pub fn http(status: u16, body: Value) -> Self {
        Self::Http { status, body }
    }

    #[must_use]
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::Parsing { message: message.into() }
    }

    #[must_use]
    pub fn custom(payload: Value) -> Self {
        Self::Custom { payload }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Http { .. } => ErrorKind::Http,
            Self::Parsing { .. } => ErrorKind::Parsing,
            Self::Timeout => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Custom { .. } => ErrorKind::Custom,
        }
    }

    /// Returns the HTTP status if this is an HTTP-class error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    ///
    /// Transient errors include:
    /// - Network failures and timeouts
    /// - HTTP 5xx and 429 when `include_server_errors` is set
    #[must_use]
    pub fn is_transient(&self, include_server_errors: bool) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout => true,
            Self::Http { status, .. } => {
                include_server_errors && ((500..=599).contains(status) || *status == 429)
            }
            _ => false,
        }
    }

    /// Returns `true` if retrying won't help.
    ///
    /// Permanent errors include:
    /// - HTTP 4xx (except 429)
    /// - Parsing failures and custom payloads
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Parsing { .. } | Self::Custom { .. } => true,
            Self::Http { status, .. } => (400..=499).contains(status) && *status != 429,
            _ => false,
        }
    }
}
