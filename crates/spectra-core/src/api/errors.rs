use crate::{cache::PatchError, types::EndpointKind};
use thiserror::Error;

/// Misuse of the API surface: unknown endpoints, bad setup, calls after disposal.
///
/// Transport failures are never reported here; they land on the cache entry or the
/// mutation result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Endpoint {name} is a {actual}, expected a {expected}")]
    WrongEndpointKind { name: String, expected: &'static str, actual: &'static str },

    #[error("Endpoint {0} is already defined")]
    DuplicateEndpoint(String),

    #[error("No base query configured")]
    MissingBaseQuery,

    #[error("No tokio runtime available; build the Api from within a runtime")]
    NoRuntime,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Arguments for {endpoint} could not be serialized: {message}")]
    InvalidArgs { endpoint: String, message: String },

    #[error("Api has been disposed")]
    Disposed,

    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl ApiError {
    pub(crate) fn wrong_kind(name: &str, expected: EndpointKind, actual: EndpointKind) -> Self {
        Self::WrongEndpointKind {
            name: name.to_string(),
            expected: expected.as_str(),
            actual: actual.as_str(),
        }
    }
}
