//! Error types for the Tessera client.

use std::time::Duration;

use tessera_config::ConfigError;
use tessera_retry::{RetryDiagnostics, RetryError};
use tessera_routing::RoutingError;
use tessera_types::{RangeId, StatusCode, SubStatusCode, TransportError};

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by [`Client`](crate::Client) operations.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// No replica in any permitted region caught up with the session token.
    #[error("read session not available ({diagnostics})")]
    ReadSessionNotAvailable { diagnostics: Box<RetryDiagnostics> },

    /// The collection is gone, or still missing after an identity refresh.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A point operation was given a prefix of a hierarchical key.
    #[error("partition key has {provided} of {expected} components")]
    IncompletePartitionKey { provided: usize, expected: usize },

    /// The key has more components than the collection defines.
    #[error("partition key has {provided} components, collection defines {expected}")]
    PartitionKeyMismatch { provided: usize, expected: usize },

    /// The backend asked us to back off. Not retried by the client.
    #[error("request throttled, retry after {retry_after:?}")]
    Throttled {
        retry_after: Option<Duration>,
        diagnostics: Box<RetryDiagnostics>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("authentication failed: {reason}")]
    AuthenticationFailed {
        reason: String,
        diagnostics: Box<RetryDiagnostics>,
    },

    #[error("transport failed: {source}")]
    Transport {
        #[source]
        source: TransportError,
        diagnostics: Box<RetryDiagnostics>,
    },

    /// 410/1000 seen again after the identity was refreshed once.
    #[error("collection was recreated ({diagnostics})")]
    CollectionRecreated { diagnostics: Box<RetryDiagnostics> },

    /// The range was still gone after one forced routing refresh.
    #[error("partition range {range:?} is gone ({diagnostics})")]
    PartitionRangeGone {
        range: Option<RangeId>,
        diagnostics: Box<RetryDiagnostics>,
    },

    /// Any other non-success reply.
    #[error("request failed with {status}/{sub_status}")]
    Status {
        status: StatusCode,
        sub_status: SubStatusCode,
        diagnostics: Box<RetryDiagnostics>,
    },

    /// The routing metadata could not be loaded or was malformed.
    #[error("routing error: {0}")]
    Routing(RoutingError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The caller passed something the client cannot send.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A success reply whose body does not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ClientError {
    /// Diagnostics collected by the retry coordinator, when the error came
    /// from a coordinated operation.
    pub fn diagnostics(&self) -> Option<&RetryDiagnostics> {
        match self {
            ClientError::ReadSessionNotAvailable { diagnostics }
            | ClientError::CollectionRecreated { diagnostics }
            | ClientError::Throttled { diagnostics, .. }
            | ClientError::AuthenticationFailed { diagnostics, .. }
            | ClientError::Transport { diagnostics, .. }
            | ClientError::PartitionRangeGone { diagnostics, .. }
            | ClientError::Status { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

impl From<RetryError> for ClientError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::ReadSessionNotAvailable { diagnostics } => {
                ClientError::ReadSessionNotAvailable { diagnostics }
            }
            RetryError::CollectionRecreated { diagnostics } => {
                ClientError::CollectionRecreated { diagnostics }
            }
            RetryError::PartitionRangeGone { range, diagnostics } => {
                ClientError::PartitionRangeGone { range, diagnostics }
            }
            RetryError::Throttled {
                retry_after,
                diagnostics,
            } => ClientError::Throttled {
                retry_after,
                diagnostics,
            },
            RetryError::AuthenticationFailed {
                reason,
                diagnostics,
            } => ClientError::AuthenticationFailed {
                reason,
                diagnostics,
            },
            RetryError::Cancelled => ClientError::Cancelled,
            RetryError::Transport {
                source,
                diagnostics,
            } => ClientError::Transport {
                source,
                diagnostics,
            },
        }
    }
}

impl From<RoutingError> for ClientError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::CollectionNotFound(name) => ClientError::CollectionNotFound(name),
            RoutingError::IncompletePartitionKey { provided, expected } => {
                ClientError::IncompletePartitionKey { provided, expected }
            }
            RoutingError::PartitionKeyMismatch { provided, expected } => {
                ClientError::PartitionKeyMismatch { provided, expected }
            }
            other => ClientError::Routing(other),
        }
    }
}
