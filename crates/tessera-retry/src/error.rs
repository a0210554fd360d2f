//! Errors surfaced by the retry coordinator.

use std::time::Duration;

use tessera_types::{RangeId, TransportError};

use crate::diagnostics::RetryDiagnostics;

/// Result type for coordinated operations.
pub type Result<T> = std::result::Result<T, RetryError>;

/// Why a coordinated operation stopped without a usable reply.
#[derive(thiserror::Error, Debug)]
pub enum RetryError {
    /// Every permitted attempt was refused with 404/1002, or the budget ran out.
    #[error("read session not available after retries ({diagnostics})")]
    ReadSessionNotAvailable { diagnostics: Box<RetryDiagnostics> },

    /// 410/1000: the collection name now points at another identity.
    #[error("collection was recreated ({diagnostics})")]
    CollectionRecreated { diagnostics: Box<RetryDiagnostics> },

    /// 410/1002 or 410/1007: the routing map for the target is out of date.
    #[error("partition range {range:?} is gone ({diagnostics})")]
    PartitionRangeGone {
        range: Option<RangeId>,
        diagnostics: Box<RetryDiagnostics>,
    },

    /// 429, passed through without retrying.
    #[error("request throttled, retry after {retry_after:?}")]
    Throttled {
        retry_after: Option<Duration>,
        diagnostics: Box<RetryDiagnostics>,
    },

    /// 401 persisted after one credential refresh, or the refresh failed.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed {
        reason: String,
        diagnostics: Box<RetryDiagnostics>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("transport failed: {source}")]
    Transport {
        #[source]
        source: TransportError,
        diagnostics: Box<RetryDiagnostics>,
    },
}

impl RetryError {
    /// Diagnostics collected up to the failure, if any were.
    pub fn diagnostics(&self) -> Option<&RetryDiagnostics> {
        match self {
            RetryError::ReadSessionNotAvailable { diagnostics }
            | RetryError::CollectionRecreated { diagnostics }
            | RetryError::PartitionRangeGone { diagnostics, .. }
            | RetryError::Throttled { diagnostics, .. }
            | RetryError::AuthenticationFailed { diagnostics, .. }
            | RetryError::Transport { diagnostics, .. } => Some(diagnostics),
            RetryError::Cancelled => None,
        }
    }
}
