//! # tessera-retry: Session-consistency retries for `Tessera`
//!
//! A replica that has not yet caught up to the session token a request
//! carries refuses it with 404/1002 (read session not available). The
//! [`RetryCoordinator`] decides what happens next: retry in the local region
//! (fanning reads out across replicas), escalate to a remote region, or give
//! up with diagnostics that explain where the time went.
//!
//! Other backend signals are classified and surfaced without retrying so that
//! the caller can refresh the right cache:
//!
//! | Reply       | Surfaced as                          |
//! |-------------|--------------------------------------|
//! | 410/1000    | [`RetryError::CollectionRecreated`]  |
//! | 410/1002    | [`RetryError::PartitionRangeGone`]   |
//! | 410/1007    | [`RetryError::PartitionRangeGone`]   |
//! | 429         | [`RetryError::Throttled`]            |
//! | 401 (twice) | [`RetryError::AuthenticationFailed`] |

mod auth;
mod backoff;
mod classify;
mod context;
mod coordinator;
mod diagnostics;
mod error;
mod options;

pub use auth::{CredentialError, CredentialProvider};
pub use backoff::Backoff;
pub use classify::{Signal, classify};
pub use context::RetryAttemptContext;
pub use coordinator::{Attempted, RegionTopology, RetryCoordinator};
pub use diagnostics::{AttemptRecord, RegionClass, RetryDiagnostics};
pub use error::{Result, RetryError};
pub use options::{
    DEFAULT_MAX_RETRIES_IN_LOCAL_REGION_WHEN_REMOTE_PREFERRED,
    DEFAULT_MIN_IN_REGION_RETRY_TIME_FOR_WRITES, DEFAULT_REPLICA_FANOUT,
    MIN_IN_REGION_RETRY_TIME_FOR_WRITES_FLOOR, SessionRetryOptions,
};
