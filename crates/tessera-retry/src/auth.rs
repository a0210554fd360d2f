//! Credential refresh hook for 401 replies.

use async_trait::async_trait;

/// Error returned when a credential cannot be refreshed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("credential refresh for {scope} failed: {reason}")]
pub struct CredentialError {
    pub scope: String,
    pub reason: String,
}

/// Supplies fresh credentials to the transport.
///
/// The transport owns the credential it attaches to requests; the
/// coordinator only asks for a refresh after a 401.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn refresh(&self, scope: &str) -> Result<(), CredentialError>;
}
