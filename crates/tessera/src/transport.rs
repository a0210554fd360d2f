//! The seam between the client and the wire.

use async_trait::async_trait;
use tessera_types::{Request, Response, TransportError};

/// Sends one request to the target it names and returns the reply.
///
/// Implementations do not retry. Non-success statuses are replies, not
/// errors; `TransportError` is reserved for failures below the response
/// level.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}
