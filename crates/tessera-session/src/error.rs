//! Error types for session tokens.

/// Result type for session-token parsing.
pub type Result<T> = std::result::Result<T, SessionTokenError>;

/// Errors produced while parsing a session token or header.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionTokenError {
    /// The token or header was empty.
    #[error("empty session token")]
    Empty,

    /// A numeric field was missing or not a decimal integer.
    #[error("invalid {field} in session token {token:?}")]
    InvalidNumber { field: &'static str, token: String },

    /// A region entry was not of the form `<regionId>=<lsn>`.
    #[error("invalid region entry {entry:?} in session token {token:?}")]
    InvalidRegionEntry { entry: String, token: String },

    /// The same region appeared twice in one vector token.
    #[error("duplicate region {region} in session token {token:?}")]
    DuplicateRegion { region: u32, token: String },

    /// A header segment was not of the form `<rangeId>:<token>`.
    #[error("invalid session header segment {0:?}")]
    InvalidSegment(String),

    /// The range id of a header segment was empty or contained a separator.
    #[error("invalid range id {0:?} in session header")]
    InvalidRangeId(String),
}
