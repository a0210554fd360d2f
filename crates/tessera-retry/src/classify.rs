//! Maps backend replies onto the coordinator's decisions.

use tessera_types::{Response, StatusCode};

/// What a reply means for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Hand the reply to the caller as-is (success or a status it interprets).
    Complete,
    /// 404/1002: try another replica or a later attempt.
    SessionNotAvailable,
    /// 410/1000: the collection behind the name changed.
    NameCacheStale,
    /// 410/1002 or 410/1007: the target range split or moved.
    PartitionRangeGone,
    /// 429: surfaced without retrying.
    Throttled,
    /// 401: refresh the credential once.
    Unauthorized,
}

pub fn classify(response: &Response) -> Signal {
    if response.is_read_session_not_available() {
        Signal::SessionNotAvailable
    } else if response.is_name_cache_stale() {
        Signal::NameCacheStale
    } else if response.is_partition_range_gone() {
        Signal::PartitionRangeGone
    } else if response.status == StatusCode::TOO_MANY_REQUESTS {
        Signal::Throttled
    } else if response.status == StatusCode::UNAUTHORIZED {
        Signal::Unauthorized
    } else {
        Signal::Complete
    }
}
