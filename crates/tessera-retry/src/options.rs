//! Tuning knobs for session-consistency retries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower bound for [`SessionRetryOptions::min_in_region_retry_time_for_writes`].
pub const MIN_IN_REGION_RETRY_TIME_FOR_WRITES_FLOOR: Duration = Duration::from_millis(100);

/// Default for [`SessionRetryOptions::min_in_region_retry_time_for_writes`].
pub const DEFAULT_MIN_IN_REGION_RETRY_TIME_FOR_WRITES: Duration = Duration::from_millis(500);

/// Default for
/// [`SessionRetryOptions::max_retries_in_local_region_when_remote_region_preferred`].
pub const DEFAULT_MAX_RETRIES_IN_LOCAL_REGION_WHEN_REMOTE_PREFERRED: u32 = 1;

/// Default number of replicas a read may try per logical attempt.
pub const DEFAULT_REPLICA_FANOUT: u8 = 4;

/// How the coordinator retries 404/1002 (read session not available).
///
/// Setters clamp out-of-range values instead of failing, so options built
/// from environment overrides are always usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRetryOptions {
    max_in_region_retry_count: u32,
    remote_region_preferred: bool,
    min_in_region_retry_time_for_writes: Duration,
    max_retries_in_local_region_when_remote_region_preferred: u32,
    replica_fanout: u8,
    initial_backoff: Duration,
    max_backoff: Duration,
    overall_budget: Duration,
}

impl Default for SessionRetryOptions {
    fn default() -> Self {
        Self {
            max_in_region_retry_count: 1,
            remote_region_preferred: false,
            min_in_region_retry_time_for_writes: DEFAULT_MIN_IN_REGION_RETRY_TIME_FOR_WRITES,
            max_retries_in_local_region_when_remote_region_preferred:
                DEFAULT_MAX_RETRIES_IN_LOCAL_REGION_WHEN_REMOTE_PREFERRED,
            replica_fanout: DEFAULT_REPLICA_FANOUT,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(500),
            overall_budget: Duration::from_secs(5),
        }
    }
}

impl SessionRetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// In-region retries after the first local attempt. `0` means exactly one
    /// local attempt before escalating or failing.
    pub fn with_max_in_region_retry_count(mut self, count: u32) -> Self {
        self.max_in_region_retry_count = count;
        self
    }

    pub fn with_remote_region_preferred(mut self, preferred: bool) -> Self {
        self.remote_region_preferred = preferred;
        self
    }

    /// Clamped to at least 100 ms.
    pub fn with_min_in_region_retry_time_for_writes(mut self, min: Duration) -> Self {
        self.min_in_region_retry_time_for_writes = min.max(MIN_IN_REGION_RETRY_TIME_FOR_WRITES_FLOOR);
        self
    }

    /// Clamped to at least 1.
    pub fn with_max_retries_in_local_region_when_remote_region_preferred(mut self, count: u32) -> Self {
        self.max_retries_in_local_region_when_remote_region_preferred = count.max(1);
        self
    }

    /// Clamped to at least 1.
    pub fn with_replica_fanout(mut self, fanout: u8) -> Self {
        self.replica_fanout = fanout.max(1);
        self
    }

    /// `max` is raised to `initial` if smaller.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    pub fn with_overall_budget(mut self, budget: Duration) -> Self {
        self.overall_budget = budget;
        self
    }

    pub fn max_in_region_retry_count(&self) -> u32 {
        self.max_in_region_retry_count
    }

    pub fn remote_region_preferred(&self) -> bool {
        self.remote_region_preferred
    }

    pub fn min_in_region_retry_time_for_writes(&self) -> Duration {
        self.min_in_region_retry_time_for_writes
    }

    pub fn max_retries_in_local_region_when_remote_region_preferred(&self) -> u32 {
        self.max_retries_in_local_region_when_remote_region_preferred
    }

    pub fn replica_fanout(&self) -> u8 {
        self.replica_fanout
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn overall_budget(&self) -> Duration {
        self.overall_budget
    }

    /// In-region retries actually allowed after the first local attempt.
    pub fn local_retries(&self) -> u32 {
        if self.remote_region_preferred {
            self.max_in_region_retry_count
                .min(self.max_retries_in_local_region_when_remote_region_preferred)
        } else {
            self.max_in_region_retry_count
        }
    }

    /// Logical attempts in the local region: the first one plus retries.
    pub fn local_attempt_budget(&self) -> u32 {
        1 + self.local_retries()
    }
}
