//! Per-operation record of every transport hit.

use std::fmt::{self, Display};
use std::time::Duration;

use serde::Serialize;
use tessera_types::{OperationKind, Region, StatusCode, SubStatusCode};

/// Whether a logical attempt ran in the local region or a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionClass {
    Local,
    Remote,
}

/// One transport hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub operation: OperationKind,
    pub region: Region,
    pub region_class: RegionClass,
    /// `None` for the primary.
    pub replica: Option<u8>,
    /// `None` when the transport failed before a reply.
    pub status: Option<StatusCode>,
    pub sub_status: SubStatusCode,
    /// Offset from the start of the operation.
    pub offset: Duration,
}

/// Diagnostics for one operation (or an aggregate of several).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryDiagnostics {
    attempts: Vec<AttemptRecord>,
    local_attempts: u32,
    remote_attempts: u32,
    elapsed: Duration,
    credential_refreshes: u32,
    budget_exhausted: bool,
}

impl RetryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    pub(crate) fn count_logical_attempt(&mut self, class: RegionClass) {
        match class {
            RegionClass::Local => self.local_attempts += 1,
            RegionClass::Remote => self.remote_attempts += 1,
        }
    }

    pub(crate) fn count_credential_refresh(&mut self) {
        self.credential_refreshes += 1;
    }

    pub(crate) fn mark_budget_exhausted(&mut self) {
        self.budget_exhausted = true;
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    /// Folds `other` into `self`, e.g. the groups of a read-many call.
    ///
    /// Elapsed time becomes the longest of the two since the operations ran
    /// concurrently.
    pub fn absorb(&mut self, other: RetryDiagnostics) {
        self.attempts.extend(other.attempts);
        self.local_attempts += other.local_attempts;
        self.remote_attempts += other.remote_attempts;
        self.credential_refreshes += other.credential_refreshes;
        self.budget_exhausted |= other.budget_exhausted;
        self.elapsed = self.elapsed.max(other.elapsed);
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Transport hits, including replica fan-out.
    pub fn hit_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn local_attempts(&self) -> u32 {
        self.local_attempts
    }

    pub fn remote_attempts(&self) -> u32 {
        self.remote_attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn credential_refreshes(&self) -> u32 {
        self.credential_refreshes
    }

    pub fn budget_exhausted(&self) -> bool {
        self.budget_exhausted
    }

    /// Distinct regions hit, in first-hit order.
    pub fn regions_tried(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = Vec::new();
        for record in &self.attempts {
            if !regions.contains(&record.region) {
                regions.push(record.region.clone());
            }
        }
        regions
    }

    /// Hits made while planning a cross-partition query.
    pub fn query_plan_requests(&self) -> usize {
        self.attempts
            .iter()
            .filter(|r| r.operation == OperationKind::QueryPlan)
            .count()
    }

    /// Hits refused with 404/1002.
    pub fn session_not_available_hits(&self) -> usize {
        self.attempts
            .iter()
            .filter(|r| {
                r.status == Some(StatusCode::NOT_FOUND)
                    && r.sub_status == SubStatusCode::READ_SESSION_NOT_AVAILABLE
            })
            .count()
    }
}

impl Display for RetryDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} local={} remote={} elapsed={:?} regions=[",
            self.hit_count(),
            self.local_attempts,
            self.remote_attempts,
            self.elapsed
        )?;
        for (idx, region) in self.regions_tried().iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{region}")?;
        }
        f.write_str("]")?;
        if self.budget_exhausted {
            f.write_str(" budget_exhausted")?;
        }
        Ok(())
    }
}
