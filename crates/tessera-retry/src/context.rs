//! Per-operation retry state.

use std::time::Duration;

use tessera_types::{OperationKind, RangeId, Region};
use tokio::time::Instant;

use crate::diagnostics::{RegionClass, RetryDiagnostics};

/// Transient state of one logical operation, created at its start and dropped
/// at completion.
#[derive(Debug)]
pub struct RetryAttemptContext {
    operation: OperationKind,
    range_id: Option<RangeId>,
    session_token: Option<String>,
    candidate_regions: Vec<Region>,
    started: Instant,
    credential_refreshed: bool,
    diagnostics: RetryDiagnostics,
}

impl RetryAttemptContext {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            range_id: None,
            session_token: None,
            candidate_regions: Vec::new(),
            started: Instant::now(),
            credential_refreshed: false,
            diagnostics: RetryDiagnostics::new(),
        }
    }

    pub fn with_range(mut self, range_id: RangeId) -> Self {
        self.range_id = Some(range_id);
        self
    }

    pub fn with_session_token(mut self, header: Option<String>) -> Self {
        self.session_token = header;
        self
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn range_id(&self) -> Option<&RangeId> {
        self.range_id.as_ref()
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Local region first, then the remote fallbacks in preference order.
    pub fn candidate_regions(&self) -> &[Region] {
        &self.candidate_regions
    }

    pub fn local_attempts(&self) -> u32 {
        self.diagnostics.local_attempts()
    }

    pub fn remote_attempts(&self) -> u32 {
        self.diagnostics.remote_attempts()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn diagnostics(&self) -> &RetryDiagnostics {
        &self.diagnostics
    }

    pub(crate) fn set_candidates(&mut self, regions: Vec<Region>) {
        self.candidate_regions = regions;
    }

    pub(crate) fn begin_logical_attempt(&mut self, class: RegionClass) {
        self.diagnostics.count_logical_attempt(class);
    }

    pub(crate) fn diagnostics_mut(&mut self) -> &mut RetryDiagnostics {
        &mut self.diagnostics
    }

    pub(crate) fn credential_refreshed(&self) -> bool {
        self.credential_refreshed
    }

    pub(crate) fn mark_credential_refreshed(&mut self) {
        self.credential_refreshed = true;
        self.diagnostics.count_credential_refresh();
    }

    /// Consumes the context, stamping the final elapsed time.
    pub(crate) fn finish(mut self) -> RetryDiagnostics {
        let elapsed = self.started.elapsed();
        self.diagnostics.set_elapsed(elapsed);
        self.diagnostics
    }

    /// Snapshot of the diagnostics so far, for errors raised mid-operation.
    pub(crate) fn snapshot(&self) -> Box<RetryDiagnostics> {
        let mut diagnostics = self.diagnostics.clone();
        diagnostics.set_elapsed(self.started.elapsed());
        Box::new(diagnostics)
    }
}
