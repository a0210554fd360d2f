//! The retry state machine.
//!
//! ```text
//! Init → AttemptLocal ─┬─ success ──────────────────────────→ Terminal
//!          ↑           ├─ 404/1002, local budget left ─ wait ─┘(AttemptLocal)
//!          └───────────┘
//!                      └─ 404/1002, budget spent → EscalateRemote
//! EscalateRemote → AttemptRemote(i) ─┬─ success → Terminal
//!                                    └─ 404/1002 → AttemptRemote(i + 1) | Exhausted
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tessera_types::{AttemptTarget, Region, Response, SubStatusCode, TransportError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::CredentialProvider;
use crate::backoff::Backoff;
use crate::classify::{Signal, classify};
use crate::context::RetryAttemptContext;
use crate::diagnostics::{AttemptRecord, RegionClass, RetryDiagnostics};
use crate::error::{Result, RetryError};
use crate::options::SessionRetryOptions;

/// Regions available to the account, as seen from this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTopology {
    local: Region,
    remotes: Vec<Region>,
    multi_master: bool,
}

impl RegionTopology {
    /// Single-region account.
    pub fn single(local: Region) -> Self {
        Self {
            local,
            remotes: Vec::new(),
            multi_master: false,
        }
    }

    /// `preferred` in preference order; the first entry is the local region.
    ///
    /// Returns `None` if `preferred` is empty.
    pub fn from_preferred(preferred: &[Region]) -> Option<Self> {
        let (local, remotes) = preferred.split_first()?;
        Some(Self {
            local: local.clone(),
            remotes: remotes.to_vec(),
            multi_master: false,
        })
    }

    pub fn with_remotes(mut self, remotes: Vec<Region>) -> Self {
        self.remotes = remotes;
        self
    }

    /// Multi-master accounts accept writes in every region.
    pub fn with_multi_master(mut self, multi_master: bool) -> Self {
        self.multi_master = multi_master;
        self
    }

    pub fn local(&self) -> &Region {
        &self.local
    }

    pub fn remotes(&self) -> &[Region] {
        &self.remotes
    }

    pub fn is_multi_master(&self) -> bool {
        self.multi_master
    }

    /// Remote regions an operation may escalate to.
    fn escalation_targets(&self, is_write: bool) -> &[Region] {
        if is_write && !self.multi_master {
            &[]
        } else {
            &self.remotes
        }
    }
}

/// Reply plus the diagnostics of the operation that produced it.
#[derive(Debug)]
pub struct Attempted {
    pub response: Response,
    pub diagnostics: RetryDiagnostics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryState {
    AttemptLocal,
    AttemptRemote(usize),
}

impl RetryState {
    fn class(self) -> RegionClass {
        match self {
            RetryState::AttemptLocal => RegionClass::Local,
            RetryState::AttemptRemote(_) => RegionClass::Remote,
        }
    }
}

enum Step {
    Done(Response),
    SessionNotAvailable,
}

/// Drives one operation through local retries and remote escalation.
///
/// The coordinator does not build requests. Each hit calls the `attempt`
/// closure with the target to address; the closure attaches the session
/// token, sends, and records the response token before returning.
pub struct RetryCoordinator {
    options: SessionRetryOptions,
    topology: RegionTopology,
    credentials: Option<Arc<dyn CredentialProvider>>,
    credential_scope: String,
}

impl RetryCoordinator {
    pub fn new(options: SessionRetryOptions, topology: RegionTopology) -> Self {
        Self {
            options,
            topology,
            credentials: None,
            credential_scope: String::new(),
        }
    }

    /// Enables one credential refresh per operation on 401.
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>, scope: impl Into<String>) -> Self {
        self.credentials = Some(provider);
        self.credential_scope = scope.into();
        self
    }

    pub fn options(&self) -> &SessionRetryOptions {
        &self.options
    }

    pub fn topology(&self) -> &RegionTopology {
        &self.topology
    }

    /// Runs `attempt` until it yields a reply the caller should see, or a
    /// terminal error.
    pub async fn execute<F, Fut>(
        &self,
        mut ctx: RetryAttemptContext,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<Attempted>
    where
        F: FnMut(AttemptTarget) -> Fut,
        Fut: Future<Output = std::result::Result<Response, TransportError>>,
    {
        let is_write = ctx.operation().is_write();
        let remotes = self.topology.escalation_targets(is_write);
        let mut candidates = Vec::with_capacity(1 + remotes.len());
        candidates.push(self.topology.local.clone());
        candidates.extend(remotes.iter().cloned());
        ctx.set_candidates(candidates);

        let local_budget = self.options.local_attempt_budget();
        let mut backoff = Backoff::exponential(self.options.initial_backoff(), self.options.max_backoff());
        let mut state = RetryState::AttemptLocal;

        loop {
            let region = match state {
                RetryState::AttemptLocal => self.topology.local.clone(),
                RetryState::AttemptRemote(idx) => remotes[idx].clone(),
            };
            let attempt_started = Instant::now();
            ctx.begin_logical_attempt(state.class());

            match self
                .logical_attempt(&mut ctx, &region, state.class(), cancel, &mut attempt)
                .await?
            {
                Step::Done(response) => {
                    return Ok(Attempted {
                        response,
                        diagnostics: ctx.finish(),
                    });
                }
                Step::SessionNotAvailable => {}
            }

            state = match state {
                RetryState::AttemptLocal if ctx.local_attempts() < local_budget => {
                    let delay = self.retry_delay(is_write, &mut backoff, attempt_started);
                    debug!(
                        operation = %ctx.operation(),
                        %region,
                        attempt = ctx.local_attempts(),
                        ?delay,
                        "read session not available, retrying in region"
                    );
                    self.wait(&mut ctx, delay, cancel).await?;
                    RetryState::AttemptLocal
                }
                RetryState::AttemptLocal if !remotes.is_empty() => {
                    info!(
                        operation = %ctx.operation(),
                        from = %region,
                        to = %remotes[0],
                        "escalating session retry to remote region"
                    );
                    self.check_budget(&mut ctx)?;
                    RetryState::AttemptRemote(0)
                }
                RetryState::AttemptRemote(idx) if idx + 1 < remotes.len() => {
                    self.check_budget(&mut ctx)?;
                    RetryState::AttemptRemote(idx + 1)
                }
                RetryState::AttemptLocal | RetryState::AttemptRemote(_) => {
                    warn!(
                        operation = %ctx.operation(),
                        local = ctx.local_attempts(),
                        remote = ctx.remote_attempts(),
                        "read session not available, retries exhausted"
                    );
                    return Err(RetryError::ReadSessionNotAvailable {
                        diagnostics: ctx.snapshot(),
                    });
                }
            };
        }
    }

    /// One logical attempt: a single primary hit for writes, up to
    /// `replica_fanout` replica hits for reads.
    async fn logical_attempt<F, Fut>(
        &self,
        ctx: &mut RetryAttemptContext,
        region: &Region,
        class: RegionClass,
        cancel: &CancellationToken,
        attempt: &mut F,
    ) -> Result<Step>
    where
        F: FnMut(AttemptTarget) -> Fut,
        Fut: Future<Output = std::result::Result<Response, TransportError>>,
    {
        let targets: Vec<AttemptTarget> = if ctx.operation().is_write() {
            vec![AttemptTarget::primary(region.clone())]
        } else {
            (0..self.options.replica_fanout())
                .map(|replica| AttemptTarget::replica(region.clone(), replica))
                .collect()
        };

        for target in targets {
            let response = self.hit(ctx, target, class, cancel, attempt).await?;
            match classify(&response) {
                Signal::Complete => return Ok(Step::Done(response)),
                Signal::SessionNotAvailable => {}
                Signal::NameCacheStale => {
                    return Err(RetryError::CollectionRecreated {
                        diagnostics: ctx.snapshot(),
                    });
                }
                Signal::PartitionRangeGone => {
                    return Err(RetryError::PartitionRangeGone {
                        range: ctx.range_id().cloned(),
                        diagnostics: ctx.snapshot(),
                    });
                }
                Signal::Throttled => {
                    return Err(RetryError::Throttled {
                        retry_after: response.retry_after,
                        diagnostics: ctx.snapshot(),
                    });
                }
                Signal::Unauthorized => {
                    let reason = if ctx.credential_refreshed() {
                        "unauthorized after credential refresh"
                    } else {
                        "unauthorized and no credential provider configured"
                    };
                    return Err(RetryError::AuthenticationFailed {
                        reason: reason.to_string(),
                        diagnostics: ctx.snapshot(),
                    });
                }
            }
        }
        Ok(Step::SessionNotAvailable)
    }

    /// A single transport hit against `target`, refreshing the credential
    /// once on 401 and re-sending to the same target.
    async fn hit<F, Fut>(
        &self,
        ctx: &mut RetryAttemptContext,
        target: AttemptTarget,
        class: RegionClass,
        cancel: &CancellationToken,
        attempt: &mut F,
    ) -> Result<Response>
    where
        F: FnMut(AttemptTarget) -> Fut,
        Fut: Future<Output = std::result::Result<Response, TransportError>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            let offset = ctx.elapsed();
            let sent = attempt(target.clone());
            let result = tokio::select! {
                () = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = sent => result,
            };

            let mut record = AttemptRecord {
                operation: ctx.operation(),
                region: target.region.clone(),
                region_class: class,
                replica: target.replica,
                status: None,
                sub_status: SubStatusCode::NONE,
                offset,
            };

            let response = match result {
                Ok(response) => response,
                Err(source) => {
                    ctx.diagnostics_mut().record(record);
                    warn!(operation = %ctx.operation(), region = %target.region, error = %source, "transport failure");
                    return Err(RetryError::Transport {
                        source,
                        diagnostics: ctx.snapshot(),
                    });
                }
            };
            record.status = Some(response.status);
            record.sub_status = response.sub_status;
            ctx.diagnostics_mut().record(record);
            debug!(
                operation = %ctx.operation(),
                region = %target.region,
                replica = ?target.replica,
                status = %response.status,
                sub_status = %response.sub_status,
                "attempt completed"
            );

            if classify(&response) != Signal::Unauthorized || ctx.credential_refreshed() {
                return Ok(response);
            }
            let Some(provider) = &self.credentials else {
                return Ok(response);
            };

            ctx.mark_credential_refreshed();
            info!(scope = %self.credential_scope, "refreshing credential after 401");
            if let Err(e) = provider.refresh(&self.credential_scope).await {
                return Err(RetryError::AuthenticationFailed {
                    reason: e.to_string(),
                    diagnostics: ctx.snapshot(),
                });
            }
        }
    }

    /// Delay before the next in-region attempt.
    ///
    /// Writes also wait until `min_in_region_retry_time_for_writes` has
    /// passed since the previous attempt started.
    fn retry_delay(&self, is_write: bool, backoff: &mut Backoff, attempt_started: Instant) -> Duration {
        let delay = backoff.next_delay_duration();
        if is_write {
            let floor = self
                .options
                .min_in_region_retry_time_for_writes()
                .saturating_sub(attempt_started.elapsed());
            delay.max(floor)
        } else {
            delay
        }
    }

    fn check_budget(&self, ctx: &mut RetryAttemptContext) -> Result<()> {
        if ctx.elapsed() >= self.options.overall_budget() {
            return Err(self.budget_exhausted(ctx));
        }
        Ok(())
    }

    fn budget_exhausted(&self, ctx: &mut RetryAttemptContext) -> RetryError {
        ctx.diagnostics_mut().mark_budget_exhausted();
        warn!(
            operation = %ctx.operation(),
            budget = ?self.options.overall_budget(),
            elapsed = ?ctx.elapsed(),
            "session retry budget exhausted"
        );
        RetryError::ReadSessionNotAvailable {
            diagnostics: ctx.snapshot(),
        }
    }

    async fn wait(&self, ctx: &mut RetryAttemptContext, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        if ctx.elapsed() + delay > self.options.overall_budget() {
            return Err(self.budget_exhausted(ctx));
        }
        tokio::select! {
            () = cancel.cancelled() => Err(RetryError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("options", &self.options)
            .field("topology", &self.topology)
            .field("credentials", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}
