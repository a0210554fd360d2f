//! The client handle and its operations.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tessera_config::{ConfigError, TesseraConfig};
use tessera_retry::{
    Attempted, CredentialProvider, RegionTopology, RetryAttemptContext, RetryCoordinator,
    RetryDiagnostics, SessionRetryOptions,
};
use tessera_routing::{CollectionResolver, PartitionRange, RangeProvider};
use tessera_session::{SessionTokenHeader, SessionTokenStore};
use tessera_types::{
    AttemptTarget, CollectionName, ConsistencyLevel, ItemId, OperationKind, PartitionKey, Region,
    Request, StatusCode, SubStatusCode,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::collection::{CollectionRouting, ResolvedCollection};
use crate::error::{ClientError, Result};
use crate::read_many::{self, ReadManyResponse};
use crate::transport::Transport;

/// Default number of read-many sub-batches in flight at once.
pub const DEFAULT_READ_MANY_CONCURRENCY: usize = 8;

// ============================================================================
// Options
// ============================================================================

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    retry: SessionRetryOptions,
    topology: RegionTopology,
    credential_scope: String,
    read_many_concurrency: usize,
    session_store: Option<Arc<SessionTokenStore>>,
}

impl ClientOptions {
    pub fn new(topology: RegionTopology) -> Self {
        Self {
            retry: SessionRetryOptions::default(),
            topology,
            credential_scope: "account".to_string(),
            read_many_concurrency: DEFAULT_READ_MANY_CONCURRENCY,
            session_store: None,
        }
    }

    /// Builds options from a loaded configuration.
    ///
    /// With `client.share_session_store` set, the options carry one session
    /// store that every client built from them (or from clones of them)
    /// shares.
    pub fn from_config(config: &TesseraConfig) -> Result<Self> {
        config.validate()?;

        let regions: Vec<Region> = config
            .client
            .preferred_regions
            .iter()
            .map(|name| Region::new(name.trim()))
            .collect();
        let topology = RegionTopology::from_preferred(&regions)
            .ok_or_else(|| {
                ConfigError::ValidationError("client.preferred_regions is empty".to_string())
            })?
            .with_multi_master(config.client.multi_master);

        let retry = &config.session_retry;
        let retry = SessionRetryOptions::new()
            .with_max_in_region_retry_count(retry.max_in_region_retry_count)
            .with_remote_region_preferred(retry.remote_region_preferred)
            .with_min_in_region_retry_time_for_writes(Duration::from_millis(
                retry.min_in_region_retry_time_for_writes_ms,
            ))
            .with_max_retries_in_local_region_when_remote_region_preferred(
                retry.max_retries_in_local_region_when_remote_region_preferred,
            )
            .with_replica_fanout(retry.replica_fanout)
            .with_backoff(
                Duration::from_millis(retry.initial_backoff_ms),
                Duration::from_millis(retry.max_backoff_ms),
            )
            .with_overall_budget(Duration::from_millis(retry.overall_budget_ms));

        let mut options = Self::new(topology)
            .with_retry_options(retry)
            .with_credential_scope(config.client.credential_scope.clone())
            .with_read_many_concurrency(config.read_many.max_concurrency);
        if config.client.share_session_store {
            options.session_store = Some(Arc::new(SessionTokenStore::new()));
        }
        Ok(options)
    }

    pub fn with_retry_options(mut self, retry: SessionRetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_credential_scope(mut self, scope: impl Into<String>) -> Self {
        self.credential_scope = scope.into();
        self
    }

    /// Clamped to at least 1.
    pub fn with_read_many_concurrency(mut self, limit: usize) -> Self {
        self.read_many_concurrency = limit.max(1);
        self
    }

    pub fn retry(&self) -> &SessionRetryOptions {
        &self.retry
    }

    pub fn topology(&self) -> &RegionTopology {
        &self.topology
    }

    pub fn credential_scope(&self) -> &str {
        &self.credential_scope
    }

    pub fn read_many_concurrency(&self) -> usize {
        self.read_many_concurrency
    }

    /// The store shared by clients built from these options, if sharing is on.
    pub fn shared_session_store(&self) -> Option<&Arc<SessionTokenStore>> {
        self.session_store.as_ref()
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new(RegionTopology::single(Region::new("local")))
    }
}

/// Per-operation settings.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub consistency: ConsistencyLevel,
    pub headers: BTreeMap<String, String>,
    /// Cancels this operation only. Without one, the operation is cancelled
    /// by [`Client::shutdown`].
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Reply to a point operation.
#[derive(Debug)]
pub struct ItemResponse {
    pub status: StatusCode,
    /// `None` when the item does not exist.
    pub item: Option<Value>,
    pub diagnostics: RetryDiagnostics,
}

impl From<Attempted> for ItemResponse {
    fn from(attempted: Attempted) -> Self {
        let Attempted {
            response,
            diagnostics,
        } = attempted;
        let item = if response.is_success() && !response.body.is_null() {
            Some(response.body)
        } else {
            None
        };
        Self {
            status: response.status,
            item,
            diagnostics,
        }
    }
}

/// Items returned by a query, in range order.
#[derive(Debug)]
pub struct QueryResponse {
    pub items: Vec<Value>,
    pub diagnostics: RetryDiagnostics,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Client`] from its collaborators.
#[derive(Default)]
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn CollectionResolver>>,
    ranges: Option<Arc<dyn RangeProvider>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    options: ClientOptions,
    session_store: Option<Arc<SessionTokenStore>>,
}

impl ClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn collection_resolver(mut self, resolver: Arc<dyn CollectionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn range_provider(mut self, ranges: Arc<dyn RangeProvider>) -> Self {
        self.ranges = Some(ranges);
        self
    }

    /// Enables one credential refresh per operation on 401.
    pub fn credential_provider(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses `store` instead of a store private to this client.
    pub fn shared_session_store(mut self, store: Arc<SessionTokenStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn build(self) -> Result<Client> {
        let transport = self.transport.ok_or_else(|| missing("transport"))?;
        let resolver = self.resolver.ok_or_else(|| missing("collection resolver"))?;
        let ranges = self.ranges.ok_or_else(|| missing("range provider"))?;

        let sessions = self
            .session_store
            .or_else(|| self.options.session_store.clone())
            .unwrap_or_default();

        let mut coordinator =
            RetryCoordinator::new(self.options.retry.clone(), self.options.topology.clone());
        if let Some(credentials) = self.credentials {
            coordinator =
                coordinator.with_credentials(credentials, self.options.credential_scope.clone());
        }

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                routing: CollectionRouting::new(resolver, ranges, sessions),
                coordinator,
                options: self.options,
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

fn missing(what: &str) -> ClientError {
    ClientError::Config(ConfigError::ValidationError(format!(
        "client builder is missing a {what}"
    )))
}

// ============================================================================
// Client
// ============================================================================

/// Session-consistent client for one account.
///
/// Cheap to clone; clones share caches, the session store and the shutdown
/// signal.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) routing: CollectionRouting,
    pub(crate) coordinator: RetryCoordinator,
    pub(crate) options: ClientOptions,
    shutdown: CancellationToken,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn session_store(&self) -> &Arc<SessionTokenStore> {
        self.inner.routing.sessions()
    }

    /// Cancels every in-flight operation that was not given its own
    /// cancellation token.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Point read. A missing item is `Ok` with `item == None`.
    #[instrument(skip_all, fields(collection = %collection, item = %id))]
    pub async fn read_item(
        &self,
        collection: &CollectionName,
        id: &ItemId,
        partition_key: &PartitionKey,
        options: &RequestOptions,
    ) -> Result<ItemResponse> {
        self.with_recovery(collection, options, MovedRanges::Rerun, |resolved| async move {
            let range = resolved
                .map
                .resolve_range(partition_key, &resolved.info.partition_key)?;
            let request = self
                .inner
                .request(OperationKind::Read, &resolved)
                .with_item(id.clone(), partition_key.clone());
            let attempted = self
                .inner
                .execute_on_range(&resolved, range, request, options)
                .await?;
            check_reply(resolved.name(), attempted, true).map(ItemResponse::from)
        })
        .await
    }

    /// Creates or replaces `item`, which must carry a string `id` field.
    #[instrument(skip_all, fields(collection = %collection))]
    pub async fn upsert_item(
        &self,
        collection: &CollectionName,
        partition_key: &PartitionKey,
        item: Value,
        options: &RequestOptions,
    ) -> Result<ItemResponse> {
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .map(ItemId::new)
            .ok_or_else(|| ClientError::InvalidRequest("item has no string `id` field".to_string()))?;
        let item = &item;
        let id = &id;

        self.with_recovery(collection, options, MovedRanges::Rerun, |resolved| async move {
            let range = resolved
                .map
                .resolve_range(partition_key, &resolved.info.partition_key)?;
            let request = self
                .inner
                .request(OperationKind::Upsert, &resolved)
                .with_item(id.clone(), partition_key.clone())
                .with_body(item.clone());
            let attempted = self
                .inner
                .execute_on_range(&resolved, range, request, options)
                .await?;
            check_reply(resolved.name(), attempted, false).map(ItemResponse::from)
        })
        .await
    }

    /// Runs `query` against every range, or against the ranges a partition
    /// key (or key prefix) maps to.
    ///
    /// Without a partition key the query is cross-partition and a query plan
    /// is fetched first.
    #[instrument(skip_all, fields(collection = %collection, cross_partition = partition_key.is_none()))]
    pub async fn query_items(
        &self,
        collection: &CollectionName,
        query: &str,
        partition_key: Option<&PartitionKey>,
        options: &RequestOptions,
    ) -> Result<QueryResponse> {
        self.with_recovery(collection, options, MovedRanges::Rerun, |resolved| async move {
            self.inner
                .query_once(&resolved, query, partition_key, options)
                .await
        })
        .await
    }

    /// Point-reads many items with one request per owning range.
    ///
    /// Every key must be complete. Missing items are absent from the result.
    #[instrument(skip_all, fields(collection = %collection, items = items.len()))]
    pub async fn read_many(
        &self,
        collection: &CollectionName,
        items: &[(ItemId, PartitionKey)],
        options: &RequestOptions,
    ) -> Result<ReadManyResponse> {
        let inner = &*self.inner;
        // Moved ranges are regrouped per group; finished groups are never re-sent.
        self.with_recovery(collection, options, MovedRanges::HandledByOperation, move |resolved| {
            read_many::read_many(inner, resolved, items, options)
        })
        .await
    }

    /// The collection's ranges, after a forced identity and routing refresh.
    #[instrument(skip_all, fields(collection = %collection))]
    pub async fn feed_ranges(&self, collection: &CollectionName) -> Result<Vec<PartitionRange>> {
        let resolved = until_cancelled(&self.inner.shutdown, self.inner.routing.refresh(collection)).await?;
        Ok(resolved.map.ranges().to_vec())
    }

    /// Every session token observed for the collection's current identity,
    /// as one header. `None` when nothing has been observed.
    pub fn session_token(&self, collection: &CollectionName) -> Option<String> {
        let sessions = self.inner.routing.sessions();
        let identity = sessions.identity_for(collection)?;
        let header = sessions.resolve_global(identity);
        (!header.is_empty()).then_some(header)
    }

    /// Forgets the session tokens of the collection's current identity.
    pub fn clear_session(&self, collection: &CollectionName) {
        self.inner.routing.sessions().clear_by_name(collection);
    }

    /// Runs `run` against the resolved collection and recovers from stale
    /// metadata.
    ///
    /// 410/1000 refreshes the identity and re-runs once; a second one means
    /// the collection is not there. 410/1002 and 410/1007 force a routing
    /// refresh and re-run once, unless the operation handles moved ranges
    /// itself. 404/1003 forces one refresh and re-runs; a second one surfaces
    /// as `CollectionNotFound`.
    ///
    /// Every metadata lookup races the operation's cancellation token.
    async fn with_recovery<T, F, Fut>(
        &self,
        collection: &CollectionName,
        options: &RequestOptions,
        moved_ranges: MovedRanges,
        mut run: F,
    ) -> Result<T>
    where
        F: FnMut(ResolvedCollection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let routing = &self.inner.routing;
        let cancel = self.inner.cancellation(options);
        let mut resolved = until_cancelled(&cancel, routing.resolve(collection)).await?;
        let mut identity_refreshed = false;
        let mut routing_refreshed = moved_ranges == MovedRanges::HandledByOperation;
        let mut owner_refreshed = false;

        loop {
            match run(resolved.clone()).await {
                Err(ClientError::CollectionRecreated { diagnostics }) => {
                    if identity_refreshed {
                        warn!(collection = %collection, %diagnostics, "name cache still stale after identity refresh");
                        return Err(ClientError::CollectionNotFound(collection.to_string()));
                    }
                    identity_refreshed = true;
                    resolved =
                        until_cancelled(&cancel, routing.on_collection_recreated(collection)).await?;
                }
                Err(ClientError::PartitionRangeGone { range, .. }) if !routing_refreshed => {
                    debug!(collection = %collection, ?range, "partition range gone, refreshing routing");
                    routing_refreshed = true;
                    resolved = until_cancelled(&cancel, routing.refresh_routing(&resolved)).await?;
                }
                Err(ClientError::CollectionNotFound(_)) if !owner_refreshed => {
                    debug!(collection = %collection, "owner collection missing, refreshing");
                    owner_refreshed = true;
                    resolved = until_cancelled(&cancel, routing.refresh(collection)).await?;
                }
                other => return other,
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.inner.options)
            .field("routing", &self.inner.routing)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Execution
// ============================================================================

impl ClientInner {
    /// A request skeleton addressed to the local primary. The coordinator
    /// re-targets every hit.
    pub(crate) fn request(&self, operation: OperationKind, resolved: &ResolvedCollection) -> Request {
        Request::new(
            operation,
            resolved.name().clone(),
            resolved.identity(),
            AttemptTarget::primary(self.coordinator.topology().local().clone()),
        )
    }

    pub(crate) fn cancellation(&self, options: &RequestOptions) -> CancellationToken {
        options
            .cancel
            .clone()
            .unwrap_or_else(|| self.shutdown.child_token())
    }

    /// Sends `request` to `range` under the retry coordinator.
    ///
    /// The range's session token (inherited from its parents after a split)
    /// rides on every hit, and every reply's token is captured before the
    /// coordinator looks at it.
    pub(crate) async fn execute_on_range(
        &self,
        resolved: &ResolvedCollection,
        range: &PartitionRange,
        request: Request,
        options: &RequestOptions,
    ) -> Result<Attempted> {
        let identity = resolved.identity();
        let sessions = self.routing.sessions();
        let range_id = range.id();

        let sent = if options.consistency == ConsistencyLevel::Session {
            sessions.resolve_with_parents(identity, range_id, range.parents())
        } else {
            None
        };
        let header = sent
            .as_ref()
            .map(|token| SessionTokenHeader::single(range_id.clone(), token.clone()).to_string());

        let ctx = RetryAttemptContext::new(request.operation)
            .with_range(range_id.clone())
            .with_session_token(header.clone());
        let template = request
            .with_range(range_id.clone())
            .with_consistency(options.consistency)
            .with_headers(options.headers.clone())
            .with_session_token(header);

        let cancel = self.cancellation(options);
        let transport = &self.transport;
        let sent = sent.as_ref();
        let attempted = self
            .coordinator
            .execute(ctx, &cancel, |target| {
                let request = template.clone().at(target);
                async move {
                    let response = transport.send(request).await;
                    if let Ok(response) = &response {
                        sessions.capture(identity, range_id, response, sent);
                    }
                    response
                }
            })
            .await?;
        Ok(attempted)
    }

    /// Collection-level request (no range, no session token).
    async fn execute_on_collection(&self, request: Request, options: &RequestOptions) -> Result<Attempted> {
        let ctx = RetryAttemptContext::new(request.operation);
        let template = request
            .with_consistency(options.consistency)
            .with_headers(options.headers.clone());
        let cancel = self.cancellation(options);
        let transport = &self.transport;
        let attempted = self
            .coordinator
            .execute(ctx, &cancel, |target| transport.send(template.clone().at(target)))
            .await?;
        Ok(attempted)
    }

    async fn query_once(
        &self,
        resolved: &ResolvedCollection,
        query: &str,
        partition_key: Option<&PartitionKey>,
        options: &RequestOptions,
    ) -> Result<QueryResponse> {
        let mut diagnostics = RetryDiagnostics::new();

        let ranges: Vec<&PartitionRange> = match partition_key {
            Some(key) => resolved
                .map
                .resolve_ranges(key, &resolved.info.partition_key)?,
            None => {
                let plan = self
                    .execute_on_collection(
                        self.request(OperationKind::QueryPlan, resolved).with_query(query),
                        options,
                    )
                    .await?;
                let plan = check_reply(resolved.name(), plan, false)?;
                diagnostics.absorb(plan.diagnostics);
                resolved.map.ranges().iter().collect()
            }
        };

        let mut items = Vec::new();
        for range in ranges {
            let mut request = self.request(OperationKind::Query, resolved).with_query(query);
            request.partition_key = partition_key.cloned();
            let attempted = self
                .execute_on_range(resolved, range, request, options)
                .await?;
            let attempted = check_reply(resolved.name(), attempted, false)?;
            items.extend(items_from_body(&attempted.response.body)?);
            diagnostics.absorb(attempted.diagnostics);
        }

        Ok(QueryResponse { items, diagnostics })
    }
}

/// Whether the recovery loop re-runs an operation that hit a moved range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MovedRanges {
    Rerun,
    HandledByOperation,
}

/// Runs `work` unless `cancel` fires first.
pub(crate) async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ClientError::Cancelled),
        result = work => result,
    }
}

/// Maps a reply the coordinator considered final to the caller's view.
///
/// 404/1003 becomes `CollectionNotFound` so the recovery loop can refresh.
/// A plain 404 passes through only when `allow_not_found` is set.
pub(crate) fn check_reply(
    collection: &CollectionName,
    attempted: Attempted,
    allow_not_found: bool,
) -> Result<Attempted> {
    let response = &attempted.response;
    if response.is_success() {
        return Ok(attempted);
    }
    if response.is_owner_resource_missing() {
        return Err(ClientError::CollectionNotFound(collection.to_string()));
    }
    if allow_not_found
        && response.status == StatusCode::NOT_FOUND
        && response.sub_status == SubStatusCode::NONE
    {
        return Ok(attempted);
    }
    Err(ClientError::Status {
        status: response.status,
        sub_status: response.sub_status,
        diagnostics: Box::new(attempted.diagnostics),
    })
}

/// The `items` array of a query or read-many reply.
pub(crate) fn items_from_body(body: &Value) -> Result<Vec<Value>> {
    body.get("items")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ClientError::MalformedResponse("reply body has no `items` array".to_string()))
}
