//! In-memory backend used by the integration tests.
//!
//! One [`Simulator`] plays transport, collection resolver, range provider
//! and credential provider. Each range keeps its own LSN; replicas and
//! regions can be made to lag, so a read whose session token is ahead of
//! the replica it lands on gets 404/1002 the way a real backend answers.
//! Collections can be deleted, recreated under the same name, and split.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tessera::{
    AttemptTarget, Client, ClientOptions, CollectionIdentity, CollectionInfo, CollectionName,
    CollectionResolver, CredentialError, CredentialProvider, EffectivePartitionKey, ItemId,
    OperationKind, PartitionKey, PartitionKeyDefinition, PartitionRange, RangeId, RangeProvider,
    Region, Request, Response, RoutingError, SessionToken, SessionTokenHeader, StatusCode,
    SubStatusCode, Transport, TransportError,
};

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn orders() -> CollectionName {
    CollectionName::new("shop", "orders")
}

pub fn key(value: &str) -> PartitionKey {
    PartitionKey::from(value)
}

pub fn pair(id: &str, partition: &str) -> (ItemId, PartitionKey) {
    (ItemId::new(id), key(partition))
}

// ============================================================================
// State
// ============================================================================

struct Document {
    id: ItemId,
    key: PartitionKey,
    body: Value,
}

struct SimCollection {
    name: CollectionName,
    definition: PartitionKeyDefinition,
    ranges: Vec<PartitionRange>,
    lsn: HashMap<RangeId, u64>,
    next_range: u64,
    documents: Vec<Document>,
}

impl SimCollection {
    fn new(name: CollectionName, definition: PartitionKeyDefinition, boundaries: &[u8]) -> Self {
        let mut ranges = Vec::with_capacity(boundaries.len() + 1);
        let mut min = EffectivePartitionKey::MIN;
        for (i, boundary) in boundaries.iter().enumerate() {
            let max = EffectivePartitionKey::from_bytes(vec![*boundary]);
            ranges.push(PartitionRange::new(
                RangeId::new(i.to_string()),
                min,
                Some(max.clone()),
            ));
            min = max;
        }
        ranges.push(PartitionRange::new(
            RangeId::new(boundaries.len().to_string()),
            min,
            None,
        ));
        let lsn = ranges.iter().map(|r| (r.id().clone(), 0)).collect();
        Self {
            name,
            definition,
            next_range: ranges.len() as u64,
            ranges,
            lsn,
            documents: Vec::new(),
        }
    }

    fn range(&self, id: &RangeId) -> Option<&PartitionRange> {
        self.ranges.iter().find(|r| r.id() == id)
    }

    fn range_for(&self, key: &PartitionKey) -> &PartitionRange {
        let epk = key.effective_key();
        self.ranges
            .iter()
            .find(|r| r.contains(&epk))
            .unwrap_or(&self.ranges[0])
    }
}

struct Fault {
    operation: Option<OperationKind>,
    range: Option<RangeId>,
    remaining: usize,
    response: Response,
}

#[derive(Default)]
struct State {
    next_identity: u64,
    names: HashMap<CollectionName, CollectionIdentity>,
    collections: HashMap<CollectionIdentity, SimCollection>,
    faults: VecDeque<Fault>,
    region_lag: HashMap<Region, u64>,
    replica_lag: HashMap<u8, u64>,
    unauthorized: usize,
    fail_credential_refresh: bool,
    latency: Duration,
    metadata_latency: Duration,
}

/// The simulated backend.
#[derive(Default)]
pub struct Simulator {
    state: Mutex<State>,
    requests: Mutex<Vec<Request>>,
    resolves: AtomicUsize,
    range_fetches: AtomicUsize,
    credential_refreshes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Simulator {
    pub fn new() -> Arc<Self> {
        let sim = Self::default();
        sim.state.lock().next_identity = 100;
        Arc::new(sim)
    }

    /// A client wired to this simulator for every collaborator.
    pub fn client(self: &Arc<Self>, options: ClientOptions) -> Client {
        Client::builder()
            .transport(self.clone())
            .collection_resolver(self.clone())
            .range_provider(self.clone())
            .credential_provider(self.clone())
            .options(options)
            .build()
            .expect("simulator client")
    }

    // ------------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------------

    /// Creates a collection whose ranges start at each byte in `boundaries`.
    /// Range ids are `"0"`, `"1"`, ... in key order.
    pub fn create_collection(
        &self,
        name: &CollectionName,
        definition: PartitionKeyDefinition,
        boundaries: &[u8],
    ) -> CollectionIdentity {
        let mut state = self.state.lock();
        let identity = CollectionIdentity::new(state.next_identity);
        state.next_identity += 1;
        state.names.insert(name.clone(), identity);
        state.collections.insert(
            identity,
            SimCollection::new(name.clone(), definition, boundaries),
        );
        identity
    }

    pub fn delete_collection(&self, name: &CollectionName) {
        let mut state = self.state.lock();
        if let Some(identity) = state.names.remove(name) {
            state.collections.remove(&identity);
        }
    }

    /// Deletes `name` and creates it again with the same key definition and
    /// range layout. The new identity starts empty with LSN 0 everywhere.
    pub fn recreate_collection(&self, name: &CollectionName) -> CollectionIdentity {
        let (definition, boundaries) = {
            let state = self.state.lock();
            let identity = state.names[name];
            let collection = &state.collections[&identity];
            let boundaries: Vec<u8> = collection
                .ranges
                .iter()
                .filter_map(|r| r.max().map(|max| max.as_bytes()[0]))
                .collect();
            (collection.definition.clone(), boundaries)
        };
        self.delete_collection(name);
        self.create_collection(name, definition, &boundaries)
    }

    /// Splits `range` at `boundary`. The children inherit the parent's LSN.
    pub fn split_range(&self, name: &CollectionName, range: &RangeId, boundary: Vec<u8>) -> (RangeId, RangeId) {
        let mut state = self.state.lock();
        let identity = state.names[name];
        let collection = state.collections.get_mut(&identity).expect("collection exists");
        let position = collection
            .ranges
            .iter()
            .position(|r| r.id() == range)
            .expect("range exists");
        let parent = collection.ranges.remove(position);
        let parent_lsn = collection.lsn.remove(parent.id()).unwrap_or(0);

        let boundary = EffectivePartitionKey::from_bytes(boundary);
        let left_id = RangeId::new(collection.next_range.to_string());
        let right_id = RangeId::new((collection.next_range + 1).to_string());
        collection.next_range += 2;

        let left = PartitionRange::new(left_id.clone(), parent.min().clone(), Some(boundary.clone()))
            .with_parents(vec![parent.id().clone()]);
        let right = PartitionRange::new(right_id.clone(), boundary, parent.max().cloned())
            .with_parents(vec![parent.id().clone()]);
        collection.lsn.insert(left_id.clone(), parent_lsn);
        collection.lsn.insert(right_id.clone(), parent_lsn);
        collection.ranges.insert(position, right);
        collection.ranges.insert(position, left);
        (left_id, right_id)
    }

    /// Stores a document without going through the transport.
    pub fn insert_document(&self, name: &CollectionName, id: &str, partition: &str) {
        let mut state = self.state.lock();
        let identity = state.names[name];
        let collection = state.collections.get_mut(&identity).expect("collection exists");
        collection.documents.push(Document {
            id: ItemId::new(id),
            key: key(partition),
            body: json!({"id": id, "pk": partition}),
        });
    }

    pub fn identity_of(&self, name: &CollectionName) -> Option<CollectionIdentity> {
        self.state.lock().names.get(name).copied()
    }

    pub fn range_for(&self, name: &CollectionName, key: &PartitionKey) -> RangeId {
        let state = self.state.lock();
        let collection = &state.collections[&state.names[name]];
        collection.range_for(key).id().clone()
    }

    pub fn range_ids(&self, name: &CollectionName) -> Vec<RangeId> {
        let state = self.state.lock();
        let collection = &state.collections[&state.names[name]];
        collection.ranges.iter().map(|r| r.id().clone()).collect()
    }

    pub fn range_lsn(&self, name: &CollectionName, range: &RangeId) -> u64 {
        let state = self.state.lock();
        let collection = &state.collections[&state.names[name]];
        collection.lsn.get(range).copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------------
    // Behaviour knobs
    // ------------------------------------------------------------------------

    /// Every replica in `region` trails the primary by `lag` LSNs.
    pub fn set_region_lag(&self, region: &str, lag: u64) {
        self.state.lock().region_lag.insert(Region::new(region), lag);
    }

    /// Replica `replica` (in every region) trails by `lag` LSNs.
    pub fn set_replica_lag(&self, replica: u8, lag: u64) {
        self.state.lock().replica_lag.insert(replica, lag);
    }

    /// The next `times` requests for `operation` (any operation if `None`)
    /// get `response` instead of being served.
    pub fn inject(&self, operation: Option<OperationKind>, times: usize, response: Response) {
        self.state.lock().faults.push_back(Fault {
            operation,
            range: None,
            remaining: times,
            response,
        });
    }

    /// Like [`inject`](Self::inject), but only for requests addressed to `range`.
    pub fn inject_on_range(
        &self,
        operation: OperationKind,
        range: RangeId,
        times: usize,
        response: Response,
    ) {
        self.state.lock().faults.push_back(Fault {
            operation: Some(operation),
            range: Some(range),
            remaining: times,
            response,
        });
    }

    /// The next `times` requests get 401.
    pub fn reject_auth(&self, times: usize) {
        self.state.lock().unauthorized = times;
    }

    pub fn fail_credential_refresh(&self) {
        self.state.lock().fail_credential_refresh = true;
    }

    /// Every transport send takes `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Every resolver and range-provider call takes `latency`.
    pub fn set_metadata_latency(&self, latency: Duration) {
        self.state.lock().metadata_latency = latency;
    }

    // ------------------------------------------------------------------------
    // Recorders
    // ------------------------------------------------------------------------

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, operation: OperationKind) -> Vec<Request> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }

    pub fn transport_calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn range_fetches(&self) -> usize {
        self.range_fetches.load(Ordering::SeqCst)
    }

    pub fn credential_refreshes(&self) -> usize {
        self.credential_refreshes.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Serving
    // ------------------------------------------------------------------------

    fn serve(&self, request: &Request) -> Response {
        let mut state = self.state.lock();

        if state.unauthorized > 0 {
            state.unauthorized -= 1;
            return Response::new(StatusCode::UNAUTHORIZED);
        }

        if let Some(fault) = state.faults.iter_mut().find(|f| {
            f.remaining > 0
                && f.operation.is_none_or(|op| op == request.operation)
                && f.range.as_ref().is_none_or(|r| request.range_id.as_ref() == Some(r))
        }) {
            fault.remaining -= 1;
            return fault.response.clone();
        }

        let lag = match request.target.replica {
            None => 0,
            Some(replica) => {
                state.region_lag.get(&request.target.region).copied().unwrap_or(0)
                    + state.replica_lag.get(&replica).copied().unwrap_or(0)
            }
        };

        let owner_renamed = state.names.contains_key(&request.collection);
        let Some(collection) = state.collections.get_mut(&request.identity) else {
            return if owner_renamed {
                Response::new(StatusCode::GONE).with_sub_status(SubStatusCode::NAME_CACHE_IS_STALE)
            } else {
                Response::new(StatusCode::NOT_FOUND)
                    .with_sub_status(SubStatusCode::OWNER_RESOURCE_NOT_FOUND)
            };
        };

        if request.operation == OperationKind::QueryPlan {
            return Response::ok(json!({"plan": {"ranges": collection.ranges.len()}}));
        }

        let Some(range_id) = request.range_id.clone() else {
            return Response::new(StatusCode::new(400));
        };
        let Some(range) = collection.range(&range_id).cloned() else {
            return range_gone();
        };
        let keys_in_range = request
            .partition_key
            .iter()
            .chain(request.items.iter().map(|(_, key)| key))
            .filter(|key| key.len() == collection.definition.paths().len())
            .all(|key| range.contains(&key.effective_key()));
        if !keys_in_range {
            return range_gone();
        }

        let primary_lsn = collection.lsn.get(&range_id).copied().unwrap_or(0);

        if request.operation.is_write() {
            let (Some(id), Some(key), Some(body)) = (
                request.item_id.clone(),
                request.partition_key.clone(),
                request.body.clone(),
            ) else {
                return Response::new(StatusCode::new(400));
            };
            let lsn = primary_lsn + 1;
            collection.lsn.insert(range_id.clone(), lsn);
            let existing = collection
                .documents
                .iter_mut()
                .find(|d| d.id == id && d.key == key);
            let status = match existing {
                Some(document) => {
                    document.body = body.clone();
                    StatusCode::OK
                }
                None => {
                    collection.documents.push(Document {
                        id,
                        key,
                        body: body.clone(),
                    });
                    StatusCode::CREATED
                }
            };
            return Response::new(status)
                .with_body(body)
                .with_session_token(token(&range_id, lsn));
        }

        let visible = primary_lsn.saturating_sub(lag);
        let required = match request.session_token.as_deref() {
            None => 0,
            Some(raw) => match raw.parse::<SessionTokenHeader>() {
                Ok(header) => header
                    .token_for(&range_id)
                    .map_or(0, |token| token.lsn().as_u64()),
                Err(_) => return Response::new(StatusCode::new(400)),
            },
        };
        if required > visible {
            return Response::new(StatusCode::NOT_FOUND)
                .with_sub_status(SubStatusCode::READ_SESSION_NOT_AVAILABLE);
        }

        let session = token(&range_id, visible);
        match request.operation {
            OperationKind::Read => {
                let found = collection.documents.iter().find(|d| {
                    Some(&d.id) == request.item_id.as_ref()
                        && Some(&d.key) == request.partition_key.as_ref()
                });
                match found {
                    Some(document) => Response::ok(document.body.clone()).with_session_token(session),
                    None => Response::new(StatusCode::NOT_FOUND).with_session_token(session),
                }
            }
            OperationKind::Query => {
                let items: Vec<Value> = collection
                    .documents
                    .iter()
                    .filter(|d| range.contains(&d.key.effective_key()))
                    .filter(|d| {
                        request.partition_key.as_ref().is_none_or(|prefix| {
                            d.key.components().starts_with(prefix.components())
                        })
                    })
                    .map(|d| d.body.clone())
                    .collect();
                Response::ok(json!({ "items": items })).with_session_token(session)
            }
            OperationKind::ReadMany => {
                let items: Vec<Value> = request
                    .items
                    .iter()
                    .filter_map(|(id, key)| {
                        collection
                            .documents
                            .iter()
                            .find(|d| &d.id == id && &d.key == key)
                            .map(|d| d.body.clone())
                    })
                    .collect();
                Response::ok(json!({ "items": items })).with_session_token(session)
            }
            _ => Response::new(StatusCode::new(400)),
        }
    }
}

fn token(range: &RangeId, lsn: u64) -> String {
    SessionTokenHeader::single(range.clone(), SessionToken::simple(lsn)).to_string()
}

fn range_gone() -> Response {
    Response::new(StatusCode::GONE).with_sub_status(SubStatusCode::PARTITION_KEY_RANGE_GONE)
}

// ============================================================================
// Collaborator impls
// ============================================================================

#[async_trait]
impl Transport for Simulator {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        self.requests.lock().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let response = self.serve(&request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }
}

#[async_trait]
impl CollectionResolver for Simulator {
    async fn resolve(&self, name: &CollectionName) -> Result<CollectionInfo, RoutingError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.lock().metadata_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.lock();
        let identity = state
            .names
            .get(name)
            .copied()
            .ok_or_else(|| RoutingError::collection_not_found(name))?;
        let collection = &state.collections[&identity];
        Ok(CollectionInfo {
            name: collection.name.clone(),
            identity,
            partition_key: collection.definition.clone(),
        })
    }
}

#[async_trait]
impl RangeProvider for Simulator {
    async fn fetch_ranges(
        &self,
        identity: CollectionIdentity,
    ) -> Result<Vec<PartitionRange>, RoutingError> {
        self.range_fetches.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.lock().metadata_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.lock();
        state
            .collections
            .get(&identity)
            .map(|c| c.ranges.clone())
            .ok_or_else(|| RoutingError::CollectionNotFound(identity.to_string()))
    }
}

#[async_trait]
impl CredentialProvider for Simulator {
    async fn refresh(&self, scope: &str) -> Result<(), CredentialError> {
        self.credential_refreshes.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().fail_credential_refresh {
            return Err(CredentialError {
                scope: scope.to_string(),
                reason: "key vault unreachable".to_string(),
            });
        }
        Ok(())
    }
}

/// Region names used by multi-region tests.
pub fn regions(names: &[&str]) -> Vec<Region> {
    names.iter().map(|n| Region::new(*n)).collect()
}

/// Target helper for assertions on recorded requests.
pub fn targets(requests: &[Request]) -> Vec<AttemptTarget> {
    requests.iter().map(|r| r.target.clone()).collect()
}
