//! # tessera-types: Core types for `Tessera`
//!
//! This crate contains shared types used across the `Tessera` client core:
//! - Collection identity ([`CollectionIdentity`], [`CollectionName`])
//! - Partitioning ([`PartitionKey`], [`PartitionKeyDefinition`], [`EffectivePartitionKey`], [`RangeId`])
//! - Replication watermarks ([`Lsn`], [`RegionId`], [`Region`])
//! - Operations ([`OperationKind`], [`ConsistencyLevel`], [`ItemId`])
//! - Backend status signals ([`StatusCode`], [`SubStatusCode`])
//! - The transport envelope ([`wire::Request`], [`wire::Response`])

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

pub mod wire;

pub use wire::{AttemptTarget, Request, Response, TransportError};

// ============================================================================
// Collection Identity - Copy (8-byte resource id)
// ============================================================================

/// Stable resource id of a collection.
///
/// Unlike a [`CollectionName`], an identity is never reused: deleting a
/// collection and creating a new one under the same name yields a new
/// identity. Every cache that holds per-collection state keys by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionIdentity(u64);

impl CollectionIdentity {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for CollectionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rid:{}", self.0)
    }
}

impl From<u64> for CollectionIdentity {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<CollectionIdentity> for u64 {
    fn from(id: CollectionIdentity) -> Self {
        id.0
    }
}

// ============================================================================
// Collection Name - Clone (contains String)
// ============================================================================

/// Human-readable collection path, `dbs/<database>/colls/<collection>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionName(String);

impl CollectionName {
    /// Builds the canonical path from a database and collection id.
    pub fn new(database: &str, collection: &str) -> Self {
        Self(format!("dbs/{database}/colls/{collection}"))
    }

    /// Wraps an already formatted path.
    pub fn from_path(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CollectionName {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

// ============================================================================
// Range Id - Clone (short string issued by the backend)
// ============================================================================

/// Identifier of a partition range within one collection identity.
///
/// Range ids travel inside the session-token header (`<rangeId>:<token>`),
/// so they may not contain the header separators `:` `,` or `#`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RangeId(String);

impl RangeId {
    /// Creates a range id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is empty or contains a header separator. Use
    /// [`RangeId::parse`] for untrusted input.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        assert!(
            Self::is_valid(&id),
            "range id must be non-empty and free of ':', ',' and '#': {id:?}"
        );
        Self(id)
    }

    /// Parses a range id from untrusted input.
    pub fn parse(id: &str) -> Option<Self> {
        Self::is_valid(id).then(|| Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(id: &str) -> bool {
        !id.is_empty() && !id.contains([':', ',', '#'])
    }
}

impl Display for RangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Replication Watermarks - Copy
// ============================================================================

/// Logical sequence number: a monotonic per-partition write counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Lsn(u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Numeric region id used inside vector session tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(u32);

impl RegionId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named service region (e.g. `"West US 2"`), used for routing attempts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Region(String);

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Region {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

// ============================================================================
// Items and Operations
// ============================================================================

/// Document id, unique within a logical partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of backend operation carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Query,
    /// Gateway round trip that plans a cross-partition query.
    QueryPlan,
    ReadMany,
    Create,
    Upsert,
    Replace,
    Delete,
}

impl OperationKind {
    /// Writes can only be served by a partition's primary replica.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            OperationKind::Create
                | OperationKind::Upsert
                | OperationKind::Replace
                | OperationKind::Delete
        )
    }

    pub fn is_read(self) -> bool {
        !self.is_write()
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Read => "read",
            OperationKind::Query => "query",
            OperationKind::QueryPlan => "query_plan",
            OperationKind::ReadMany => "read_many",
            OperationKind::Create => "create",
            OperationKind::Upsert => "upsert",
            OperationKind::Replace => "replace",
            OperationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Read consistency requested for an operation.
///
/// Session tokens are only attached under [`ConsistencyLevel::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    #[default]
    Session,
    ConsistentPrefix,
    Eventual,
}

// ============================================================================
// Partition Keys
// ============================================================================

/// One component of a (possibly hierarchical) partition key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartitionKeyComponent {
    String(String),
    Integer(i64),
    Bool(bool),
    Null,
}

impl PartitionKeyComponent {
    /// Hash segment length in bytes contributed by each component.
    pub const SEGMENT_LEN: usize = 8;

    fn hash_segment(&self) -> [u8; Self::SEGMENT_LEN] {
        let mut hasher = blake3::Hasher::new();
        match self {
            PartitionKeyComponent::String(s) => {
                hasher.update(&[0x01]);
                hasher.update(s.as_bytes());
            }
            PartitionKeyComponent::Integer(n) => {
                hasher.update(&[0x02]);
                hasher.update(&n.to_be_bytes());
            }
            PartitionKeyComponent::Bool(b) => {
                hasher.update(&[0x03, u8::from(*b)]);
            }
            PartitionKeyComponent::Null => {
                hasher.update(&[0x04]);
            }
        }
        let digest = hasher.finalize();
        let mut segment = [0u8; Self::SEGMENT_LEN];
        segment.copy_from_slice(&digest.as_bytes()[..Self::SEGMENT_LEN]);
        segment
    }
}

impl From<&str> for PartitionKeyComponent {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PartitionKeyComponent {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PartitionKeyComponent {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PartitionKeyComponent {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A partition key value: one component per path of the collection's
/// [`PartitionKeyDefinition`], or fewer for a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey(Vec<PartitionKeyComponent>);

impl PartitionKey {
    /// Single-component key.
    pub fn single(component: impl Into<PartitionKeyComponent>) -> Self {
        Self(vec![component.into()])
    }

    /// Multi-component (hierarchical) key or prefix.
    pub fn hierarchical(components: Vec<PartitionKeyComponent>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[PartitionKeyComponent] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true when the key specifies every path of `definition`.
    pub fn is_complete_for(&self, definition: &PartitionKeyDefinition) -> bool {
        self.0.len() == definition.paths().len()
    }

    /// Hashes the key (or prefix) into its effective partition key.
    pub fn effective_key(&self) -> EffectivePartitionKey {
        let mut bytes = Vec::with_capacity(self.0.len() * PartitionKeyComponent::SEGMENT_LEN);
        for component in &self.0 {
            bytes.extend_from_slice(&component.hash_segment());
        }
        EffectivePartitionKey(bytes)
    }
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (idx, component) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            match component {
                PartitionKeyComponent::String(s) => write!(f, "{s:?}")?,
                PartitionKeyComponent::Integer(n) => write!(f, "{n}")?,
                PartitionKeyComponent::Bool(b) => write!(f, "{b}")?,
                PartitionKeyComponent::Null => f.write_str("null")?,
            }
        }
        f.write_str("]")
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self::single(value)
    }
}

/// Partition key paths declared by a collection (`/tenant`, `/user`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKeyDefinition {
    paths: Vec<String>,
}

impl PartitionKeyDefinition {
    /// # Panics
    ///
    /// Panics if `paths` is empty.
    pub fn new(paths: Vec<String>) -> Self {
        assert!(!paths.is_empty(), "partition key definition needs a path");
        Self { paths }
    }

    pub fn single(path: impl Into<String>) -> Self {
        Self::new(vec![path.into()])
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_hierarchical(&self) -> bool {
        self.paths.len() > 1
    }
}

/// Position in the hashed partition-key space.
///
/// The empty key is the minimum. Keys order lexicographically by byte, and a
/// prefix key covers every key that starts with its bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct EffectivePartitionKey(Vec<u8>);

impl EffectivePartitionKey {
    /// The minimum key (start of the hash space).
    pub const MIN: EffectivePartitionKey = EffectivePartitionKey(Vec::new());

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Exclusive upper bound of the interval covered by this key used as a
    /// prefix, or `None` when the interval is unbounded.
    pub fn prefix_successor(&self) -> Option<EffectivePartitionKey> {
        let mut bytes = self.0.clone();
        while let Some(last) = bytes.pop() {
            if last < u8::MAX {
                bytes.push(last + 1);
                return Some(EffectivePartitionKey(bytes));
            }
        }
        None
    }
}

impl Display for EffectivePartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Backend Status Signals - Copy
// ============================================================================

/// HTTP-style status code returned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const CONFLICT: StatusCode = StatusCode(409);
    pub const GONE: StatusCode = StatusCode(410);
    pub const PRECONDITION_FAILED: StatusCode = StatusCode(412);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend sub-status refining a [`StatusCode`].
///
/// Some values are only meaningful together with a particular status: 1002
/// means "read session not available" on a 404 and "partition range gone" on
/// a 410.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SubStatusCode(u32);

impl SubStatusCode {
    pub const NONE: SubStatusCode = SubStatusCode(0);
    /// 410: the name→identity binding is stale (collection recreated).
    pub const NAME_CACHE_IS_STALE: SubStatusCode = SubStatusCode(1000);
    /// 404: the replica has not caught up to the requested session token.
    pub const READ_SESSION_NOT_AVAILABLE: SubStatusCode = SubStatusCode(1002);
    /// 410: the addressed partition range was split or merged away.
    pub const PARTITION_KEY_RANGE_GONE: SubStatusCode = SubStatusCode(1002);
    /// 404: the owning collection does not exist.
    pub const OWNER_RESOURCE_NOT_FOUND: SubStatusCode = SubStatusCode(1003);
    /// 410: the range is in the middle of a split.
    pub const COMPLETING_SPLIT: SubStatusCode = SubStatusCode(1007);

    pub fn new(code: u32) -> Self {
        Self(code)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Display for SubStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
