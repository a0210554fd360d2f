//! Transport envelope exchanged with the backend.
//!
//! The wire protocol itself lives outside this workspace; these types are the
//! narrow surface a transport implementation converts to and from.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    CollectionIdentity, CollectionName, ConsistencyLevel, ItemId, OperationKind, PartitionKey,
    RangeId, Region, StatusCode, SubStatusCode,
};

/// Where a single transport hit is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptTarget {
    pub region: Region,
    /// Replica index within the region. `None` addresses the primary.
    pub replica: Option<u8>,
}

impl AttemptTarget {
    pub fn primary(region: Region) -> Self {
        Self {
            region,
            replica: None,
        }
    }

    pub fn replica(region: Region, replica: u8) -> Self {
        Self {
            region,
            replica: Some(replica),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.replica.is_none()
    }
}

/// A request as handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub operation: OperationKind,
    pub collection: CollectionName,
    pub identity: CollectionIdentity,
    /// Target range. `None` for collection-level requests such as query plans.
    pub range_id: Option<RangeId>,
    pub item_id: Option<ItemId>,
    pub partition_key: Option<PartitionKey>,
    /// Point-read pairs carried by a read-many request.
    pub items: Vec<(ItemId, PartitionKey)>,
    pub query: Option<String>,
    pub body: Option<serde_json::Value>,
    pub consistency: ConsistencyLevel,
    /// Session-token header, `"<rangeId>:<token>"`.
    pub session_token: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub target: AttemptTarget,
}

impl Request {
    pub fn new(
        operation: OperationKind,
        collection: CollectionName,
        identity: CollectionIdentity,
        target: AttemptTarget,
    ) -> Self {
        Self {
            operation,
            collection,
            identity,
            range_id: None,
            item_id: None,
            partition_key: None,
            items: Vec::new(),
            query: None,
            body: None,
            consistency: ConsistencyLevel::default(),
            session_token: None,
            headers: BTreeMap::new(),
            target,
        }
    }

    pub fn with_range(mut self, range_id: RangeId) -> Self {
        self.range_id = Some(range_id);
        self
    }

    pub fn with_item(mut self, item_id: ItemId, partition_key: PartitionKey) -> Self {
        self.item_id = Some(item_id);
        self.partition_key = Some(partition_key);
        self
    }

    pub fn with_items(mut self, items: Vec<(ItemId, PartitionKey)>) -> Self {
        self.items = items;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_session_token(mut self, header: Option<String>) -> Self {
        self.session_token = header;
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Retargets a prepared request at another replica or region.
    pub fn at(mut self, target: AttemptTarget) -> Self {
        self.target = target;
        self
    }
}

/// A reply from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    pub sub_status: SubStatusCode,
    /// Session-token header returned by the replica, if any.
    pub session_token: Option<String>,
    pub retry_after: Option<Duration>,
    pub body: serde_json::Value,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            sub_status: SubStatusCode::NONE,
            session_token: None,
            retry_after: None,
            body: serde_json::Value::Null,
        }
    }

    pub fn ok(body: serde_json::Value) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    pub fn with_sub_status(mut self, sub_status: SubStatusCode) -> Self {
        self.sub_status = sub_status;
        self
    }

    pub fn with_session_token(mut self, header: impl Into<String>) -> Self {
        self.session_token = Some(header.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 404/1002: the replica is behind the requested session token.
    pub fn is_read_session_not_available(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
            && self.sub_status == SubStatusCode::READ_SESSION_NOT_AVAILABLE
    }

    /// 410/1000: the name→identity binding used for this request is stale.
    pub fn is_name_cache_stale(&self) -> bool {
        self.status == StatusCode::GONE && self.sub_status == SubStatusCode::NAME_CACHE_IS_STALE
    }

    /// 410/1002 or 410/1007: the addressed range no longer exists as routed.
    pub fn is_partition_range_gone(&self) -> bool {
        self.status == StatusCode::GONE
            && (self.sub_status == SubStatusCode::PARTITION_KEY_RANGE_GONE
                || self.sub_status == SubStatusCode::COMPLETING_SPLIT)
    }

    /// 404/1003: the owning collection does not exist.
    pub fn is_owner_resource_missing(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
            && self.sub_status == SubStatusCode::OWNER_RESOURCE_NOT_FOUND
    }
}

/// Failure below the response level (connection, timeout, protocol).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {region} failed: {reason}")]
    Connection { region: Region, reason: String },

    #[error("request to {region} timed out after {elapsed:?}")]
    Timeout { region: Region, elapsed: Duration },

    #[error("protocol error: {0}")]
    Protocol(String),
}
