//! # Tessera
//!
//! Session-consistent client core for partitioned, multi-region document
//! stores.
//!
//! Tessera keeps the read-your-writes guarantee of session consistency
//! while a collection is split, moved between regions, or deleted and
//! recreated under the same name. This provides:
//!
//! - **Per-range session tokens** - Merged monotonically, isolated per collection identity
//! - **Session-aware retries** - Replica fan-out, in-region backoff, remote escalation
//! - **Routing that follows splits** - Single-flight refresh, parent-token inheritance
//! - **Read-many** - Per-range sub-batches with bounded concurrency
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                              Client                               │
//! │  ┌────────────┐   ┌──────────────┐   ┌──────────────┐   ┌───────┐ │
//! │  │ Collection │ → │ Routing map  │ → │    Retry     │ → │ Trans │ │
//! │  │  routing   │   │ (EPK ranges) │   │ coordinator  │   │ -port │ │
//! │  └────────────┘   └──────────────┘   └──────────────┘   └───────┘ │
//! │         ↘                 ↓ attach           ↑ capture            │
//! │          ────────→ Session token store ──────┘                    │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera::{Client, ClientOptions, CollectionName, PartitionKey, RequestOptions};
//!
//! let config = tessera::TesseraConfig::load()?;
//! let client = Client::builder()
//!     .transport(transport)
//!     .collection_resolver(resolver)
//!     .range_provider(ranges)
//!     .options(ClientOptions::from_config(&config)?)
//!     .build()?;
//!
//! let orders = CollectionName::new("shop", "orders");
//! let key = PartitionKey::from("customer-42");
//! client
//!     .upsert_item(&orders, &key, serde_json::json!({"id": "o-1"}), &RequestOptions::new())
//!     .await?;
//!
//! // Sees the write above, even if the read lands on another replica.
//! let read = client
//!     .read_item(&orders, &"o-1".into(), &key, &RequestOptions::new())
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - **Client**: [`Client`], [`ClientBuilder`], [`ClientOptions`] - Main API
//! - **Glue**: [`CollectionRouting`] - name, routing map and session store kept in step
//! - **Foundation**: re-exported from `tessera-types`, `tessera-routing`,
//!   `tessera-session`, `tessera-retry` and `tessera-config`

mod client;
mod collection;
mod error;
mod read_many;
mod transport;

// Client API
pub use client::{
    Client, ClientBuilder, ClientOptions, DEFAULT_READ_MANY_CONCURRENCY, ItemResponse,
    QueryResponse, RequestOptions,
};
pub use collection::{CollectionRouting, ResolvedCollection};
pub use error::{ClientError, Result};
pub use read_many::ReadManyResponse;
pub use transport::Transport;
pub use tokio_util::sync::CancellationToken;

// Re-export core types
pub use tessera_types::{
    AttemptTarget, CollectionIdentity, CollectionName, ConsistencyLevel, EffectivePartitionKey,
    ItemId, Lsn, OperationKind, PartitionKey, PartitionKeyComponent, PartitionKeyDefinition,
    RangeId, Region, RegionId, Request, Response, StatusCode, SubStatusCode, TransportError,
};

// Re-export routing
pub use tessera_routing::{
    CollectionInfo, CollectionResolver, PartitionRange, RangeProvider, RoutingError, RoutingMap,
};

// Re-export session tokens
pub use tessera_session::{
    Capture, CaptureRule, SessionToken, SessionTokenError, SessionTokenHeader, SessionTokenStore,
    VectorToken,
};

// Re-export retry
pub use tessera_retry::{
    AttemptRecord, CredentialError, CredentialProvider, RegionClass, RegionTopology,
    RetryDiagnostics, SessionRetryOptions,
};

// Re-export configuration
pub use tessera_config::{ConfigError, ConfigLoader, TesseraConfig};
