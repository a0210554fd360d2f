//! Collection name → identity cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tessera_types::{CollectionIdentity, CollectionName, PartitionKeyDefinition};
use tracing::{debug, info};

use crate::Result;

/// What the backend reports about a collection name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: CollectionName,
    pub identity: CollectionIdentity,
    pub partition_key: PartitionKeyDefinition,
}

/// Resolves a collection name to its current identity.
///
/// Implementations return [`crate::RoutingError::CollectionNotFound`] when no
/// collection is bound to the name.
#[async_trait]
pub trait CollectionResolver: Send + Sync {
    async fn resolve(&self, name: &CollectionName) -> Result<CollectionInfo>;
}

/// Caches name → [`CollectionInfo`] with single-flight forced refresh.
pub struct CollectionCache {
    resolver: Arc<dyn CollectionResolver>,
    entries: DashMap<CollectionName, Arc<CollectionInfo>>,
    refresh_locks: DashMap<CollectionName, Arc<tokio::sync::Mutex<()>>>,
    lookups: AtomicU64,
}

impl CollectionCache {
    pub fn new(resolver: Arc<dyn CollectionResolver>) -> Self {
        Self {
            resolver,
            entries: DashMap::new(),
            refresh_locks: DashMap::new(),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn cached(&self, name: &CollectionName) -> Option<Arc<CollectionInfo>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the info bound to `name`, asking the resolver when absent or
    /// when `force` is set.
    pub async fn resolve(&self, name: &CollectionName, force: bool) -> Result<Arc<CollectionInfo>> {
        let observed = self.cached(name);
        if !force {
            if let Some(info) = &observed {
                return Ok(Arc::clone(info));
            }
        }

        let lock = Arc::clone(self.refresh_locks.entry(name.clone()).or_default().value());
        let _guard = lock.lock().await;

        if let Some(current) = self.cached(name) {
            let replaced = observed
                .as_ref()
                .is_none_or(|seen| !Arc::ptr_eq(seen, &current));
            if replaced {
                return Ok(current);
            }
        }

        self.lookups.fetch_add(1, Ordering::Relaxed);
        let info = match self.resolver.resolve(name).await {
            Ok(info) => Arc::new(info),
            Err(e) => {
                self.entries.remove(name);
                return Err(e);
            }
        };

        match &observed {
            Some(seen) if seen.identity != info.identity => {
                info!(
                    collection = %name,
                    old = %seen.identity,
                    new = %info.identity,
                    "collection identity changed"
                );
            }
            _ => debug!(collection = %name, identity = %info.identity, "collection resolved"),
        }
        self.entries.insert(name.clone(), Arc::clone(&info));
        Ok(info)
    }

    pub fn invalidate(&self, name: &CollectionName) {
        self.entries.remove(name);
    }

    /// Number of resolver lookups issued so far.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CollectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCache")
            .field("names", &self.entries.len())
            .field("lookups", &self.lookup_count())
            .finish_non_exhaustive()
    }
}
