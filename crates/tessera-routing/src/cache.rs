//! Per-identity routing-map cache with single-flight refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tessera_types::CollectionIdentity;
use tracing::{debug, info, warn};

use crate::{PartitionRange, Result, RoutingError, RoutingMap};

/// Source of partition ranges for a collection identity.
///
/// Implementations return [`RoutingError::CollectionNotFound`] when the
/// identity no longer exists.
#[async_trait]
pub trait RangeProvider: Send + Sync {
    async fn fetch_ranges(&self, identity: CollectionIdentity) -> Result<Vec<PartitionRange>>;
}

/// Caches one [`RoutingMap`] per collection identity.
///
/// Concurrent refreshes of the same identity collapse into a single provider
/// fetch: callers queue on a per-identity lock, and whoever acquires it after
/// a newer snapshot was installed returns that snapshot instead of fetching
/// again.
pub struct RoutingMapCache {
    provider: Arc<dyn RangeProvider>,
    maps: DashMap<CollectionIdentity, Arc<RoutingMap>>,
    refresh_locks: DashMap<CollectionIdentity, Arc<tokio::sync::Mutex<()>>>,
    next_generation: AtomicU64,
    fetches: AtomicU64,
}

impl RoutingMapCache {
    pub fn new(provider: Arc<dyn RangeProvider>) -> Self {
        Self {
            provider,
            maps: DashMap::new(),
            refresh_locks: DashMap::new(),
            next_generation: AtomicU64::new(1),
            fetches: AtomicU64::new(0),
        }
    }

    /// Returns the cached snapshot without fetching.
    pub fn cached(&self, identity: CollectionIdentity) -> Option<Arc<RoutingMap>> {
        self.maps.get(&identity).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the snapshot for `identity`, fetching it when absent or when
    /// `force` is set.
    ///
    /// # Errors
    ///
    /// Propagates provider failures. [`RoutingError::CollectionNotFound`]
    /// also drops any cached snapshot for the identity.
    pub async fn refresh(&self, identity: CollectionIdentity, force: bool) -> Result<Arc<RoutingMap>> {
        let observed = self.cached(identity);
        if !force {
            if let Some(map) = &observed {
                return Ok(Arc::clone(map));
            }
        }

        let lock = Arc::clone(self.refresh_locks.entry(identity).or_default().value());
        let _guard = lock.lock().await;

        // Someone else may have installed a newer snapshot while we waited.
        if let Some(current) = self.cached(identity) {
            let newer = match &observed {
                Some(seen) => current.generation() > seen.generation(),
                None => true,
            };
            if newer {
                debug!(%identity, generation = current.generation(), "joined in-flight routing refresh");
                return Ok(current);
            }
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let ranges = match self.provider.fetch_ranges(identity).await {
            Ok(ranges) => ranges,
            Err(RoutingError::CollectionNotFound(what)) => {
                warn!(%identity, "range provider reports collection gone");
                self.maps.remove(&identity);
                return Err(RoutingError::CollectionNotFound(what));
            }
            Err(e) => return Err(e),
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let map = Arc::new(RoutingMap::try_new(identity, ranges)?.stamped(generation));
        info!(%identity, generation, ranges = map.len(), forced = force, "routing map refreshed");
        self.maps.insert(identity, Arc::clone(&map));
        Ok(map)
    }

    /// Drops the cached snapshot for `identity`.
    pub fn invalidate(&self, identity: CollectionIdentity) {
        if self.maps.remove(&identity).is_some() {
            debug!(%identity, "routing map invalidated");
        }
    }

    /// Number of provider fetches issued so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RoutingMapCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingMapCache")
            .field("identities", &self.maps.len())
            .field("fetches", &self.fetch_count())
            .finish_non_exhaustive()
    }
}
