//! Keeps the name cache, the routing-map cache and the session store in step.
//!
//! A collection name can be rebound to a new identity when the collection is
//! deleted and recreated. Whenever that is observed here, the store binding
//! moves first (dropping the old identity's tokens), then the old identity's
//! routing map is invalidated, and only then is the new map fetched. No
//! request built afterwards can pair a token or range of the old identity
//! with the new one.

use std::sync::Arc;

use tessera_routing::{
    CollectionCache, CollectionInfo, CollectionResolver, RangeProvider, RoutingError, RoutingMap,
    RoutingMapCache,
};
use tessera_session::SessionTokenStore;
use tessera_types::{CollectionIdentity, CollectionName};
use tracing::{debug, info};

use crate::error::Result;

/// A collection's identity together with the routing map for that identity.
#[derive(Debug, Clone)]
pub struct ResolvedCollection {
    pub info: Arc<CollectionInfo>,
    pub map: Arc<RoutingMap>,
}

impl ResolvedCollection {
    pub fn identity(&self) -> CollectionIdentity {
        self.info.identity
    }

    pub fn name(&self) -> &CollectionName {
        &self.info.name
    }
}

/// Collection metadata for a client: name → identity → ranges.
pub struct CollectionRouting {
    collections: CollectionCache,
    routing: RoutingMapCache,
    sessions: Arc<SessionTokenStore>,
}

impl CollectionRouting {
    pub fn new(
        resolver: Arc<dyn CollectionResolver>,
        ranges: Arc<dyn RangeProvider>,
        sessions: Arc<SessionTokenStore>,
    ) -> Self {
        Self {
            collections: CollectionCache::new(resolver),
            routing: RoutingMapCache::new(ranges),
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTokenStore> {
        &self.sessions
    }

    /// Resolves `name` from cache where possible and binds its identity in
    /// the session store.
    ///
    /// If the cached identity was already rebound away from in the session
    /// store (by another client sharing it), or turns out to have no ranges
    /// any more, the name is force-refreshed once.
    pub async fn resolve(&self, name: &CollectionName) -> Result<ResolvedCollection> {
        let info = self.collections.resolve(name, false).await?;
        if self.sessions.is_retired(info.identity) {
            debug!(collection = %name, identity = %info.identity, "cached identity was retired, refreshing name");
            return self.refresh(name).await;
        }
        self.bind(name, &info);

        match self.routing.refresh(info.identity, false).await {
            Ok(map) => Ok(ResolvedCollection { info, map }),
            Err(RoutingError::CollectionNotFound(_)) => {
                debug!(collection = %name, identity = %info.identity, "cached identity has no ranges, refreshing name");
                self.refresh(name).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Force-resolves `name` and force-fetches the routing map of whatever
    /// identity it is bound to now.
    pub async fn refresh(&self, name: &CollectionName) -> Result<ResolvedCollection> {
        let previous = self.collections.cached(name).map(|info| info.identity);

        let info = match self.collections.resolve(name, true).await {
            Ok(info) => info,
            Err(e) => {
                if let Some(previous) = previous {
                    self.routing.invalidate(previous);
                }
                if matches!(e, RoutingError::CollectionNotFound(_)) {
                    self.sessions.clear_by_name(name);
                }
                return Err(e.into());
            }
        };

        self.bind(name, &info);
        if let Some(previous) = previous.filter(|previous| *previous != info.identity) {
            debug!(collection = %name, %previous, identity = %info.identity, "invalidating routing map of previous identity");
            self.routing.invalidate(previous);
        }

        let map = self.routing.refresh(info.identity, true).await?;
        Ok(ResolvedCollection { info, map })
    }

    /// Reacts to 410/1000 for `name`: same as [`refresh`](Self::refresh).
    pub async fn on_collection_recreated(&self, name: &CollectionName) -> Result<ResolvedCollection> {
        info!(collection = %name, "name cache stale, refreshing collection identity");
        self.refresh(name).await
    }

    /// Force-fetches the routing map for an already resolved collection.
    ///
    /// Falls back to a full name refresh if the identity is gone.
    pub async fn refresh_routing(&self, resolved: &ResolvedCollection) -> Result<ResolvedCollection> {
        match self.routing.refresh(resolved.identity(), true).await {
            Ok(map) => Ok(ResolvedCollection {
                info: Arc::clone(&resolved.info),
                map,
            }),
            Err(RoutingError::CollectionNotFound(_)) => self.refresh(resolved.name()).await,
            Err(e) => Err(e.into()),
        }
    }

    fn bind(&self, name: &CollectionName, info: &CollectionInfo) {
        self.sessions.bind(name, info.identity);
    }
}

impl std::fmt::Debug for CollectionRouting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRouting")
            .field("routing", &self.routing)
            .field("identities", &self.sessions.identity_count())
            .finish_non_exhaustive()
    }
}
