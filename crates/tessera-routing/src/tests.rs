//! Unit tests for tessera-routing

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tessera_types::{
    CollectionIdentity, CollectionName, EffectivePartitionKey, PartitionKey,
    PartitionKeyDefinition, RangeId,
};

use crate::{
    CollectionCache, CollectionInfo, CollectionResolver, PartitionRange, RangeProvider,
    RoutingError, RoutingMap, RoutingMapCache,
};

fn epk(bytes: &[u8]) -> EffectivePartitionKey {
    EffectivePartitionKey::from_bytes(bytes.to_vec())
}

/// Builds a complete map splitting the key space at each boundary byte.
fn split_map(boundaries: &[u8]) -> Vec<PartitionRange> {
    let mut ranges = Vec::new();
    let mut lo = EffectivePartitionKey::MIN;
    for (idx, boundary) in boundaries.iter().enumerate() {
        let hi = epk(&[*boundary]);
        ranges.push(PartitionRange::new(
            RangeId::new(idx.to_string()),
            lo,
            Some(hi.clone()),
        ));
        lo = hi;
    }
    ranges.push(PartitionRange::new(
        RangeId::new(boundaries.len().to_string()),
        lo,
        None,
    ));
    ranges
}

fn hierarchical() -> PartitionKeyDefinition {
    PartitionKeyDefinition::new(vec!["/tenant".into(), "/user".into()])
}

// ============================================================================
// Routing Map Tests
// ============================================================================

#[test]
fn complete_map_is_accepted() {
    let map = RoutingMap::try_new(CollectionIdentity::new(1), split_map(&[0x40, 0x80, 0xc0]))
        .unwrap();
    assert_eq!(map.len(), 4);
    assert_eq!(map.identity(), CollectionIdentity::new(1));
}

#[test]
fn ranges_are_sorted_on_construction() {
    let mut ranges = split_map(&[0x40, 0x80]);
    ranges.reverse();
    let map = RoutingMap::try_new(CollectionIdentity::new(1), ranges).unwrap();
    assert_eq!(map.ranges()[0].min(), &EffectivePartitionKey::MIN);
    assert!(map.ranges()[2].max().is_none());
}

#[test]
fn empty_map_is_rejected() {
    let result = RoutingMap::try_new(CollectionIdentity::new(1), vec![]);
    assert!(matches!(result, Err(RoutingError::InvalidRoutingMap { .. })));
}

#[test]
fn gap_is_rejected() {
    let ranges = vec![
        PartitionRange::new(RangeId::new("0"), EffectivePartitionKey::MIN, Some(epk(&[0x40]))),
        PartitionRange::new(RangeId::new("1"), epk(&[0x50]), None),
    ];
    let result = RoutingMap::try_new(CollectionIdentity::new(1), ranges);
    assert!(matches!(result, Err(RoutingError::InvalidRoutingMap { .. })));
}

#[test]
fn bounded_tail_is_rejected() {
    let ranges = vec![PartitionRange::new(
        RangeId::new("0"),
        EffectivePartitionKey::MIN,
        Some(epk(&[0xff])),
    )];
    let result = RoutingMap::try_new(CollectionIdentity::new(1), ranges);
    assert!(matches!(result, Err(RoutingError::InvalidRoutingMap { .. })));
}

#[test]
fn missing_minimum_is_rejected() {
    let ranges = vec![PartitionRange::new(RangeId::new("0"), epk(&[0x01]), None)];
    let result = RoutingMap::try_new(CollectionIdentity::new(1), ranges);
    assert!(matches!(result, Err(RoutingError::InvalidRoutingMap { .. })));
}

#[test]
fn duplicate_ids_are_rejected() {
    let ranges = vec![
        PartitionRange::new(RangeId::new("0"), EffectivePartitionKey::MIN, Some(epk(&[0x40]))),
        PartitionRange::new(RangeId::new("0"), epk(&[0x40]), None),
    ];
    let result = RoutingMap::try_new(CollectionIdentity::new(1), ranges);
    assert!(matches!(result, Err(RoutingError::InvalidRoutingMap { .. })));
}

#[test]
fn range_for_epk_respects_exclusive_max() {
    let map = RoutingMap::try_new(CollectionIdentity::new(1), split_map(&[0x80])).unwrap();
    assert_eq!(map.range_for_epk(&epk(&[0x7f, 0xff])).id(), &RangeId::new("0"));
    assert_eq!(map.range_for_epk(&epk(&[0x80])).id(), &RangeId::new("1"));
    assert_eq!(map.range_for_epk(&EffectivePartitionKey::MIN).id(), &RangeId::new("0"));
}

#[test]
fn resolve_range_rejects_prefix_key() {
    let map = RoutingMap::try_new(CollectionIdentity::new(1), split_map(&[0x80])).unwrap();
    let result = map.resolve_range(&PartitionKey::single("acme"), &hierarchical());
    assert_eq!(
        result.unwrap_err(),
        RoutingError::IncompletePartitionKey {
            provided: 1,
            expected: 2
        }
    );
}

#[test]
fn resolve_range_rejects_oversized_key() {
    let map = RoutingMap::try_new(CollectionIdentity::new(1), split_map(&[0x80])).unwrap();
    let key = PartitionKey::hierarchical(vec!["a".into(), "b".into()]);
    let result = map.resolve_range(&key, &PartitionKeyDefinition::single("/id"));
    assert!(matches!(result, Err(RoutingError::PartitionKeyMismatch { .. })));
}

#[test]
fn prefix_resolves_to_overlapping_ranges_only() {
    let map = RoutingMap::try_new(
        CollectionIdentity::new(1),
        split_map(&[0x20, 0x40, 0x60, 0x80, 0xa0, 0xc0, 0xe0]),
    )
    .unwrap();
    let prefix = PartitionKey::single("acme");
    let ranges = map.resolve_ranges(&prefix, &hierarchical()).unwrap();

    // An 8-byte prefix interval is far narrower than one 1/8th slice.
    assert_eq!(ranges.len(), 1);

    let full = PartitionKey::hierarchical(vec!["acme".into(), "alice".into()]);
    let owner = map.resolve_range(&full, &hierarchical()).unwrap();
    assert_eq!(ranges[0].id(), owner.id());
}

#[test]
fn prefix_spanning_a_boundary_returns_both_sides() {
    let prefix = PartitionKey::single("acme");
    let lo = prefix.effective_key();
    // Split exactly inside the prefix interval.
    let mut inside = lo.as_bytes().to_vec();
    inside.push(0x80);
    let mid = EffectivePartitionKey::from_bytes(inside);
    let ranges = vec![
        PartitionRange::new(RangeId::new("0"), EffectivePartitionKey::MIN, Some(mid.clone())),
        PartitionRange::new(RangeId::new("1"), mid, None),
    ];
    let map = RoutingMap::try_new(CollectionIdentity::new(1), ranges).unwrap();

    let resolved = map.resolve_ranges(&prefix, &hierarchical()).unwrap();
    let ids: Vec<_> = resolved.iter().map(|r| r.id().as_str()).collect();
    assert_eq!(ids, vec!["0", "1"]);
}

#[test]
fn parents_are_kept() {
    let child = PartitionRange::new(RangeId::new("3"), EffectivePartitionKey::MIN, None)
        .with_parents(vec![RangeId::new("0")]);
    assert_eq!(child.parents(), &[RangeId::new("0")]);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: every key resolves to exactly one range, and that range contains it
        #[test]
        fn prop_every_key_has_one_owner(
            mut boundaries in prop::collection::vec(1u8..=255, 0..16),
            key in prop::collection::vec(any::<u8>(), 0..16),
        ) {
            boundaries.sort_unstable();
            boundaries.dedup();
            let map = RoutingMap::try_new(CollectionIdentity::new(9), split_map(&boundaries)).unwrap();

            let key = EffectivePartitionKey::from_bytes(key);
            let owner = map.range_for_epk(&key);
            prop_assert!(owner.contains(&key));

            let containing = map.ranges().iter().filter(|r| r.contains(&key)).count();
            prop_assert_eq!(containing, 1);
        }

        /// Property: the owner of a full key is among the ranges of its prefix
        #[test]
        fn prop_prefix_ranges_include_full_key_owner(
            mut boundaries in prop::collection::vec(1u8..=255, 0..16),
            tenant in "[a-z]{1,8}",
            user in "[a-z]{1,8}",
        ) {
            boundaries.sort_unstable();
            boundaries.dedup();
            let map = RoutingMap::try_new(CollectionIdentity::new(9), split_map(&boundaries)).unwrap();

            let full = PartitionKey::hierarchical(vec![tenant.as_str().into(), user.as_str().into()]);
            let owner = map.resolve_range(&full, &hierarchical()).unwrap().id().clone();
            let prefix_ranges = map
                .resolve_ranges(&PartitionKey::single(tenant.as_str()), &hierarchical())
                .unwrap();
            prop_assert!(prefix_ranges.iter().any(|r| r.id() == &owner));
        }
    }
}

// ============================================================================
// Routing Map Cache Tests
// ============================================================================

struct CountingProvider {
    calls: AtomicUsize,
    boundaries: Vec<u8>,
    gone: bool,
}

impl CountingProvider {
    fn new(boundaries: Vec<u8>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            boundaries,
            gone: false,
        }
    }
}

#[async_trait]
impl RangeProvider for CountingProvider {
    async fn fetch_ranges(&self, identity: CollectionIdentity) -> crate::Result<Vec<PartitionRange>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.gone {
            return Err(RoutingError::CollectionNotFound(identity.to_string()));
        }
        Ok(split_map(&self.boundaries))
    }
}

#[tokio::test(start_paused = true)]
async fn non_forced_refresh_uses_cache() {
    let provider = Arc::new(CountingProvider::new(vec![0x80]));
    let cache = RoutingMapCache::new(provider.clone());
    let id = CollectionIdentity::new(1);

    let first = cache.refresh(id, false).await.unwrap();
    let second = cache.refresh(id, false).await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.generation(), second.generation());
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_bumps_generation() {
    let provider = Arc::new(CountingProvider::new(vec![0x80]));
    let cache = RoutingMapCache::new(provider.clone());
    let id = CollectionIdentity::new(1);

    let first = cache.refresh(id, false).await.unwrap();
    let second = cache.refresh(id, true).await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert!(second.generation() > first.generation());
}

#[tokio::test(start_paused = true)]
async fn concurrent_forced_refreshes_collapse() {
    let provider = Arc::new(CountingProvider::new(vec![0x80]));
    let cache = Arc::new(RoutingMapCache::new(provider.clone()));
    let id = CollectionIdentity::new(1);
    cache.refresh(id, false).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        tasks.spawn(async move { cache.refresh(id, true).await.unwrap().generation() });
    }
    let mut generations = Vec::new();
    while let Some(generation) = tasks.join_next().await {
        generations.push(generation.unwrap());
    }

    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert!(generations.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidate_forces_fetch() {
    let provider = Arc::new(CountingProvider::new(vec![]));
    let cache = RoutingMapCache::new(provider.clone());
    let id = CollectionIdentity::new(1);

    cache.refresh(id, false).await.unwrap();
    cache.invalidate(id);
    assert!(cache.cached(id).is_none());
    cache.refresh(id, false).await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn collection_gone_surfaces_not_found() {
    let mut provider = CountingProvider::new(vec![]);
    provider.gone = true;
    let cache = RoutingMapCache::new(Arc::new(provider));

    let result = cache.refresh(CollectionIdentity::new(5), true).await;
    assert!(matches!(result, Err(RoutingError::CollectionNotFound(_))));
    assert!(cache.cached(CollectionIdentity::new(5)).is_none());
}

// ============================================================================
// Collection Cache Tests
// ============================================================================

struct SwitchableResolver {
    identity: std::sync::Mutex<Option<u64>>,
    calls: AtomicUsize,
}

#[async_trait]
impl CollectionResolver for SwitchableResolver {
    async fn resolve(&self, name: &CollectionName) -> crate::Result<CollectionInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let identity = *self.identity.lock().unwrap();
        match identity {
            Some(id) => Ok(CollectionInfo {
                name: name.clone(),
                identity: CollectionIdentity::new(id),
                partition_key: PartitionKeyDefinition::single("/pk"),
            }),
            None => Err(RoutingError::collection_not_found(name)),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn collection_cache_follows_recreate() {
    let resolver = Arc::new(SwitchableResolver {
        identity: std::sync::Mutex::new(Some(1)),
        calls: AtomicUsize::new(0),
    });
    let cache = CollectionCache::new(resolver.clone());
    let name = CollectionName::new("db", "coll");

    assert_eq!(cache.resolve(&name, false).await.unwrap().identity, CollectionIdentity::new(1));

    *resolver.identity.lock().unwrap() = Some(2);
    // Stale until forced.
    assert_eq!(cache.resolve(&name, false).await.unwrap().identity, CollectionIdentity::new(1));
    assert_eq!(cache.resolve(&name, true).await.unwrap().identity, CollectionIdentity::new(2));
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn collection_cache_drops_deleted_names() {
    let resolver = Arc::new(SwitchableResolver {
        identity: std::sync::Mutex::new(Some(1)),
        calls: AtomicUsize::new(0),
    });
    let cache = CollectionCache::new(resolver.clone());
    let name = CollectionName::new("db", "coll");
    cache.resolve(&name, false).await.unwrap();

    *resolver.identity.lock().unwrap() = None;
    let result = cache.resolve(&name, true).await;

    assert!(matches!(result, Err(RoutingError::CollectionNotFound(_))));
    assert!(cache.cached(&name).is_none());
}

#[tokio::test(start_paused = true)]
async fn concurrent_name_refreshes_collapse() {
    let resolver = Arc::new(SwitchableResolver {
        identity: std::sync::Mutex::new(Some(7)),
        calls: AtomicUsize::new(0),
    });
    let cache = Arc::new(CollectionCache::new(resolver.clone()));
    let name = CollectionName::new("db", "coll");

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let name = name.clone();
        tasks.spawn(async move { cache.resolve(&name, false).await.unwrap().identity });
    }
    while let Some(identity) = tasks.join_next().await {
        assert_eq!(identity.unwrap(), CollectionIdentity::new(7));
    }
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
}
