//! tessera-routing: Partition routing for `Tessera`
//!
//! The routing map determines which partition range serves a given partition
//! key for one collection identity. Maps are immutable snapshots; a refresh
//! replaces the snapshot wholesale, so readers never observe a half-updated
//! map.
//!
//! # Components
//!
//! - [`RoutingMap`]: validated `[min, max)` ranges covering the whole
//!   effective-partition-key space
//! - [`RoutingMapCache`]: per-identity snapshots with single-flight refresh
//!   from a [`RangeProvider`]
//! - [`CollectionCache`]: name → identity resolution through a
//!   [`CollectionResolver`]
//!
//! # Example
//!
//! ```
//! use tessera_routing::{PartitionRange, RoutingMap};
//! use tessera_types::{
//!     CollectionIdentity, EffectivePartitionKey, PartitionKey, PartitionKeyDefinition, RangeId,
//! };
//!
//! let mid = EffectivePartitionKey::from_bytes(vec![0x80]);
//! let map = RoutingMap::try_new(
//!     CollectionIdentity::new(1),
//!     vec![
//!         PartitionRange::new(RangeId::new("0"), EffectivePartitionKey::MIN, Some(mid.clone())),
//!         PartitionRange::new(RangeId::new("1"), mid, None),
//!     ],
//! )
//! .unwrap();
//!
//! let def = PartitionKeyDefinition::single("/customer");
//! let range = map.resolve_range(&PartitionKey::single("c-1"), &def).unwrap();
//! assert!(range.id() == &RangeId::new("0") || range.id() == &RangeId::new("1"));
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tessera_types::{
    CollectionIdentity, CollectionName, EffectivePartitionKey, PartitionKey,
    PartitionKeyDefinition, RangeId,
};

mod cache;
mod collection;

pub use cache::{RangeProvider, RoutingMapCache};
pub use collection::{CollectionCache, CollectionInfo, CollectionResolver};

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, RoutingError>;

// ============================================================================
// Partition Ranges
// ============================================================================

/// A contiguous `[min, max)` span of effective-partition-key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    id: RangeId,
    min: EffectivePartitionKey,
    /// Exclusive upper bound. `None` means unbounded.
    max: Option<EffectivePartitionKey>,
    /// Ranges this one was split or merged from.
    parents: Vec<RangeId>,
}

impl PartitionRange {
    pub fn new(
        id: RangeId,
        min: EffectivePartitionKey,
        max: Option<EffectivePartitionKey>,
    ) -> Self {
        Self {
            id,
            min,
            max,
            parents: Vec::new(),
        }
    }

    /// Records the ranges this range descends from.
    pub fn with_parents(mut self, parents: Vec<RangeId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn id(&self) -> &RangeId {
        &self.id
    }

    pub fn min(&self) -> &EffectivePartitionKey {
        &self.min
    }

    pub fn max(&self) -> Option<&EffectivePartitionKey> {
        self.max.as_ref()
    }

    pub fn parents(&self) -> &[RangeId] {
        &self.parents
    }

    /// Returns true if `epk` falls inside `[min, max)`.
    pub fn contains(&self, epk: &EffectivePartitionKey) -> bool {
        *epk >= self.min && self.max.as_ref().is_none_or(|max| epk < max)
    }

    /// Returns true if this range intersects `[lo, hi)`.
    pub fn overlaps(&self, lo: &EffectivePartitionKey, hi: Option<&EffectivePartitionKey>) -> bool {
        let starts_before_hi = hi.is_none_or(|hi| self.min < *hi);
        let ends_after_lo = self.max.as_ref().is_none_or(|max| max > lo);
        starts_before_hi && ends_after_lo
    }
}

// ============================================================================
// Routing Map
// ============================================================================

/// Immutable routing snapshot for one collection identity.
///
/// # Invariants
///
/// - The first range starts at [`EffectivePartitionKey::MIN`]
/// - Each range ends exactly where the next one starts
/// - The last range is unbounded
/// - Range ids are unique
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingMap {
    identity: CollectionIdentity,
    generation: u64,
    ranges: Vec<PartitionRange>,
}

impl RoutingMap {
    /// Validates `ranges` and builds a snapshot.
    ///
    /// Ranges may be given in any order; they are sorted by `min`.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::InvalidRoutingMap`] if the ranges leave a gap,
    /// overlap, repeat an id, or do not cover the whole key space.
    pub fn try_new(identity: CollectionIdentity, mut ranges: Vec<PartitionRange>) -> Result<Self> {
        let invalid = |reason: String| RoutingError::InvalidRoutingMap { identity, reason };

        if ranges.is_empty() {
            return Err(invalid("no ranges".to_string()));
        }
        ranges.sort_by(|a, b| a.min.cmp(&b.min));

        let mut ids = HashSet::with_capacity(ranges.len());
        for range in &ranges {
            if !ids.insert(range.id.clone()) {
                return Err(invalid(format!("duplicate range id {}", range.id)));
            }
            if let Some(max) = &range.max {
                if *max <= range.min {
                    return Err(invalid(format!("range {} is empty", range.id)));
                }
            }
        }

        if ranges[0].min != EffectivePartitionKey::MIN {
            return Err(invalid(format!(
                "first range {} starts at {} instead of the minimum key",
                ranges[0].id, ranges[0].min
            )));
        }

        for pair in ranges.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            if left.max.as_ref() != Some(&right.min) {
                return Err(invalid(format!(
                    "ranges {} and {} are not contiguous",
                    left.id, right.id
                )));
            }
        }

        let last = &ranges[ranges.len() - 1];
        if last.max.is_some() {
            return Err(invalid(format!("last range {} is bounded", last.id)));
        }

        Ok(Self {
            identity,
            generation: 0,
            ranges,
        })
    }

    pub(crate) fn stamped(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn identity(&self) -> CollectionIdentity {
        self.identity
    }

    /// Cache generation this snapshot was installed under. Strictly increases
    /// across refreshes of one cache.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ranges(&self) -> &[PartitionRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn range_by_id(&self, id: &RangeId) -> Option<&PartitionRange> {
        self.ranges.iter().find(|r| &r.id == id)
    }

    /// Returns the range containing `epk`.
    pub fn range_for_epk(&self, epk: &EffectivePartitionKey) -> &PartitionRange {
        // Completeness guarantees ranges[0].min == MIN, so the index is >= 1.
        let idx = self.ranges.partition_point(|r| r.min <= *epk);
        &self.ranges[idx.saturating_sub(1)]
    }

    /// Resolves a full partition key to the range that owns it.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::IncompletePartitionKey`] when `key` specifies
    /// fewer components than `definition` has paths, and
    /// [`RoutingError::PartitionKeyMismatch`] when it specifies more.
    pub fn resolve_range(
        &self,
        key: &PartitionKey,
        definition: &PartitionKeyDefinition,
    ) -> Result<&PartitionRange> {
        check_key_shape(key, definition)?;
        if !key.is_complete_for(definition) {
            return Err(RoutingError::IncompletePartitionKey {
                provided: key.len(),
                expected: definition.paths().len(),
            });
        }
        Ok(self.range_for_epk(&key.effective_key()))
    }

    /// Resolves a full key or a prefix to every range it may live in.
    ///
    /// A full key yields exactly one range. A prefix of a hierarchical key
    /// yields every range overlapping the prefix interval, in key order.
    pub fn resolve_ranges(
        &self,
        key: &PartitionKey,
        definition: &PartitionKeyDefinition,
    ) -> Result<Vec<&PartitionRange>> {
        check_key_shape(key, definition)?;
        if key.is_complete_for(definition) {
            return Ok(vec![self.range_for_epk(&key.effective_key())]);
        }

        let lo = key.effective_key();
        let hi = lo.prefix_successor();
        Ok(self
            .ranges
            .iter()
            .filter(|r| r.overlaps(&lo, hi.as_ref()))
            .collect())
    }
}

fn check_key_shape(key: &PartitionKey, definition: &PartitionKeyDefinition) -> Result<()> {
    if key.len() > definition.paths().len() {
        return Err(RoutingError::PartitionKeyMismatch {
            provided: key.len(),
            expected: definition.paths().len(),
        });
    }
    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during routing lookups and refreshes.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The collection (by name or identity) no longer exists.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A point operation was given a prefix of a hierarchical key.
    #[error("partition key has {provided} of {expected} components")]
    IncompletePartitionKey { provided: usize, expected: usize },

    /// The key has more components than the collection defines.
    #[error("partition key has {provided} components, collection defines {expected}")]
    PartitionKeyMismatch { provided: usize, expected: usize },

    /// The provider returned ranges that do not form a complete map.
    #[error("invalid routing map for {identity}: {reason}")]
    InvalidRoutingMap {
        identity: CollectionIdentity,
        reason: String,
    },

    /// The range or collection provider failed for another reason.
    #[error("metadata provider failed: {0}")]
    Provider(String),
}

impl RoutingError {
    pub fn collection_not_found(name: &CollectionName) -> Self {
        Self::CollectionNotFound(name.to_string())
    }
}

#[cfg(test)]
mod tests;
