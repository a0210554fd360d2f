//! Per-client session token store keyed by collection identity.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use tessera_types::{CollectionIdentity, CollectionName, RangeId, Response, StatusCode, SubStatusCode};
use tracing::{debug, info, warn};

use crate::error::SessionTokenError;
use crate::header::SessionTokenHeader;
use crate::token::SessionToken;

type RangeTokens = DashMap<RangeId, SessionToken>;

/// How a response status decides whether its session token is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRule {
    /// The response reflects server state at or after the returned token.
    Merge,
    /// Throttled: keep only progress beyond the token that was sent.
    MergeIfNewer,
    /// The token says nothing about what the caller observed.
    Ignore,
}

impl CaptureRule {
    pub fn for_status(status: StatusCode, sub_status: SubStatusCode) -> Self {
        match status {
            s if s.is_success() => CaptureRule::Merge,
            StatusCode::NOT_FOUND if sub_status != SubStatusCode::READ_SESSION_NOT_AVAILABLE => {
                CaptureRule::Merge
            }
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => CaptureRule::Merge,
            StatusCode::TOO_MANY_REQUESTS => CaptureRule::MergeIfNewer,
            _ => CaptureRule::Ignore,
        }
    }
}

/// Result of [`SessionTokenStore::capture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// Tokens were merged; `advanced` counts entries whose stored token moved.
    Merged { advanced: usize },
    /// The response carried no token, or its status is not captured.
    Ignored,
    /// A throttled response echoed a token no newer than the one sent.
    Suppressed,
    /// The response header could not be parsed.
    Rejected(SessionTokenError),
}

#[derive(Debug, Default)]
struct Bindings {
    by_name: HashMap<CollectionName, CollectionIdentity>,
    by_identity: HashMap<CollectionIdentity, CollectionName>,
}

/// Session tokens observed by one client, per `(identity, range)`.
///
/// Merges only take per-shard locks of the identity's range map. Name
/// bindings sit behind a separate lock and are touched only by
/// [`bind`](Self::bind) and the by-name helpers.
///
/// Entries are never evicted for size. An identity is dropped only when its
/// name is rebound or it is cleared explicitly; once rebound away from, an
/// identity is retired and later merges for it are discarded so that late
/// responses cannot resurrect it.
#[derive(Debug, Default)]
pub struct SessionTokenStore {
    bindings: RwLock<Bindings>,
    tokens: DashMap<CollectionIdentity, Arc<RangeTokens>>,
    retired: DashSet<CollectionIdentity>,
}

impl SessionTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------------

    /// Binds `name` to `identity`.
    ///
    /// If `name` was bound to a different identity, that identity's tokens
    /// are dropped and it is retired. Returns the previous identity.
    ///
    /// A retired identity is never bound again: the call leaves the current
    /// binding in place and returns it. Clients sharing a store may still
    /// cache an identity that another client already rebound away from.
    pub fn bind(&self, name: &CollectionName, identity: CollectionIdentity) -> Option<CollectionIdentity> {
        let mut bindings = self.bindings.write();
        if self.retired.contains(&identity) {
            let current = bindings.by_name.get(name).copied();
            debug!(collection = %name, %identity, current = ?current, "ignoring bind to retired identity");
            return current;
        }
        let previous = bindings.by_name.insert(name.clone(), identity);
        bindings.by_identity.insert(identity, name.clone());

        if let Some(old) = previous.filter(|old| *old != identity) {
            bindings.by_identity.remove(&old);
            self.tokens.remove(&old);
            self.retired.insert(old);
            info!(collection = %name, %old, new = %identity, "rebound collection, dropped old session tokens");
        }
        previous
    }

    /// Whether `identity` was rebound away from and will not come back.
    pub fn is_retired(&self, identity: CollectionIdentity) -> bool {
        self.retired.contains(&identity)
    }

    pub fn identity_for(&self, name: &CollectionName) -> Option<CollectionIdentity> {
        self.bindings.read().by_name.get(name).copied()
    }

    pub fn name_for(&self, identity: CollectionIdentity) -> Option<CollectionName> {
        self.bindings.read().by_identity.get(&identity).cloned()
    }

    // ------------------------------------------------------------------------
    // Merge and resolve
    // ------------------------------------------------------------------------

    /// Merges `token` into the stored token for `(identity, range_id)`.
    ///
    /// Returns true if the stored token advanced.
    pub fn merge(&self, identity: CollectionIdentity, range_id: &RangeId, token: &SessionToken) -> bool {
        if self.retired.contains(&identity) {
            debug!(%identity, range = %range_id, "discarding token for retired identity");
            return false;
        }
        let ranges = Arc::clone(self.tokens.entry(identity).or_default().value());
        let advanced = match ranges.entry(range_id.clone()) {
            Entry::Occupied(mut entry) => {
                let merged = entry.get().merge(token);
                if merged == *entry.get() {
                    false
                } else {
                    entry.insert(merged);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(token.clone());
                true
            }
        };
        // A rebind may have retired the identity while we were merging.
        if self.retired.contains(&identity) {
            self.tokens.remove(&identity);
            return false;
        }
        advanced
    }

    /// Merges every entry of `header`, each under its own range id.
    ///
    /// Returns the number of entries that advanced a stored token.
    pub fn merge_header(&self, identity: CollectionIdentity, header: &SessionTokenHeader) -> usize {
        header
            .entries()
            .iter()
            .filter(|(range_id, token)| self.merge(identity, range_id, token))
            .count()
    }

    pub fn resolve(&self, identity: CollectionIdentity, range_id: &RangeId) -> Option<SessionToken> {
        let ranges = self.tokens.get(&identity)?;
        ranges.get(range_id).map(|token| token.value().clone())
    }

    /// Like [`resolve`](Self::resolve), but a range without its own token
    /// inherits the merge of its parents' tokens.
    pub fn resolve_with_parents(
        &self,
        identity: CollectionIdentity,
        range_id: &RangeId,
        parents: &[RangeId],
    ) -> Option<SessionToken> {
        if let Some(token) = self.resolve(identity, range_id) {
            return Some(token);
        }
        parents
            .iter()
            .filter_map(|parent| self.resolve(identity, parent))
            .reduce(|acc, token| acc.merge(&token))
    }

    /// The session header for a single range, `"<rangeId>:<token>"`.
    pub fn resolve_header(
        &self,
        identity: CollectionIdentity,
        range_id: &RangeId,
        parents: &[RangeId],
    ) -> Option<String> {
        self.resolve_with_parents(identity, range_id, parents)
            .map(|token| SessionTokenHeader::single(range_id.clone(), token).to_string())
    }

    /// The header for every known range of `identity`, in range-id order.
    ///
    /// Empty when nothing has been observed.
    pub fn resolve_global(&self, identity: CollectionIdentity) -> String {
        self.snapshot(identity)
            .into_iter()
            .collect::<SessionTokenHeader>()
            .to_string()
    }

    pub fn snapshot(&self, identity: CollectionIdentity) -> BTreeMap<RangeId, SessionToken> {
        self.tokens
            .get(&identity)
            .map(|ranges| {
                ranges
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of identities with at least one observed range map.
    pub fn identity_count(&self) -> usize {
        self.tokens.len()
    }

    // ------------------------------------------------------------------------
    // Clearing
    // ------------------------------------------------------------------------

    pub fn clear(&self, identity: CollectionIdentity) {
        if self.tokens.remove(&identity).is_some() {
            debug!(%identity, "session tokens cleared");
        }
    }

    /// Clears the tokens of the identity currently bound to `name`.
    pub fn clear_by_name(&self, name: &CollectionName) {
        if let Some(identity) = self.identity_for(name) {
            self.clear(identity);
        }
    }

    // ------------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------------

    /// Applies a response's session header to the store.
    ///
    /// `range_id` is the range the request targeted and `sent` the token it
    /// carried. Entries tagged with other range ids (for example split
    /// children) are merged under their own ids.
    pub fn capture(
        &self,
        identity: CollectionIdentity,
        range_id: &RangeId,
        response: &Response,
        sent: Option<&SessionToken>,
    ) -> Capture {
        let Some(raw) = response.session_token.as_deref() else {
            return Capture::Ignored;
        };

        let rule = CaptureRule::for_status(response.status, response.sub_status);
        if rule == CaptureRule::Ignore {
            return Capture::Ignored;
        }

        let header = match raw.parse::<SessionTokenHeader>() {
            Ok(header) => header,
            Err(e) => {
                warn!(%identity, range = %range_id, error = %e, "unparseable session token in response");
                return Capture::Rejected(e);
            }
        };

        if rule == CaptureRule::MergeIfNewer {
            let newer = match (header.token_for(range_id), sent) {
                (Some(received), Some(sent)) => received.is_newer_than(sent),
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !newer {
                debug!(
                    %identity,
                    range = %range_id,
                    status = %response.status,
                    "throttled response echoed sent token, not captured"
                );
                return Capture::Suppressed;
            }
        }

        let advanced = self.merge_header(identity, &header);
        Capture::Merged { advanced }
    }
}
