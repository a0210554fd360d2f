//! Read-many fan-out.
//!
//! Pairs are grouped by the range that owns them and each group becomes one
//! `ReadMany` request carrying that range's session token. Groups run
//! concurrently up to the configured limit. A group that lands on a moved
//! range is regrouped against a fresh routing map and re-issued on its own;
//! if a regrouped part lands on a moved range again, the call fails with
//! `PartitionRangeGone` and nothing is re-sent.

use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use tessera_retry::RetryDiagnostics;
use tessera_routing::{PartitionRange, RoutingMap};
use tessera_types::{ItemId, OperationKind, PartitionKey, PartitionKeyDefinition, RangeId};
use tracing::debug;

use crate::client::{ClientInner, RequestOptions, check_reply, items_from_body, until_cancelled};
use crate::collection::ResolvedCollection;
use crate::error::{ClientError, Result};

/// Items found by a read-many call.
///
/// Items are ordered by owning range, and by input order within a range.
/// Pairs that matched nothing are simply absent.
#[derive(Debug)]
pub struct ReadManyResponse {
    pub items: Vec<Value>,
    pub diagnostics: RetryDiagnostics,
}

impl ReadManyResponse {
    pub fn count(&self) -> usize {
        self.items.len()
    }
}

/// Pairs owned by one range, in input order.
#[derive(Debug, Clone)]
pub(crate) struct RangeGroup {
    pub(crate) range: PartitionRange,
    pub(crate) items: Vec<(ItemId, PartitionKey)>,
}

/// Groups `items` by owning range, ordered by range start.
///
/// Every key is resolved here, so an incomplete key fails the whole call
/// before anything is sent.
pub(crate) fn group_by_range(
    map: &RoutingMap,
    definition: &PartitionKeyDefinition,
    items: &[(ItemId, PartitionKey)],
) -> Result<Vec<RangeGroup>> {
    let mut groups: Vec<RangeGroup> = Vec::new();
    let mut slots: HashMap<RangeId, usize> = HashMap::new();

    for (id, key) in items {
        let range = map.resolve_range(key, definition)?;
        let slot = *slots.entry(range.id().clone()).or_insert_with(|| {
            groups.push(RangeGroup {
                range: range.clone(),
                items: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].items.push((id.clone(), key.clone()));
    }

    groups.sort_by(|a, b| a.range.min().cmp(b.range.min()));
    Ok(groups)
}

struct GroupOutcome {
    items: Vec<Value>,
    diagnostics: RetryDiagnostics,
}

pub(crate) async fn read_many(
    inner: &ClientInner,
    resolved: ResolvedCollection,
    items: &[(ItemId, PartitionKey)],
    options: &RequestOptions,
) -> Result<ReadManyResponse> {
    let groups = group_by_range(&resolved.map, &resolved.info.partition_key, items)?;
    debug!(
        collection = %resolved.name(),
        groups = groups.len(),
        items = items.len(),
        "read-many grouped by range"
    );

    let mut outcomes: Vec<Option<GroupOutcome>> = Vec::with_capacity(groups.len());
    outcomes.resize_with(groups.len(), || None);

    let limit = inner.options.read_many_concurrency();
    let mut pending = groups.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();
    for (slot, group) in pending.by_ref().take(limit) {
        in_flight.push(run_group(inner, &resolved, slot, group, options));
    }

    while let Some(finished) = in_flight.next().await {
        // A terminal failure drops the remaining groups with `in_flight`.
        let (slot, outcome) = finished?;
        outcomes[slot] = Some(outcome);
        if let Some((slot, group)) = pending.next() {
            in_flight.push(run_group(inner, &resolved, slot, group, options));
        }
    }

    let mut response = ReadManyResponse {
        items: Vec::new(),
        diagnostics: RetryDiagnostics::new(),
    };
    for outcome in outcomes.into_iter().flatten() {
        response.items.extend(outcome.items);
        response.diagnostics.absorb(outcome.diagnostics);
    }
    Ok(response)
}

fn run_group<'a>(
    inner: &'a ClientInner,
    resolved: &'a ResolvedCollection,
    slot: usize,
    group: RangeGroup,
    options: &'a RequestOptions,
) -> BoxFuture<'a, Result<(usize, GroupOutcome)>> {
    async move {
        match read_group(inner, resolved, &group, options).await {
            Ok(outcome) => Ok((slot, outcome)),
            Err(ClientError::PartitionRangeGone { range, diagnostics }) => {
                debug!(?range, items = group.items.len(), "read-many group hit a moved range, regrouping");
                let cancel = inner.cancellation(options);
                let refreshed = until_cancelled(&cancel, inner.routing.refresh_routing(resolved)).await?;
                let mut outcome = GroupOutcome {
                    items: Vec::new(),
                    diagnostics: *diagnostics,
                };
                for sub in group_by_range(&refreshed.map, &refreshed.info.partition_key, &group.items)? {
                    let part = read_group(inner, &refreshed, &sub, options).await?;
                    outcome.items.extend(part.items);
                    outcome.diagnostics.absorb(part.diagnostics);
                }
                Ok((slot, outcome))
            }
            Err(e) => Err(e),
        }
    }
    .boxed()
}

async fn read_group(
    inner: &ClientInner,
    resolved: &ResolvedCollection,
    group: &RangeGroup,
    options: &RequestOptions,
) -> Result<GroupOutcome> {
    let request = inner
        .request(OperationKind::ReadMany, resolved)
        .with_items(group.items.clone());
    let attempted = inner
        .execute_on_range(resolved, &group.range, request, options)
        .await?;
    let attempted = check_reply(resolved.name(), attempted, false)?;
    let items = items_from_body(&attempted.response.body)?;
    Ok(GroupOutcome {
        items,
        diagnostics: attempted.diagnostics,
    })
}
