use placement::{ReplicationStrategy, StrategyError};
use ring::{Endpoint, PendingRanges, Range, RingSnapshot};
use std::collections::{HashMap, HashSet};

/// Recompute one table's pending ranges from the current bootstrap and
/// leaving sets.
///
/// Ranges touched by a leaving endpoint become pending at whoever picks them
/// up once the leave completes. Each bootstrapping endpoint is folded into
/// the post-leave projection one at a time; concurrent bootstraps may
/// overlap, which over-approximates — extra writes, never missed ones.
pub fn compute_pending_ranges(
    strategy: &dyn ReplicationStrategy,
    ring: &RingSnapshot,
) -> Result<PendingRanges, StrategyError> {
    let mut pending: PendingRanges = HashMap::new();
    if ring.bootstrap_tokens().is_empty() && ring.leaving_endpoints().is_empty() {
        return Ok(pending);
    }

    let address_ranges = strategy.address_ranges(ring)?;
    let mut all_left = ring.clone_after_all_left();

    let mut affected: HashSet<Range> = HashSet::new();
    for endpoint in ring.leaving_endpoints() {
        if let Some(ranges) = address_ranges.get(endpoint) {
            affected.extend(ranges.iter().cloned());
        }
    }
    for range in affected {
        let current: HashSet<Endpoint> = strategy
            .calculate_natural_endpoints(&range.right, ring)?
            .into_iter()
            .collect();
        let incoming = strategy.calculate_natural_endpoints(&range.right, &all_left)?;
        let entry: &mut HashSet<Endpoint> = pending.entry(range).or_default();
        entry.extend(incoming.into_iter().filter(|ep| !current.contains(ep)));
    }

    for (token, endpoint) in ring.bootstrap_tokens() {
        all_left.update_normal_token(token.clone(), *endpoint);
        if let Some(owned) = strategy.address_ranges(&all_left)?.get(endpoint) {
            for range in owned {
                pending.entry(range.clone()).or_default().insert(*endpoint);
            }
        }
        all_left.remove_endpoint(endpoint);
    }

    pending.retain(|_, endpoints| !endpoints.is_empty());
    Ok(pending)
}
