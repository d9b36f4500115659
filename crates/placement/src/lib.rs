//! Replica placement: maps a token to the ordered endpoint list that serves
//! it, for one table's replication configuration. The rack-even variant
//! spreads replicas one per rack using per-rack sub-rings and a deterministic
//! domain shuffle between picks.

mod cache;
mod rack_even;
mod simple;

pub use rack_even::{failover_index, shuffle_domain, RackEvenStrategy};
pub use simple::SimpleStrategy;

use ring::{Endpoint, Range, RingSnapshot, Token};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("rack-even placement requires {required} distinct racks, found {found}")]
    RackCount { required: usize, found: usize },
}

/// Topology information collaborator: rack and datacenter assignment, and
/// network-proximity ordering.
pub trait Snitch: Send + Sync {
    fn rack(&self, endpoint: &Endpoint) -> String;
    fn datacenter(&self, endpoint: &Endpoint) -> String;
    /// Reorder `endpoints` by proximity to `reference`, closest first.
    fn sort_by_proximity(&self, reference: &Endpoint, endpoints: &mut Vec<Endpoint>);
}

/// One table's placement policy.
pub trait ReplicationStrategy: Send + Sync {
    fn replication_factor(&self) -> usize;

    /// Pure placement computation against a ring snapshot. The returned list
    /// is ordered, deduplicated, and `replication_factor` long when the ring
    /// offers enough endpoints.
    fn calculate_natural_endpoints(
        &self,
        token: &Token,
        ring: &RingSnapshot,
    ) -> Result<Vec<Endpoint>, StrategyError>;

    /// Cached placement lookup. The cache memoizes against whatever ring the
    /// first caller passed; `clear_endpoint_cache` must run on every ring
    /// change.
    fn natural_endpoints(
        &self,
        token: &Token,
        ring: &RingSnapshot,
    ) -> Result<Arc<Vec<Endpoint>>, StrategyError>;

    fn clear_endpoint_cache(&self);

    /// Ranges served per endpoint: each arc `(predecessor, token]` assigned
    /// to the replicas computed at its right token.
    fn address_ranges(
        &self,
        ring: &RingSnapshot,
    ) -> Result<HashMap<Endpoint, Vec<Range>>, StrategyError> {
        let mut out: HashMap<Endpoint, Vec<Range>> = HashMap::new();
        for token in ring.sorted_tokens() {
            let left = ring.predecessor(token).unwrap();
            let range = Range::new(left.clone(), token.clone());
            for endpoint in self.calculate_natural_endpoints(token, ring)? {
                out.entry(endpoint).or_default().push(range.clone());
            }
        }
        Ok(out)
    }

    /// The inverse view: replicas per served range.
    fn range_addresses(
        &self,
        ring: &RingSnapshot,
    ) -> Result<HashMap<Range, Vec<Endpoint>>, StrategyError> {
        let mut out = HashMap::new();
        for token in ring.sorted_tokens() {
            let left = ring.predecessor(token).unwrap();
            let range = Range::new(left.clone(), token.clone());
            out.insert(range, self.calculate_natural_endpoints(token, ring)?);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Simple,
    RackEven,
}

/// One table's replication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub table: String,
    pub replication_factor: usize,
    pub strategy: StrategyKind,
}

pub fn build_strategy(
    config: &ReplicaConfig,
    snitch: Arc<dyn Snitch>,
) -> Arc<dyn ReplicationStrategy> {
    match config.strategy {
        StrategyKind::Simple => Arc::new(SimpleStrategy::new(config.replication_factor)),
        StrategyKind::RackEven => Arc::new(RackEvenStrategy::new(
            config.replication_factor,
            snitch,
        )),
    }
}
