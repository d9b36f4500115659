use crate::cache::EndpointCache;
use crate::{ReplicationStrategy, StrategyError};
use ring::{first_token_index, Endpoint, RingSnapshot, Token};
use std::sync::Arc;

/// Rack-oblivious placement: the primary replica is the endpoint owning the
/// arc the token falls in (each member owns the arc ending just past its own
/// token), and further replicas follow in ring order.
#[derive(Debug)]
pub struct SimpleStrategy {
    replication_factor: usize,
    cache: EndpointCache,
}

impl SimpleStrategy {
    pub fn new(replication_factor: usize) -> Self {
        Self {
            replication_factor,
            cache: EndpointCache::default(),
        }
    }
}

impl ReplicationStrategy for SimpleStrategy {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn calculate_natural_endpoints(
        &self,
        token: &Token,
        ring: &RingSnapshot,
    ) -> Result<Vec<Endpoint>, StrategyError> {
        let sorted = ring.sorted_tokens();
        if sorted.is_empty() {
            return Ok(Vec::new());
        }
        // The owner is the predecessor of the ceiling token: keys of the arc
        // (t, successor(t)] land on t's endpoint.
        let n = sorted.len();
        let start = (first_token_index(sorted, token) + n - 1) % n;

        let mut replicas = Vec::with_capacity(self.replication_factor);
        for ring_token in ring.ring_iter(start) {
            let endpoint = ring.endpoint_for(ring_token).unwrap();
            if !replicas.contains(&endpoint) {
                replicas.push(endpoint);
            }
            if replicas.len() == self.replication_factor {
                break;
            }
        }
        Ok(replicas)
    }

    fn natural_endpoints(
        &self,
        token: &Token,
        ring: &RingSnapshot,
    ) -> Result<Arc<Vec<Endpoint>>, StrategyError> {
        if let Some(hit) = self.cache.get(token) {
            return Ok(hit);
        }
        let replicas = self.calculate_natural_endpoints(token, ring)?;
        Ok(self.cache.insert(token.clone(), replicas))
    }

    fn clear_endpoint_cache(&self) {
        self.cache.clear();
    }
}
