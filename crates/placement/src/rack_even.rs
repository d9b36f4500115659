use crate::cache::EndpointCache;
use crate::{ReplicationStrategy, Snitch, StrategyError};
use ring::{first_token_index, Endpoint, RingSnapshot, Token};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Permute a domain byte: rotate right one bit, then swap odd and even bits.
/// The four values that transform into themselves are remapped onto a fixed
/// 4-cycle instead; the table is load-bearing for placement compatibility and
/// must not change.
pub fn shuffle_domain(domain: u8) -> u8 {
    match domain {
        0x00 => 0x55,
        0x55 => 0xff,
        0xff => 0xaa,
        0xaa => 0x00,
        other => {
            let rotated = other.rotate_right(1);
            ((rotated & 0xaa) >> 1) | ((rotated & 0x55) << 1)
        }
    }
}

/// Deterministic secondary-replica pick for retries: distinct successive
/// `try_count` values land on distinct non-primary replicas, spread across
/// endpoints by the doubly shuffled domain.
pub fn failover_index(domain: u8, cycle: u64, try_count: u64, replica_count: usize) -> usize {
    debug_assert!(replica_count > 1);
    let spread = shuffle_domain(shuffle_domain(domain)) as u64;
    ((cycle + try_count + spread) % (replica_count as u64 - 1)) as usize
}

/// One replica per rack. The primary comes from the full ring; each further
/// replica comes from the sub-ring of not-yet-used racks, searched at a
/// token whose domain has been shuffled once more.
pub struct RackEvenStrategy {
    replication_factor: usize,
    snitch: Arc<dyn Snitch>,
    cache: EndpointCache,
}

impl RackEvenStrategy {
    pub fn new(replication_factor: usize, snitch: Arc<dyn Snitch>) -> Self {
        Self {
            replication_factor,
            snitch,
            cache: EndpointCache::default(),
        }
    }

    /// Rack-even placement is only well formed when the member racks match
    /// the replication factor exactly.
    pub fn validate(&self, ring: &RingSnapshot) -> Result<(), StrategyError> {
        self.racks(ring).map(|_| ())
    }

    fn racks(&self, ring: &RingSnapshot) -> Result<HashMap<Endpoint, String>, StrategyError> {
        let rack_of: HashMap<Endpoint, String> = ring
            .normal_endpoints()
            .map(|(_, endpoint)| (endpoint, self.snitch.rack(&endpoint)))
            .collect();
        let distinct: HashSet<&String> = rack_of.values().collect();
        if distinct.len() != self.replication_factor {
            return Err(StrategyError::RackCount {
                required: self.replication_factor,
                found: distinct.len(),
            });
        }
        Ok(rack_of)
    }
}

impl ReplicationStrategy for RackEvenStrategy {
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
        let rack_of = self.racks(ring)?;

        let mut replicas = Vec::with_capacity(self.replication_factor);
        let mut remaining: HashSet<&String> = rack_of.values().collect();

        // Replica 0 from the full ring.
        let primary_token = &sorted[first_token_index(sorted, token)];
        let primary = ring.endpoint_for(primary_token).unwrap();
        replicas.push(primary);
        remaining.remove(&rack_of[&primary]);

        let mut search = token.clone();
        while replicas.len() < self.replication_factor && !remaining.is_empty() {
            let domain = search.domain().unwrap_or(0);
            search = Token::with_domain(shuffle_domain(domain), search.past_domain());

            // Sub-ring of every rack not yet holding a replica.
            let sub: Vec<Token> = sorted
                .iter()
                .filter(|t| {
                    let endpoint = ring.endpoint_for(t).unwrap();
                    remaining.contains(&rack_of[&endpoint])
                })
                .cloned()
                .collect();
            if sub.is_empty() {
                break;
            }
            let pick_token = &sub[first_token_index(&sub, &search)];
            let pick = ring.endpoint_for(pick_token).unwrap();
            replicas.push(pick);
            remaining.remove(&rack_of[&pick]);
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

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use ring::TokenMetadata;

    struct RackByHost;

    impl Snitch for RackByHost {
        fn rack(&self, endpoint: &Endpoint) -> String {
            // 10.0.<rack>.<host>
            match endpoint.addr().ip() {
                std::net::IpAddr::V4(v4) => format!("RACK{}", v4.octets()[2]),
                other => panic!("unexpected address {other}"),
            }
        }

        fn datacenter(&self, _endpoint: &Endpoint) -> String {
            "DC1".to_string()
        }

        fn sort_by_proximity(&self, _reference: &Endpoint, _endpoints: &mut Vec<Endpoint>) {}
    }

    fn ep(rack: u8, host: u8) -> Endpoint {
        format!("10.0.{rack}.{host}:7000").parse().unwrap()
    }

    fn six_node_ring() -> TokenMetadata {
        // 00 -> X:RACK1, 2a -> Y:RACK2, 55 -> Z:RACK3,
        // 80 -> X:RACK1, aa -> Y:RACK2, d5 -> Z:RACK3
        let meta = TokenMetadata::new();
        meta.update_normal_token(Token::from("00"), ep(1, 1));
        meta.update_normal_token(Token::from("2a"), ep(2, 1));
        meta.update_normal_token(Token::from("55"), ep(3, 1));
        meta.update_normal_token(Token::from("80"), ep(1, 2));
        meta.update_normal_token(Token::from("aa"), ep(2, 2));
        meta.update_normal_token(Token::from("d5"), ep(3, 2));
        meta
    }

    #[test]
    fn shuffle_is_a_permutation_with_frozen_specials() {
        let mut seen = [false; 256];
        for domain in 0u16..=255 {
            let image = shuffle_domain(domain as u8);
            assert!(!seen[image as usize], "collision at {domain:#04x}");
            seen[image as usize] = true;
        }
        assert_eq!(shuffle_domain(0x00), 0x55);
        assert_eq!(shuffle_domain(0x55), 0xff);
        assert_eq!(shuffle_domain(0xff), 0xaa);
        assert_eq!(shuffle_domain(0xaa), 0x00);
    }

    #[test]
    fn one_replica_per_rack_in_token_order() {
        let meta = six_node_ring();
        let strategy = RackEvenStrategy::new(3, Arc::new(RackByHost));

        let replicas = strategy
            .calculate_natural_endpoints(&Token::from("16"), &meta.snapshot())
            .unwrap();
        assert_eq!(replicas, vec![ep(2, 1), ep(3, 1), ep(1, 2)]);

        let racks: HashSet<String> = replicas.iter().map(|e| RackByHost.rack(e)).collect();
        assert_eq!(racks.len(), 3);
    }

    #[test]
    fn rack_count_must_match_replication_factor() {
        let meta = six_node_ring();
        let strategy = RackEvenStrategy::new(2, Arc::new(RackByHost));
        assert!(matches!(
            strategy.validate(&meta.snapshot()),
            Err(StrategyError::RackCount {
                required: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn placement_is_rack_even_for_arbitrary_keys() {
        let meta = TokenMetadata::new();
        let mut rng = SmallRng::seed_from_u64(7);
        for rack in 1..=3u8 {
            for host in 1..=4u8 {
                // Random domain-prefixed token per node.
                let token = Token::with_domain(rng.gen(), &format!("{:04x}", rng.gen::<u16>()));
                meta.update_normal_token(token, ep(rack, host));
            }
        }
        let strategy = RackEvenStrategy::new(3, Arc::new(RackByHost));
        let ring = meta.snapshot();

        for _ in 0..256 {
            let key = Token::with_domain(rng.gen(), &format!("{:04x}", rng.gen::<u16>()));
            let replicas = strategy.calculate_natural_endpoints(&key, &ring).unwrap();
            assert_eq!(replicas.len(), 3, "key {key}");

            let endpoints: HashSet<_> = replicas.iter().collect();
            assert_eq!(endpoints.len(), 3, "key {key}");

            let racks: HashSet<String> = replicas.iter().map(|e| RackByHost.rack(e)).collect();
            assert_eq!(racks.len(), 3, "key {key}");
        }
    }

    #[test]
    fn failover_spreads_retries_over_distinct_replicas() {
        for domain in [0u8, 0x16, 0x55, 0x9c, 0xff] {
            for cycle in [0u64, 1, 17] {
                let picked: HashSet<usize> = (0..4)
                    .map(|try_count| failover_index(domain, cycle, try_count, 5))
                    .collect();
                assert_eq!(picked.len(), 4, "domain {domain:#04x} cycle {cycle}");
            }
        }
    }
}
