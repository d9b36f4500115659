use crate::traits::{FailureDetector, Gossiper, LocalStore, StatsSink, Transport};
use crate::{CoordinatorError, NodeConfig};
use placement::{ReplicationStrategy, Snitch};
use ring::{Endpoint, Partitioner, RingSnapshot, Token, TokenMetadata};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Everything the coordinators and the ring controller share, constructed
/// once at startup and passed explicitly. There are no process-global
/// singletons; all mutable shared state lives behind `TokenMetadata` or a
/// single-owner task.
pub struct ServerContext {
    pub config: NodeConfig,
    pub partitioner: Arc<dyn Partitioner>,
    pub metadata: Arc<TokenMetadata>,
    pub strategies: HashMap<String, Arc<dyn ReplicationStrategy>>,
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn LocalStore>,
    pub gossiper: Arc<dyn Gossiper>,
    pub failure_detector: Arc<dyn FailureDetector>,
    pub snitch: Arc<dyn Snitch>,
    pub stats: Arc<dyn StatsSink>,
}

impl ServerContext {
    pub fn local(&self) -> Endpoint {
        self.config.listen
    }

    pub fn strategy(
        &self,
        table: &str,
    ) -> Result<&Arc<dyn ReplicationStrategy>, CoordinatorError> {
        self.strategies
            .get(table)
            .ok_or_else(|| CoordinatorError::Configuration(format!("unknown table {table:?}")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    /// The absolute deadline for a request starting now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.config.rpc_timeout
    }

    /// The ring token of a raw key.
    pub fn key_token(&self, key: &[u8]) -> Result<Token, CoordinatorError> {
        let text = std::str::from_utf8(key)
            .map_err(|_| CoordinatorError::Configuration("key is not valid UTF-8".to_string()))?;
        Ok(self.partitioner.token(text))
    }

    /// Natural endpoints plus any endpoints owed writes through pending
    /// ranges containing the token.
    pub fn write_endpoints(
        &self,
        table: &str,
        token: &Token,
        ring: &RingSnapshot,
    ) -> Result<Vec<Endpoint>, CoordinatorError> {
        let strategy = self.strategy(table)?;
        let mut targets = strategy.natural_endpoints(token, ring)?.as_ref().clone();
        for pending in ring.pending_endpoints(table, token) {
            if !targets.contains(&pending) {
                targets.push(pending);
            }
        }
        Ok(targets)
    }

    /// Drop every memoized placement; must run after each ring mutation.
    pub fn clear_endpoint_caches(&self) {
        for strategy in self.strategies.values() {
            strategy.clear_endpoint_cache();
        }
    }
}
