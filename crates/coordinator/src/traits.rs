use async_trait::async_trait;
use ring::Endpoint;
use wire::{Message, Mutation, ReadCommand, ReadResponse, TransportError};

/// The local storage engine collaborator (commit log, memtables, sstables
/// live behind it).
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn apply(&self, mutation: &Mutation) -> Result<(), StoreError>;
    async fn read(&self, command: &ReadCommand) -> Result<ReadResponse, StoreError>;
    /// Flush in-memory state for `table`, rolling write-ahead state.
    async fn flush(&self, table: &str) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// The inter-node messaging collaborator. Per-destination delivery is FIFO.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget delivery.
    async fn send_one_way(&self, to: Endpoint, message: Message) -> Result<(), TransportError>;
    /// Request-response round trip.
    async fn send_rr(&self, to: Endpoint, message: Message) -> Result<Message, TransportError>;
}

/// Cluster membership chatter: the live/dead view, plus the local node's
/// outbound application state.
pub trait Gossiper: Send + Sync {
    fn live_endpoints(&self) -> Vec<Endpoint>;
    fn dead_endpoints(&self) -> Vec<Endpoint>;
    /// Refresh the liveness timestamp for an endpoint we just heard from.
    fn update_timestamp(&self, endpoint: &Endpoint);
    /// The gossip startup generation of an endpoint, when known.
    fn generation(&self, endpoint: &Endpoint) -> Option<u64>;
    /// Advertised load, when the endpoint gossips one.
    fn load(&self, endpoint: &Endpoint) -> Option<f64>;
    /// Publish a local application-state value to the cluster.
    fn announce(&self, state_key: &str, value: String);
}

pub trait FailureDetector: Send + Sync {
    fn is_alive(&self, endpoint: &Endpoint) -> bool;
}

/// Explicit statistics collaborator; invoked at well-defined points rather
/// than woven through call sites.
pub trait StatsSink: Send + Sync {
    fn compaction_started(&self, table: &str);
    fn compaction_finished(&self, table: &str);
    fn stats_tick(&self);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn compaction_started(&self, _table: &str) {}
    fn compaction_finished(&self, _table: &str) {}
    fn stats_tick(&self) {}
}
