//! Per-key coordination: the quorum read path with digest verification and
//! scheduled read-repair, and the write path with hinted handoff for
//! replicas that are down or unresponsive.

mod config;
mod consistency;
mod context;
mod hints;
mod read;
mod server;
mod traits;
mod write;

pub use config::NodeConfig;
pub use consistency::ConsistencyManager;
pub use context::ServerContext;
pub use hints::{HintBacklog, HintStore, HintedHandoff};
pub use read::ReadCoordinator;
pub use server::handle_message;
pub use traits::{FailureDetector, Gossiper, LocalStore, NullStats, StatsSink, StoreError, Transport};
pub use write::WriteCoordinator;

use serde::{Deserialize, Serialize};

/// How many replica acknowledgements a coordinated request must observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    One,
    Quorum,
    All,
}

impl ConsistencyLevel {
    pub fn block_for(self, replication_factor: usize) -> usize {
        match self {
            ConsistencyLevel::One => 1,
            ConsistencyLevel::Quorum => replication_factor / 2 + 1,
            ConsistencyLevel::All => replication_factor,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{alive} replicas alive, {required} required")]
    Unavailable { required: usize, alive: usize },
    #[error("{received} of {required} replicas answered before the deadline")]
    Timeout { received: usize, required: usize },
    #[error("data and digest reads disagree")]
    DigestMismatch,
    #[error("configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Strategy(#[from] placement::StrategyError),
    #[error(transparent)]
    Transport(#[from] wire::TransportError),
    #[error(transparent)]
    Wire(#[from] wire::WireError),
    #[error("storage: {0}")]
    Storage(#[from] traits::StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_for_counts() {
        assert_eq!(ConsistencyLevel::One.block_for(3), 1);
        assert_eq!(ConsistencyLevel::Quorum.block_for(3), 2);
        assert_eq!(ConsistencyLevel::Quorum.block_for(4), 3);
        assert_eq!(ConsistencyLevel::Quorum.block_for(5), 3);
        assert_eq!(ConsistencyLevel::All.block_for(3), 3);
    }
}
