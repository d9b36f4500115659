//! The ring state machine: reacts to gossip membership movement, keeps
//! pending ranges current under concurrent topology change, and drives the
//! local node's own lifecycle (bootstrap, move, decommission, token removal,
//! drain).

mod controller;
mod pending;
mod system;

pub use controller::{OperationMode, RingController, StreamRequest};
pub use pending::compute_pending_ranges;
pub use system::SystemRecord;

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Unrecoverable at startup; the process exits deterministically.
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("operation not allowed while {0}")]
    BadMode(OperationMode),
    #[error(transparent)]
    Ring(#[from] ring::RingError),
    #[error(transparent)]
    Strategy(#[from] placement::StrategyError),
    #[error(transparent)]
    Coordinator(#[from] coordinator::CoordinatorError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Record(#[from] serde_json::Error),
}
