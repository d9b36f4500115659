//! The messaging surface: verbs with frozen wire ordinals, inter-node
//! messages, the column/row version model the read path resolves over, and
//! the binary codecs for mutations, reads, and gossip state values.

mod gossip;
mod message;
mod row;
mod verb;

pub use gossip::{MoveValue, MOVE_STATE_KEY, STATE_DELIMITER};
pub use message::{Message, Mutation, ReadCommand, ReadResponse};
pub use row::{Column, Digest, Row};
pub use verb::Verb;

use ring::Endpoint;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown verb ordinal {0}")]
    UnknownVerb(u8),
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("{field} is not valid UTF-8")]
    BadText { field: &'static str },
    #[error("unrecognized gossip state {0:?}")]
    BadGossipState(String),
    #[error("unknown read response kind {0}")]
    BadResponseKind(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("endpoint {0} is unreachable")]
    Unreachable(Endpoint),
    #[error("request to {0} timed out")]
    Timeout(Endpoint),
    #[error("send to {0} failed: {1}")]
    Send(Endpoint, String),
    #[error(transparent)]
    Codec(#[from] WireError),
}
