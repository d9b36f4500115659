//! The token ring data model: tokens over an order-preserving string space,
//! half-open wrapping ranges, decorated keys, partitioners, and the
//! authoritative in-memory ring state (`TokenMetadata`).

mod endpoint;
mod metadata;
mod partitioner;
mod range;
mod token;

pub use endpoint::Endpoint;
pub use metadata::{first_token_index, PendingRanges, RingSnapshot, TokenMetadata};
pub use partitioner::{DomainPartitioner, OrderPreservingPartitioner, Partitioner, TokenFactory};
pub use range::Range;
pub use token::{DecoratedKey, Token};

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("invalid token {token:?}: {reason}")]
    InvalidToken { token: String, reason: &'static str },
    #[error("token {token} is already bound to {endpoint}")]
    TokenBound { token: Token, endpoint: Endpoint },
    #[error("token bytes are not valid UTF-8")]
    InvalidTokenBytes(#[from] std::string::FromUtf8Error),
}
