//! Membership filters used on the read path: a paged open bitset sized for
//! very large bit counts, and a double-hashing Bloom filter over it with a
//! frozen on-disk layout.

mod bitset;
mod bloom;
mod calculations;
mod murmur;

pub use bitset::PagedBitSet;
pub use bloom::{string_key_bytes, BloomFilter};
pub use calculations::BloomSpec;
pub use murmur::murmur2_64;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid hash count {0}")]
    InvalidHashCount(i32),
    #[error("invalid word length {0}")]
    InvalidWordLength(i32),
}
