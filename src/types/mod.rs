#![forbid(unsafe_code)]
//! Error types shared by every layer of the token index.

/// CRC32 helpers for header and block integrity.
pub mod checksum;

/// Errors surfaced by the token index engine.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// Failure reported by the underlying byte source or sink.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Header or block validation failed while reading a serialized tree.
    #[error("corrupt format: {0}")]
    CorruptFormat(&'static str),
    /// Two tokens with different keys were asked to merge.
    #[error("token key mismatch: {left} != {right}")]
    KeyMismatch {
        /// Key of the receiving token.
        left: i64,
        /// Key of the token being merged in.
        right: i64,
    },
    /// Serialization was requested before `finish()` refreshed the layout.
    #[error("layout is stale; call finish() before serializing")]
    StaleLayout,
    /// `next_token()` was called on an exhausted iterator.
    #[error("iterator exhausted")]
    Exhausted,
    /// The iterator was used after `close()`.
    #[error("iterator closed")]
    Closed,
    /// Caller supplied an argument outside the supported range.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Returns true when the error reports a malformed serialized tree.
    pub fn is_corruption(&self) -> bool {
        matches!(self, IndexError::CorruptFormat(_))
    }
}
