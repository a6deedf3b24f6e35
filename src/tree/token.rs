use crate::types::{IndexError, Result};

use super::offsets::OffsetSet;

/// An indexed key together with the row offsets stored under it.
///
/// Tokens produced by [`super::TokenTreeBuilder`] and by
/// [`super::TokenTree`] are the same type, so in-memory and on-disk results
/// merge interchangeably.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    key: i64,
    offsets: OffsetSet,
}

impl Token {
    /// Creates a token from its key and offsets.
    pub fn new(key: i64, offsets: OffsetSet) -> Self {
        Self { key, offsets }
    }

    /// The token key.
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Offsets stored under the key.
    pub fn offsets(&self) -> &OffsetSet {
        &self.offsets
    }

    /// Consumes the token, returning its offsets.
    pub fn into_offsets(self) -> OffsetSet {
        self.offsets
    }

    /// Maps each offset through `converter`, typically to the partition key the
    /// base table stores at that position.
    pub fn keys<'a, K, F>(&'a self, converter: F) -> impl Iterator<Item = K> + 'a
    where
        F: Fn(u64) -> K + 'a,
    {
        self.offsets.iter().map(converter)
    }

    /// Unions `other`'s offsets into `self`.
    ///
    /// Fails with [`IndexError::KeyMismatch`] when the keys differ, leaving
    /// `self` untouched.
    pub fn merge(&mut self, other: &Token) -> Result<()> {
        if self.key != other.key {
            return Err(IndexError::KeyMismatch {
                left: self.key,
                right: other.key,
            });
        }
        self.offsets.union(&other.offsets);
        Ok(())
    }
}

/// Combines two tokens for the same key into one holding the union of their
/// offsets.
pub fn merge(a: &Token, b: &Token) -> Result<Token> {
    let mut merged = a.clone();
    merged.merge(b)?;
    Ok(merged)
}
