//! Token index engine.
//!
//! Maps 64-bit tokens (typically partitioner hashes of row keys) to the sets
//! of row offsets that carry them, and serializes that map as a compact,
//! checksummed block tree that can be searched and scanned in place.

#![warn(missing_docs)]

pub mod primitives;
pub mod tree;
pub mod types;

pub use tree::{
    merge, OffsetSet, RangeIterator, ReadOptions, Token, TokenTree, TokenTreeBuilder,
    TreeIterator, TreeOptions,
};
pub use types::{IndexError, Result};
