//! Token tree: a sorted, block-structured map from 64-bit tokens to row
//! offsets.
//!
//! [`TokenTreeBuilder`] accumulates mappings in memory and serializes them;
//! [`TokenTree`] answers point lookups and ordered scans over the serialized
//! bytes. Both hand out [`RangeIterator`]s yielding [`Token`]s, so union and
//! intersection evaluators consume either without knowing the source.
//! [`TreeOptions`] shapes the layout at build time and [`ReadOptions`] controls
//! checksum verification when reading.

/// Compact offset encodings for leaf slots.
pub mod entry;
/// On-disk header and block layouts.
pub mod format;

mod builder;
mod iter;
mod offsets;
mod options;
mod reader;
mod token;

pub use builder::{BuilderSource, TokenTreeBuilder};
pub use entry::EntryType;
pub use format::TreeHeader;
pub use iter::{IterState, RangeCursor, RangeIterator, TokenSource};
pub use offsets::OffsetSet;
pub use options::{ReadOptions, TreeOptions, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use reader::{LeafWalker, TokenTree, TreeIterator};
pub use token::{merge, Token};
