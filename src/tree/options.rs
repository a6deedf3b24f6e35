use crate::types::{IndexError, Result};

use super::format::{BLOCK_HDR_LEN, ENTRY_LEN, INDEX_PAIR_LEN};

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: usize = 256;
/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: usize = 1 << 20;
/// Block size used unless configured otherwise.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Layout options applied by [`super::TokenTreeBuilder::finish`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeOptions {
    /// Target size of a block's fixed part in bytes. Leaves hold as many entry
    /// slots as fit; overflow words are stored past that budget.
    pub block_size: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl TreeOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block size.
    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Checks the options are usable.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(IndexError::Invalid("block size out of range"));
        }
        Ok(())
    }

    /// Entries per leaf block.
    pub fn leaf_capacity(&self) -> usize {
        ((self.block_size - BLOCK_HDR_LEN) / ENTRY_LEN).min(u16::MAX as usize)
    }

    /// Children per index block.
    pub fn index_fanout(&self) -> usize {
        ((self.block_size - BLOCK_HDR_LEN) / INDEX_PAIR_LEN).min(u16::MAX as usize)
    }
}

/// Options applied when opening a serialized tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadOptions {
    /// Whether block checksums are verified as blocks are visited.
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

impl ReadOptions {
    /// Enables or disables block checksum verification.
    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }
}
