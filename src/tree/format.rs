//! On-disk layout of a serialized token tree.
//!
//! ```text
//! header | index blocks (root level first) | leaf blocks
//! ```
//!
//! Every block starts with a [`BlockHeader`]; leaf bodies hold fixed-width
//! entries followed by the leaf's overflow words, index bodies hold
//! `(max token, child locator)` pairs.

use core::convert::TryFrom;

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::checksum::{block_crc32, header_crc32};
use crate::types::{IndexError, Result};

/// Magic bytes at the start of every serialized tree.
pub const TREE_MAGIC: [u8; 4] = *b"TKTR";
/// Current format version.
pub const TREE_FORMAT_VERSION: u16 = 1;
/// Length of the fixed tree header.
pub const TREE_HDR_LEN: usize = 56;
/// Length of the fixed per-block header.
pub const BLOCK_HDR_LEN: usize = 24;
/// Width of one leaf entry slot.
pub const ENTRY_LEN: usize = 16;
/// Width of one index pair.
pub const INDEX_PAIR_LEN: usize = 16;
/// Width of one overflow word.
pub const OVERFLOW_WORD_LEN: usize = 8;

/// Bytes covered by the block checksum ahead of the checksum slot.
const BLOCK_CRC_PREFIX: usize = 16;

mod header {
    //! Byte offsets for fixed tree header fields.
    use core::ops::Range;

    pub const MAGIC: Range<usize> = 0..4;
    pub const VERSION: Range<usize> = 4..6;
    pub const HEIGHT: Range<usize> = 6..8;
    pub const COUNT: Range<usize> = 8..16;
    pub const MIN_TOKEN: Range<usize> = 16..24;
    pub const MAX_TOKEN: Range<usize> = 24..32;
    pub const ROOT: Range<usize> = 32..40;
    pub const LEAF_COUNT: Range<usize> = 40..44;
    pub const TOTAL_LEN: Range<usize> = 44..52;
    pub const CRC32: Range<usize> = 52..56;
}

/// Fixed header describing a whole serialized tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeHeader {
    /// 0 for an empty tree, 1 when the root is a leaf, otherwise one more than
    /// the number of index levels.
    pub height: u16,
    /// Number of tokens stored.
    pub count: u64,
    /// Smallest stored token (0 for an empty tree).
    pub min_token: i64,
    /// Largest stored token (0 for an empty tree).
    pub max_token: i64,
    /// Absolute byte offset of the root block.
    pub root: u64,
    /// Number of leaf blocks.
    pub leaf_count: u32,
    /// Total serialized length, header included.
    pub total_len: u64,
}

impl TreeHeader {
    /// Header of a tree holding no tokens.
    pub fn empty() -> Self {
        Self {
            height: 0,
            count: 0,
            min_token: 0,
            max_token: 0,
            root: 0,
            leaf_count: 0,
            total_len: TREE_HDR_LEN as u64,
        }
    }

    /// Serializes the header, checksum included.
    pub fn encode(&self) -> [u8; TREE_HDR_LEN] {
        let mut hdr = [0u8; TREE_HDR_LEN];
        hdr[header::MAGIC].copy_from_slice(&TREE_MAGIC);
        hdr[header::VERSION].copy_from_slice(&TREE_FORMAT_VERSION.to_be_bytes());
        hdr[header::HEIGHT].copy_from_slice(&self.height.to_be_bytes());
        hdr[header::COUNT].copy_from_slice(&self.count.to_be_bytes());
        ord::put_i64_be(&mut hdr[header::MIN_TOKEN], self.min_token);
        ord::put_i64_be(&mut hdr[header::MAX_TOKEN], self.max_token);
        hdr[header::ROOT].copy_from_slice(&self.root.to_be_bytes());
        hdr[header::LEAF_COUNT].copy_from_slice(&self.leaf_count.to_be_bytes());
        hdr[header::TOTAL_LEN].copy_from_slice(&self.total_len.to_be_bytes());
        let crc = header_crc32(&hdr[..header::CRC32.start]);
        hdr[header::CRC32].copy_from_slice(&crc.to_be_bytes());
        hdr
    }

    /// Parses and validates a header against the length of its region.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < TREE_HDR_LEN {
            return Err(IndexError::CorruptFormat("tree header truncated"));
        }
        let hdr = &src[..TREE_HDR_LEN];
        if hdr[header::MAGIC] != TREE_MAGIC {
            return Err(IndexError::CorruptFormat("invalid tree magic"));
        }
        let mut cur = Cursor::new(&hdr[header::VERSION.start..]);
        let version = cur.u16()?;
        if version != TREE_FORMAT_VERSION {
            return Err(IndexError::CorruptFormat("unsupported tree format version"));
        }
        let height = cur.u16()?;
        let count = cur.u64()?;
        let min_token = cur.i64()?;
        let max_token = cur.i64()?;
        let root = cur.u64()?;
        let leaf_count = cur.u32()?;
        let total_len = cur.u64()?;
        let stored_crc = cur.u32()?;
        if stored_crc != header_crc32(&hdr[..header::CRC32.start]) {
            return Err(IndexError::CorruptFormat("tree header checksum mismatch"));
        }

        let parsed = Self {
            height,
            count,
            min_token,
            max_token,
            root,
            leaf_count,
            total_len,
        };
        parsed.validate(src.len() as u64)?;
        Ok(parsed)
    }

    fn validate(&self, region_len: u64) -> Result<()> {
        if self.total_len != region_len {
            return Err(IndexError::CorruptFormat(
                "tree length does not match region length",
            ));
        }
        let empty = self.count == 0;
        if empty != (self.height == 0) || empty != (self.leaf_count == 0) {
            return Err(IndexError::CorruptFormat(
                "tree height, count and leaf count disagree",
            ));
        }
        if empty {
            if self.root != 0 || self.total_len != TREE_HDR_LEN as u64 {
                return Err(IndexError::CorruptFormat("empty tree carries block data"));
            }
            return Ok(());
        }
        if self.min_token > self.max_token {
            return Err(IndexError::CorruptFormat("tree min token exceeds max token"));
        }
        if self.count < u64::from(self.leaf_count) {
            return Err(IndexError::CorruptFormat("tree has more leaves than tokens"));
        }
        if self.root < TREE_HDR_LEN as u64
            || self.root.saturating_add(BLOCK_HDR_LEN as u64) > self.total_len
        {
            return Err(IndexError::CorruptFormat("tree root locator out of range"));
        }
        Ok(())
    }
}

/// Physical kind of a block.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockKind {
    /// Ascending entries plus overflow words.
    Leaf = 1,
    /// Separator pairs pointing at child blocks.
    Index = 2,
}

impl BlockKind {
    /// Returns the on-disk tag.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for BlockKind {
    type Error = IndexError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(BlockKind::Leaf),
            2 => Ok(BlockKind::Index),
            _ => Err(IndexError::CorruptFormat("unknown block kind")),
        }
    }
}

/// Header preceding every block body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    /// Leaf or index.
    pub kind: BlockKind,
    /// Number of entries (leaf) or child pairs (index).
    pub count: u16,
    /// Overflow words following the entries of a leaf.
    pub overflow_words: u32,
    /// Factoring base shared by the entries of a leaf.
    pub base: u64,
}

impl BlockHeader {
    /// Header for a leaf block.
    pub fn leaf(count: u16, overflow_words: u32, base: u64) -> Self {
        Self {
            kind: BlockKind::Leaf,
            count,
            overflow_words,
            base,
        }
    }

    /// Header for an index block.
    pub fn index(count: u16) -> Self {
        Self {
            kind: BlockKind::Index,
            count,
            overflow_words: 0,
            base: 0,
        }
    }

    /// Length of the body this header describes.
    pub fn body_len(&self) -> usize {
        match self.kind {
            BlockKind::Leaf => {
                self.count as usize * ENTRY_LEN
                    + self.overflow_words as usize * OVERFLOW_WORD_LEN
            }
            BlockKind::Index => self.count as usize * INDEX_PAIR_LEN,
        }
    }

    /// Total block length, header included.
    pub fn block_len(&self) -> usize {
        BLOCK_HDR_LEN + self.body_len()
    }

    /// Serializes the header with a checksum over `body`.
    pub fn encode(&self, body: &[u8]) -> [u8; BLOCK_HDR_LEN] {
        debug_assert_eq!(body.len(), self.body_len());
        let mut hdr = [0u8; BLOCK_HDR_LEN];
        hdr[0] = self.kind.as_u8();
        hdr[2..4].copy_from_slice(&self.count.to_be_bytes());
        hdr[4..8].copy_from_slice(&self.overflow_words.to_be_bytes());
        hdr[8..16].copy_from_slice(&self.base.to_be_bytes());
        let crc = block_crc32(&hdr[..BLOCK_CRC_PREFIX], body);
        hdr[16..20].copy_from_slice(&crc.to_be_bytes());
        hdr
    }

    /// Parses the block header at the start of `src`, checking that the whole
    /// block lies within `src`.
    pub fn decode(src: &[u8], verify_checksum: bool) -> Result<Self> {
        let mut cur = Cursor::new(src);
        let kind = BlockKind::try_from(cur.u8()?)?;
        if cur.u8()? != 0 {
            return Err(IndexError::CorruptFormat("block reserved byte not zero"));
        }
        let count = cur.u16()?;
        let overflow_words = cur.u32()?;
        let base = cur.u64()?;
        let stored_crc = cur.u32()?;
        let _reserved = cur.u32()?;
        if count == 0 {
            return Err(IndexError::CorruptFormat("block holds no entries"));
        }
        if kind == BlockKind::Index && (overflow_words != 0 || base != 0) {
            return Err(IndexError::CorruptFormat("index block carries leaf fields"));
        }
        let parsed = Self {
            kind,
            count,
            overflow_words,
            base,
        };
        let body = cur.take(parsed.body_len())?;
        if verify_checksum && stored_crc != block_crc32(&src[..BLOCK_CRC_PREFIX], body) {
            tracing::warn!(kind = ?kind, count, "token_tree.block.checksum_mismatch");
            return Err(IndexError::CorruptFormat("block checksum mismatch"));
        }
        Ok(parsed)
    }
}
