use bytes::Bytes;
use tracing::{debug, warn};

use crate::primitives::bytes::ord;
use crate::primitives::io::{read_region, FileIo};
use crate::types::{IndexError, Result};

use super::entry;
use super::format::{
    BlockHeader, BlockKind, TreeHeader, BLOCK_HDR_LEN, ENTRY_LEN, INDEX_PAIR_LEN, TREE_HDR_LEN,
};
use super::iter::{RangeCursor, TokenSource};
use super::options::ReadOptions;
use super::token::Token;

/// Read-only view over a serialized token tree.
///
/// The region is reference counted, so lookups and iterators may run from
/// several threads at once without coordination.
#[derive(Clone, Debug)]
pub struct TokenTree {
    region: Bytes,
    header: TreeHeader,
    opts: ReadOptions,
}

/// Iterator over a [`TokenTree`] in ascending token order.
pub type TreeIterator = RangeCursor<LeafWalker>;

impl TokenTree {
    /// Opens a tree occupying all of `region` with default read options.
    pub fn open(region: Bytes) -> Result<Self> {
        Self::open_with(region, ReadOptions::default())
    }

    /// Opens a tree occupying all of `region`.
    pub fn open_with(region: Bytes, opts: ReadOptions) -> Result<Self> {
        let len = region.len();
        match Self::validate(region, opts) {
            Ok(tree) => {
                debug!(
                    tokens = tree.header.count,
                    height = tree.header.height,
                    leaves = tree.header.leaf_count,
                    bytes = len,
                    "token_tree.open"
                );
                Ok(tree)
            }
            Err(err) => {
                warn!(error = %err, bytes = len, "token_tree.open.rejected");
                Err(err)
            }
        }
    }

    /// Reads `len` bytes at `off` from `source` and opens them as a tree.
    pub fn load(source: &dyn FileIo, off: u64, len: u64, opts: ReadOptions) -> Result<Self> {
        Self::open_with(read_region(source, off, len)?, opts)
    }

    fn validate(region: Bytes, opts: ReadOptions) -> Result<Self> {
        let header = TreeHeader::decode(&region)?;
        if header.height > 0 {
            let (root, _) = block_at(&region, header.root, opts.verify_checksums)?;
            let expected = if header.height == 1 {
                BlockKind::Leaf
            } else {
                BlockKind::Index
            };
            if root.kind != expected {
                return Err(IndexError::CorruptFormat("root block kind does not match height"));
            }
        }
        Ok(Self {
            region,
            header,
            opts,
        })
    }

    /// Decoded tree header.
    pub fn header(&self) -> &TreeHeader {
        &self.header
    }

    /// Number of tokens stored.
    pub fn count(&self) -> u64 {
        self.header.count
    }

    /// Returns true when the tree holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    /// Smallest stored token.
    pub fn min_token(&self) -> Option<i64> {
        (!self.is_empty()).then_some(self.header.min_token)
    }

    /// Largest stored token.
    pub fn max_token(&self) -> Option<i64> {
        (!self.is_empty()).then_some(self.header.max_token)
    }

    /// Tree height: 0 when empty, 1 when the root is a leaf.
    pub fn height(&self) -> u16 {
        self.header.height
    }

    /// Number of leaf blocks.
    pub fn leaf_count(&self) -> u32 {
        self.header.leaf_count
    }

    /// Serialized length in bytes.
    pub fn len_bytes(&self) -> u64 {
        self.header.total_len
    }

    /// Looks up `token`, returning its offsets when present.
    pub fn get(&self, token: i64) -> Result<Option<Token>> {
        if self.is_empty() || token < self.header.min_token || token > self.header.max_token {
            return Ok(None);
        }
        let verify = self.opts.verify_checksums;
        let Some(off) = find_leaf(&self.region, &self.header, verify, token)? else {
            return Ok(None);
        };
        let (block, start) = leaf_at(&self.region, off, verify)?;
        let leaf = Leaf::view(&self.region, start, &block);
        let idx = leaf.lower_bound(token);
        if idx < leaf.len() && leaf.token_at(idx) == token {
            leaf.decode(idx).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Iterates every stored token in ascending order.
    pub fn iter(&self) -> TreeIterator {
        let bounds = self.min_token().zip(self.max_token());
        let walker = LeafWalker {
            region: self.region.clone(),
            header: self.header.clone(),
            verify: self.opts.verify_checksums,
            pos: WalkPos::Start,
            last: None,
        };
        RangeCursor::new(walker, bounds, self.header.count)
    }

    /// Releases the tree's hold on its region.
    pub fn close(self) {}
}

/// Leaf-by-leaf [`TokenSource`] behind [`TreeIterator`].
#[derive(Debug)]
pub struct LeafWalker {
    region: Bytes,
    header: TreeHeader,
    verify: bool,
    pos: WalkPos,
    last: Option<i64>,
}

#[derive(Debug)]
enum WalkPos {
    Start,
    At {
        start: usize,
        block: BlockHeader,
        entry: usize,
    },
    Done,
}

impl LeafWalker {
    fn enter(&self, off: u64, target: Option<i64>) -> Result<WalkPos> {
        let (block, start) = leaf_at(&self.region, off, self.verify)?;
        let entry = match target {
            Some(target) => Leaf::view(&self.region, start, &block).lower_bound(target),
            None => 0,
        };
        Ok(WalkPos::At {
            start,
            block,
            entry,
        })
    }

    fn seek(&mut self, target: i64) -> Result<()> {
        if let WalkPos::At { start, block, entry } = &mut self.pos {
            let leaf = Leaf::view(&self.region, *start, block);
            if leaf.token_at(leaf.len() - 1) >= target {
                *entry = (*entry).max(leaf.lower_bound(target));
                return Ok(());
            }
        }
        self.pos = match find_leaf(&self.region, &self.header, self.verify, target)? {
            Some(off) => self.enter(off, Some(target))?,
            None => WalkPos::Done,
        };
        Ok(())
    }
}

impl TokenSource for LeafWalker {
    fn compute_next(&mut self) -> Result<Option<Token>> {
        if matches!(self.pos, WalkPos::Start) {
            if self.header.count == 0 {
                self.pos = WalkPos::Done;
            } else {
                self.seek(self.header.min_token)?;
            }
        }
        loop {
            let next_leaf = match &mut self.pos {
                WalkPos::Start | WalkPos::Done => return Ok(None),
                WalkPos::At { start, block, entry } => {
                    if *entry < block.count as usize {
                        let token = Leaf::view(&self.region, *start, block).decode(*entry)?;
                        if self.last.is_some_and(|last| token.key() <= last) {
                            return Err(IndexError::CorruptFormat("leaf tokens out of order"));
                        }
                        *entry += 1;
                        self.last = Some(token.key());
                        return Ok(Some(token));
                    }
                    (*start + block.block_len()) as u64
                }
            };
            self.pos = if next_leaf < self.header.total_len {
                self.enter(next_leaf, None)?
            } else {
                WalkPos::Done
            };
        }
    }

    fn perform_skip_to(&mut self, target: i64) -> Result<()> {
        self.seek(target)
    }

    fn release(&mut self) {
        self.region = Bytes::new();
        self.pos = WalkPos::Done;
    }
}

/// Decoded leaf body borrowed from the region.
struct Leaf<'a> {
    base: u64,
    entries: &'a [u8],
    overflow: &'a [u8],
}

impl<'a> Leaf<'a> {
    /// `block` must have been decoded from `region[start..]`.
    fn view(region: &'a [u8], start: usize, block: &BlockHeader) -> Self {
        let body = &region[start + BLOCK_HDR_LEN..start + block.block_len()];
        let (entries, overflow) = body.split_at(block.count as usize * ENTRY_LEN);
        Self {
            base: block.base,
            entries,
            overflow,
        }
    }

    fn len(&self) -> usize {
        self.entries.len() / ENTRY_LEN
    }

    fn slot(&self, idx: usize) -> &'a [u8] {
        &self.entries[idx * ENTRY_LEN..(idx + 1) * ENTRY_LEN]
    }

    fn token_at(&self, idx: usize) -> i64 {
        entry::decode_token(self.slot(idx))
    }

    fn lower_bound(&self, target: i64) -> usize {
        partition(self.len(), |i| self.token_at(i) < target)
    }

    fn decode(&self, idx: usize) -> Result<Token> {
        let (key, offsets) = entry::decode(self.slot(idx), self.base, self.overflow)?;
        Ok(Token::new(key, offsets))
    }
}

/// First index in `0..n` for which `below` is false, assuming `below` holds
/// for a prefix.
fn partition(n: usize, below: impl Fn(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0, n);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if below(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn block_at(region: &[u8], off: u64, verify: bool) -> Result<(BlockHeader, usize)> {
    let start = usize::try_from(off)
        .ok()
        .filter(|start| (TREE_HDR_LEN..region.len()).contains(start))
        .ok_or(IndexError::CorruptFormat("block locator out of range"))?;
    let block = BlockHeader::decode(&region[start..], verify)?;
    Ok((block, start))
}

fn leaf_at(region: &[u8], off: u64, verify: bool) -> Result<(BlockHeader, usize)> {
    let (block, start) = block_at(region, off, verify)?;
    if block.kind != BlockKind::Leaf {
        return Err(IndexError::CorruptFormat("expected leaf block"));
    }
    Ok((block, start))
}

/// Descends from the root to the leaf whose range may hold `token`.
fn find_leaf(
    region: &[u8],
    header: &TreeHeader,
    verify: bool,
    token: i64,
) -> Result<Option<u64>> {
    let mut off = header.root;
    for _ in 1..header.height {
        let (block, start) = block_at(region, off, verify)?;
        if block.kind != BlockKind::Index {
            return Err(IndexError::CorruptFormat("expected index block"));
        }
        let pairs = &region[start + BLOCK_HDR_LEN..start + block.block_len()];
        let pair = |i: usize| &pairs[i * INDEX_PAIR_LEN..(i + 1) * INDEX_PAIR_LEN];
        let n = block.count as usize;
        let idx = partition(n, |i| ord::get_i64_be(pair(i)) < token);
        if idx == n {
            return Ok(None);
        }
        let child = ord::get_u64_be(&pair(idx)[8..]);
        if child <= off {
            return Err(IndexError::CorruptFormat("index child precedes parent"));
        }
        off = child;
    }
    Ok(Some(off))
}
