use std::collections::btree_map::{self, BTreeMap, Entry};
use std::io::Write;
use std::ops::Range;

use tracing::debug;

use crate::primitives::bytes::ord;
use crate::primitives::io::CountingWriter;
use crate::types::{IndexError, Result};

use super::entry;
use super::format::{
    BlockHeader, TreeHeader, BLOCK_HDR_LEN, ENTRY_LEN, INDEX_PAIR_LEN, OVERFLOW_WORD_LEN,
    TREE_HDR_LEN,
};
use super::iter::{RangeCursor, TokenSource};
use super::offsets::OffsetSet;
use super::options::TreeOptions;
use super::token::Token;

/// Accumulates token → offsets mappings and serializes them as a token tree.
///
/// Content stays mutable for the builder's whole life. `finish()` derives the
/// block layout from the current content; any later `add` marks that layout
/// stale, and `write`/`serialized_size` refuse to run until `finish()` is
/// called again.
#[derive(Debug)]
pub struct TokenTreeBuilder {
    tokens: BTreeMap<i64, OffsetSet>,
    options: TreeOptions,
    layout: Option<Layout>,
    stale: bool,
}

#[derive(Debug)]
struct Layout {
    header: TreeHeader,
    leaves: Vec<LeafLayout>,
    /// `levels[0]` indexes the leaves, each further level indexes the one below.
    levels: Vec<Vec<IndexLayout>>,
}

#[derive(Debug)]
struct LeafLayout {
    entries: usize,
    base: u64,
    overflow_words: u32,
    max_token: i64,
    offset: u64,
}

impl LeafLayout {
    fn block_len(&self) -> u64 {
        (BLOCK_HDR_LEN
            + self.entries * ENTRY_LEN
            + self.overflow_words as usize * OVERFLOW_WORD_LEN) as u64
    }
}

#[derive(Debug)]
struct IndexLayout {
    children: Range<usize>,
    max_token: i64,
    offset: u64,
}

impl IndexLayout {
    fn block_len(&self) -> u64 {
        (BLOCK_HDR_LEN + self.children.len() * INDEX_PAIR_LEN) as u64
    }
}

impl Default for TokenTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenTreeBuilder {
    /// Creates an empty builder with default options.
    pub fn new() -> Self {
        Self {
            tokens: BTreeMap::new(),
            options: TreeOptions::default(),
            layout: None,
            stale: true,
        }
    }

    /// Creates a builder seeded from an ascending token mapping.
    pub fn from_tokens<I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (i64, OffsetSet)>,
    {
        let mut builder = Self::new();
        builder.add(tokens);
        builder
    }

    /// Creates a builder seeded from `tokens` using `options`.
    pub fn with_options<I>(tokens: I, options: TreeOptions) -> Result<Self>
    where
        I: IntoIterator<Item = (i64, OffsetSet)>,
    {
        options.validate()?;
        let mut builder = Self {
            options,
            ..Self::new()
        };
        builder.add(tokens);
        Ok(builder)
    }

    /// Layout options in effect.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Number of distinct tokens held.
    pub fn token_count(&self) -> u64 {
        self.tokens.len() as u64
    }

    /// Returns true when no tokens are held.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Returns true when content changed since the last `finish()`.
    pub fn is_layout_stale(&self) -> bool {
        self.stale
    }

    /// Merges another mapping into the builder; offsets of tokens already
    /// present are unioned. Tokens with no offsets are ignored.
    pub fn add<I>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = (i64, OffsetSet)>,
    {
        for (token, offsets) in tokens {
            if offsets.is_empty() {
                continue;
            }
            match self.tokens.entry(token) {
                Entry::Vacant(slot) => {
                    slot.insert(offsets);
                }
                Entry::Occupied(mut slot) => slot.get_mut().union(&offsets),
            }
            self.stale = true;
        }
    }

    /// Records a single `offset` under `token`.
    pub fn add_offset(&mut self, token: i64, offset: u64) {
        if self.tokens.entry(token).or_default().add(offset) {
            self.stale = true;
        }
    }

    /// Computes the block layout for the current content. Calling it again
    /// without intervening changes is a no-op.
    pub fn finish(&mut self) -> Result<&mut Self> {
        if self.stale || self.layout.is_none() {
            let layout = Layout::compute(&self.tokens, &self.options)?;
            debug!(
                tokens = layout.header.count,
                leaves = layout.leaves.len(),
                height = layout.header.height,
                bytes = layout.header.total_len,
                "token_tree.finish"
            );
            self.layout = Some(layout);
            self.stale = false;
        }
        Ok(self)
    }

    /// Exact number of bytes [`Self::write`] emits for the current layout.
    pub fn serialized_size(&self) -> Result<u64> {
        Ok(self.current_layout()?.header.total_len)
    }

    /// Serializes the tree into `sink`, returning the bytes written.
    pub fn write<W: Write>(&self, sink: W) -> Result<u64> {
        let layout = self.current_layout()?;
        let mut out = CountingWriter::new(sink);
        out.write_all(&layout.header.encode())?;

        for depth in (0..layout.levels.len()).rev() {
            for block in &layout.levels[depth] {
                let mut body = Vec::with_capacity(block.children.len() * INDEX_PAIR_LEN);
                for child in block.children.clone() {
                    let (max_token, offset) = layout.child_ref(depth, child);
                    let mut pair = [0u8; INDEX_PAIR_LEN];
                    ord::put_i64_be(&mut pair[..8], max_token);
                    pair[8..].copy_from_slice(&offset.to_be_bytes());
                    body.extend_from_slice(&pair);
                }
                let header = BlockHeader::index(block.children.len() as u16);
                out.write_all(&header.encode(&body))?;
                out.write_all(&body)?;
            }
        }

        let mut tokens = self.tokens.iter();
        let mut body = Vec::new();
        let mut overflow = Vec::new();
        for leaf in &layout.leaves {
            body.clear();
            overflow.clear();
            for (token, offsets) in tokens.by_ref().take(leaf.entries) {
                entry::encode(*token, offsets, leaf.base, &mut body, &mut overflow);
            }
            debug_assert_eq!(overflow.len(), leaf.overflow_words as usize);
            for word in &overflow {
                body.extend_from_slice(&word.to_be_bytes());
            }
            let header = BlockHeader::leaf(leaf.entries as u16, leaf.overflow_words, leaf.base);
            out.write_all(&header.encode(&body))?;
            out.write_all(&body)?;
        }
        out.flush()?;

        let written = out.written();
        debug_assert_eq!(written, layout.header.total_len);
        debug!(bytes = written, leaves = layout.leaves.len(), "token_tree.write");
        Ok(written)
    }

    /// Lazily iterates the current content in ascending order, regardless of
    /// layout freshness.
    pub fn iterator(&self) -> RangeCursor<BuilderSource<'_>> {
        let bounds = self
            .tokens
            .first_key_value()
            .zip(self.tokens.last_key_value())
            .map(|((min, _), (max, _))| (*min, *max));
        let source = BuilderSource {
            tokens: &self.tokens,
            range: self.tokens.range(..),
        };
        RangeCursor::new(source, bounds, self.token_count())
    }

    fn current_layout(&self) -> Result<&Layout> {
        match &self.layout {
            Some(layout) if !self.stale => Ok(layout),
            _ => Err(IndexError::StaleLayout),
        }
    }
}

impl Layout {
    fn compute(tokens: &BTreeMap<i64, OffsetSet>, options: &TreeOptions) -> Result<Self> {
        let (Some((&min_token, _)), Some((&max_token, _))) =
            (tokens.first_key_value(), tokens.last_key_value())
        else {
            return Ok(Self {
                header: TreeHeader::empty(),
                leaves: Vec::new(),
                levels: Vec::new(),
            });
        };

        let capacity = options.leaf_capacity();
        let mut leaves = Vec::with_capacity(tokens.len().div_ceil(capacity));
        let mut iter = tokens.iter().peekable();
        while iter.peek().is_some() {
            let chunk: Vec<(&i64, &OffsetSet)> = iter.by_ref().take(capacity).collect();
            let base = entry::block_base(chunk.iter().map(|(_, set)| *set));
            let words: usize = chunk
                .iter()
                .map(|(_, set)| entry::overflow_words(set, base))
                .sum();
            let overflow_words = u32::try_from(words)
                .map_err(|_| IndexError::Invalid("leaf overflow area too large"))?;
            let max_token = chunk.last().map_or(min_token, |(token, _)| **token);
            leaves.push(LeafLayout {
                entries: chunk.len(),
                base,
                overflow_words,
                max_token,
                offset: 0,
            });
        }

        let fanout = options.index_fanout();
        let mut levels: Vec<Vec<IndexLayout>> = Vec::new();
        let mut below: Vec<i64> = leaves.iter().map(|leaf| leaf.max_token).collect();
        while below.len() > 1 {
            let level: Vec<IndexLayout> = (0..below.len())
                .step_by(fanout)
                .map(|start| {
                    let end = (start + fanout).min(below.len());
                    IndexLayout {
                        children: start..end,
                        max_token: below[end - 1],
                        offset: 0,
                    }
                })
                .collect();
            below = level.iter().map(|block| block.max_token).collect();
            levels.push(level);
        }

        let mut cursor = TREE_HDR_LEN as u64;
        for level in levels.iter_mut().rev() {
            for block in level.iter_mut() {
                block.offset = cursor;
                cursor += block.block_len();
            }
        }
        for leaf in leaves.iter_mut() {
            leaf.offset = cursor;
            cursor += leaf.block_len();
        }

        let root = levels
            .last()
            .map(|top| top[0].offset)
            .unwrap_or(leaves[0].offset);
        let header = TreeHeader {
            height: (levels.len() + 1) as u16,
            count: tokens.len() as u64,
            min_token,
            max_token,
            root,
            leaf_count: u32::try_from(leaves.len())
                .map_err(|_| IndexError::Invalid("too many leaf blocks"))?,
            total_len: cursor,
        };
        Ok(Self {
            header,
            leaves,
            levels,
        })
    }

    /// `(max token, locator)` of child `idx` of a block at index level `depth`.
    fn child_ref(&self, depth: usize, idx: usize) -> (i64, u64) {
        if depth == 0 {
            let leaf = &self.leaves[idx];
            (leaf.max_token, leaf.offset)
        } else {
            let block = &self.levels[depth - 1][idx];
            (block.max_token, block.offset)
        }
    }
}

/// [`TokenSource`] over a builder's in-memory content.
pub struct BuilderSource<'a> {
    tokens: &'a BTreeMap<i64, OffsetSet>,
    range: btree_map::Range<'a, i64, OffsetSet>,
}

impl TokenSource for BuilderSource<'_> {
    fn compute_next(&mut self) -> Result<Option<Token>> {
        Ok(self
            .range
            .next()
            .map(|(token, offsets)| Token::new(*token, offsets.clone())))
    }

    fn perform_skip_to(&mut self, target: i64) -> Result<()> {
        self.range = self.tokens.range(target..);
        Ok(())
    }
}
