#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use tempfile::NamedTempFile;
use token_index::{
    primitives::io::StdFileIo,
    tree::{
        format::{BLOCK_HDR_LEN, ENTRY_LEN, TREE_HDR_LEN},
        merge, EntryType, IterState, OffsetSet, RangeCursor, RangeIterator, ReadOptions, Token,
        TokenSource, TokenTree, TokenTreeBuilder, TreeOptions,
    },
    types::{IndexError, Result},
};

const BIG_TOKENS: i64 = 1_000_000;

fn single_offset() -> OffsetSet {
    OffsetSet::single(1)
}

fn simple_token_map() -> BTreeMap<i64, OffsetSet> {
    let big_single_offset = OffsetSet::single(i32::MAX as u64 + 10);
    let short_packable = OffsetSet::from([2, 3]);
    let int_packable = OffsetSet::from([6, i16::MAX as u64 + 1]);
    let multi_collision = OffsetSet::from([3, 4, 5]);
    let unpackable = OffsetSet::from([i16::MAX as u64 + 1, i16::MAX as u64 + 2]);

    let mut map = BTreeMap::new();
    map.insert(1, big_single_offset);
    map.insert(3, short_packable);
    map.insert(4, int_packable);
    map.insert(9, multi_collision);
    map.insert(10, unpackable);
    for token in [
        6, 12, 13, 15, 16, 20, 22, 25, 26, 27, 28, 40, 50, 100, 101, 102, 103, 108, 110, 112, 115,
        116, 120, 121, 122, 123, 125,
    ] {
        map.insert(token, single_offset());
    }
    map
}

fn big_tokens_map() -> BTreeMap<i64, OffsetSet> {
    (0..BIG_TOKENS).map(|i| (i, single_offset())).collect()
}

fn colliding_tokens_map() -> BTreeMap<i64, OffsetSet> {
    [1, 7, 8].into_iter().map(|t| (t, single_offset())).collect()
}

fn finished(map: &BTreeMap<i64, OffsetSet>) -> TokenTreeBuilder {
    let mut builder = TokenTreeBuilder::from_tokens(map.clone());
    builder.finish().unwrap();
    builder
}

fn write_to_file(builder: &TokenTreeBuilder) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    builder.write(file.as_file_mut())?;
    file.as_file_mut().sync_all()?;
    Ok(file)
}

fn open_file(file: &NamedTempFile) -> Result<TokenTree> {
    let io = StdFileIo::open(file.path())?;
    let len = file.as_file().metadata()?.len();
    TokenTree::load(&io, 0, len, ReadOptions::default())
}

fn generate_tree(min: i64, max: i64) -> Result<TokenTree> {
    let mut builder =
        TokenTreeBuilder::from_tokens((min..=max).map(|i| (i, OffsetSet::single(i as u64))));
    builder.finish()?;
    let mut out = Vec::new();
    builder.write(&mut out)?;
    TokenTree::open(Bytes::from(out))
}

fn pairs(tokens: impl Iterator<Item = Result<Token>>) -> Vec<(i64, OffsetSet)> {
    tokens
        .map(|t| t.map(|t| (t.key(), t.into_offsets())).unwrap())
        .collect()
}

/// Skippable cursor over an in-memory map, used as the expected side of
/// iterator comparisons.
struct EntrySetSource {
    entries: BTreeMap<i64, OffsetSet>,
    next_from: Option<i64>,
}

impl TokenSource for EntrySetSource {
    fn compute_next(&mut self) -> Result<Option<Token>> {
        let Some(from) = self.next_from else {
            return Ok(None);
        };
        let next = self.entries.range(from..).next();
        self.next_from = next.and_then(|(k, _)| k.checked_add(1));
        Ok(next.map(|(k, v)| Token::new(*k, v.clone())))
    }

    fn perform_skip_to(&mut self, target: i64) -> Result<()> {
        self.next_from = Some(target);
        Ok(())
    }
}

fn entry_set_cursor(entries: BTreeMap<i64, OffsetSet>) -> RangeCursor<EntrySetSource> {
    let bounds = entries
        .first_key_value()
        .zip(entries.last_key_value())
        .map(|((a, _), (b, _))| (*a, *b));
    let count = entries.len() as u64;
    let next_from = bounds.map(|(min, _)| min);
    RangeCursor::new(EntrySetSource { entries, next_from }, bounds, count)
}

#[test]
fn build_and_iterate() {
    let tokens = big_tokens_map();
    let builder = finished(&tokens);
    let got = pairs(builder.iterator());
    assert_eq!(got.len(), tokens.len());
    assert!(got.into_iter().eq(tokens.into_iter()));
}

#[test]
fn build_with_multiple_maps_and_iterate() {
    let mut builder = finished(&simple_token_map());
    builder.add(colliding_tokens_map());

    let mut merged = simple_token_map();
    for (token, offsets) in colliding_tokens_map() {
        merged.entry(token).or_default().union(&offsets);
    }

    assert_eq!(pairs(builder.iterator()), merged.into_iter().collect::<Vec<_>>());
    assert!(builder.is_layout_stale());
}

#[test]
fn serialized_size_matches_file_length() -> Result<()> {
    let builder = finished(&big_tokens_map());
    let file = write_to_file(&builder)?;
    assert_eq!(file.as_file().metadata()?.len(), builder.serialized_size()?);
    Ok(())
}

#[test]
fn build_serialize_and_iterate() -> Result<()> {
    let tokens = simple_token_map();
    let file = write_to_file(&finished(&tokens))?;
    let tree = open_file(&file)?;
    assert_eq!(tree.count(), tokens.len() as u64);
    assert_eq!(tree.min_token(), Some(1));
    assert_eq!(tree.max_token(), Some(125));

    let got = pairs(tree.iter());
    assert_eq!(got, tokens.into_iter().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn build_serialize_and_get() -> Result<()> {
    let tree = generate_tree(0, 1000)?;
    for i in 0..=1000 {
        let token = tree.get(i)?.unwrap_or_else(|| panic!("missing token {i}"));
        assert_eq!(token.offsets().as_slice(), &[i as u64]);
    }
    assert!(tree.get(1010)?.is_none());
    Ok(())
}

#[test]
fn build_serialize_iterate_and_skip() -> Result<()> {
    let tokens = big_tokens_map();
    let file = write_to_file(&finished(&tokens))?;
    let tree = open_file(&file)?;

    let mut tree_iter = tree.iter();
    let mut list_iter = entry_set_cursor(tokens);

    let mut last = 0;
    while tree_iter.has_next()? && last < 12 {
        let from_tree = tree_iter.next_token()?;
        let from_list = list_iter.next_token()?;
        last = from_tree.key();
        assert_eq!(from_tree, from_list);
    }

    tree_iter.skip_to(100_548)?;
    list_iter.skip_to(100_548)?;

    let mut seen = 0;
    while tree_iter.has_next()? && list_iter.has_next()? {
        let from_tree = tree_iter.next_token()?;
        let from_list = list_iter.next_token()?;
        if seen == 0 {
            assert_eq!(from_tree.key(), 100_548);
        }
        assert_eq!(from_tree, from_list);
        seen += 1;
    }
    assert_eq!(seen, BIG_TOKENS - 100_548);
    assert!(!tree_iter.has_next()?, "tree iterator not completed");
    assert!(!list_iter.has_next()?, "list iterator not completed");
    Ok(())
}

#[test]
fn skip_past_end() -> Result<()> {
    let tokens = simple_token_map();
    let file = write_to_file(&finished(&tokens))?;
    let tree = open_file(&file)?;

    let mut it = tree.iter();
    let last = *tokens.keys().next_back().unwrap();
    it.skip_to(last + 10)?;
    assert_eq!(it.state(), IterState::Exhausted);
    assert!(!it.has_next()?);
    assert!(matches!(it.next_token(), Err(IndexError::Exhausted)));
    Ok(())
}

#[test]
fn token_merge() -> Result<()> {
    let tree_a = generate_tree(0, 1000)?;
    let tree_b = generate_tree(0, 1000)?;
    let mut a = tree_a.iter();
    let mut b = tree_b.iter();

    let mut count = 0i64;
    while a.has_next()? && b.has_next()? {
        let mut token_a = a.next_token()?;
        let token_b = b.next_token()?;

        token_a.merge(&token_b)?;
        token_a.merge(&Token::new(token_a.key(), OffsetSet::single(count as u64 + 1)))?;
        token_a.merge(&Token::new(token_a.key(), OffsetSet::single(count as u64)))?;

        let mismatch = Token::new(token_a.key() + 1, OffsetSet::single(count as u64));
        assert!(matches!(
            token_a.merge(&mismatch),
            Err(IndexError::KeyMismatch { .. })
        ));
        assert!(merge(&token_a, &mismatch).is_err());

        let offsets: Vec<i64> = token_a.keys(|offset| offset as i64).collect();
        assert_eq!(offsets, vec![count, count + 1]);
        count += 1;
    }
    assert_eq!(count - 1, 1000);
    Ok(())
}

#[test]
fn entry_type_ordinal_lookup() -> Result<()> {
    for kind in EntryType::ALL {
        assert_eq!(EntryType::from_ordinal(kind.ordinal())?, kind);
    }
    assert_eq!(EntryType::Simple.ordinal(), 0);
    assert_eq!(EntryType::Packed.ordinal(), 1);
    assert_eq!(EntryType::Factored.ordinal(), 2);
    assert_eq!(EntryType::Overflow.ordinal(), 3);
    assert!(EntryType::from_ordinal(4).is_err());
    Ok(())
}

#[test]
fn clustered_offsets_are_factored_against_leaf_base() -> Result<()> {
    let base = 1u64 << 40;
    let tokens: BTreeMap<i64, OffsetSet> = (0..200i64)
        .map(|i| {
            let first = base + 3 * i as u64;
            (i, OffsetSet::from([first, first + 1]))
        })
        .collect();
    let builder = finished(&tokens);

    let mut out = Vec::new();
    builder.write(&mut out)?;
    let expected_len = TREE_HDR_LEN + BLOCK_HDR_LEN + tokens.len() * ENTRY_LEN;
    assert_eq!(builder.serialized_size()?, expected_len as u64, "no overflow words");
    assert_eq!(out.len(), expected_len);

    let slots = &out[TREE_HDR_LEN + BLOCK_HDR_LEN..];
    for slot in slots.chunks_exact(ENTRY_LEN) {
        assert_eq!(slot[8], EntryType::Factored.ordinal());
    }

    let tree = TokenTree::open(Bytes::from(out))?;
    assert_eq!(tree.height(), 1);
    assert_eq!(pairs(tree.iter()), tokens.clone().into_iter().collect::<Vec<_>>());
    for (key, offsets) in &tokens {
        assert_eq!(tree.get(*key)?.map(Token::into_offsets).as_ref(), Some(offsets));
    }
    Ok(())
}

#[test]
fn write_requires_fresh_layout() {
    let mut builder = TokenTreeBuilder::from_tokens(simple_token_map());
    assert!(matches!(builder.serialized_size(), Err(IndexError::StaleLayout)));
    builder.finish().unwrap();
    builder.add_offset(500, 9);
    assert!(matches!(builder.write(Vec::new()), Err(IndexError::StaleLayout)));
    builder.finish().unwrap();
    let mut out = Vec::new();
    let written = builder.write(&mut out).unwrap();
    let tree = TokenTree::open(Bytes::from(out)).unwrap();
    assert_eq!(written, tree.len_bytes());
    assert_eq!(tree.get(500).unwrap().unwrap().offsets().as_slice(), &[9]);
}

#[test]
fn corrupt_header_is_rejected() {
    let builder = finished(&simple_token_map());
    let mut out = Vec::new();
    builder.write(&mut out).unwrap();

    let mut bad_magic = out.clone();
    bad_magic[0] = b'X';
    assert!(TokenTree::open(Bytes::from(bad_magic)).unwrap_err().is_corruption());

    let mut bad_count = out.clone();
    bad_count[12] ^= 0x01;
    assert!(TokenTree::open(Bytes::from(bad_count)).unwrap_err().is_corruption());

    assert!(TokenTree::open(Bytes::from_static(b"TKTR")).unwrap_err().is_corruption());
}

#[test]
fn small_blocks_round_trip_through_file() -> Result<()> {
    let tokens: BTreeMap<i64, OffsetSet> = (0..20_000i64)
        .map(|i| (i * 7 - 50_000, OffsetSet::from([i as u64, (i as u64) << 20])))
        .collect();
    let mut builder =
        TokenTreeBuilder::with_options(tokens.clone(), TreeOptions::new().block_size(512))?;
    builder.finish()?;

    let mut file = NamedTempFile::new()?;
    file.write_all(&builder.serialized_size()?.to_be_bytes())?;
    builder.write(file.as_file_mut())?;
    file.flush()?;

    let io = StdFileIo::open(file.path())?;
    let tree = TokenTree::load(&io, 8, builder.serialized_size()?, ReadOptions::default())?;
    assert!(tree.height() >= 3);
    assert_eq!(pairs(tree.iter()), tokens.into_iter().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn concurrent_readers_share_one_tree() -> Result<()> {
    let tree = Arc::new(generate_tree(0, 50_000)?);
    let handles: Vec<_> = (0..4i64)
        .map(|worker| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || -> Result<()> {
                for i in (worker..=50_000).step_by(4) {
                    let token = tree.get(i)?.expect("token present");
                    assert_eq!(token.offsets().as_slice(), &[i as u64]);
                }
                let mut it = tree.iter();
                it.skip_to(worker * 10_000)?;
                assert_eq!(it.next_token()?.key(), worker * 10_000);
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("reader thread panicked")?;
    }
    Ok(())
}
