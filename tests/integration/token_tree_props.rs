#![allow(missing_docs)]

use std::collections::BTreeMap;

use bytes::Bytes;
use proptest::prelude::*;
use token_index::tree::{
    OffsetSet, RangeIterator, Token, TokenTree, TokenTreeBuilder, TreeOptions,
};

fn arb_offset() -> impl Strategy<Value = u64> {
    prop_oneof![
        0u64..(1 << 12),
        0u64..(1 << 24),
        (1u64 << 40)..(1u64 << 40) + (1 << 16),
        0u64..(1 << 48),
        any::<u64>(),
    ]
}

fn arb_offsets() -> impl Strategy<Value = OffsetSet> {
    prop::collection::vec(arb_offset(), 1..7).prop_map(|v| v.into_iter().collect())
}

fn arb_tokens(max: usize) -> impl Strategy<Value = BTreeMap<i64, OffsetSet>> {
    prop::collection::btree_map(any::<i64>(), arb_offsets(), 0..max)
}

fn arb_block_size() -> impl Strategy<Value = usize> {
    prop_oneof![Just(256usize), Just(512), Just(4096)]
}

fn serialize(tokens: &BTreeMap<i64, OffsetSet>, block_size: usize) -> (TokenTreeBuilder, Bytes) {
    let mut builder = TokenTreeBuilder::with_options(
        tokens.clone(),
        TreeOptions::new().block_size(block_size),
    )
    .unwrap();
    builder.finish().unwrap();
    let mut out = Vec::new();
    builder.write(&mut out).unwrap();
    (builder, Bytes::from(out))
}

fn collect(tokens: impl Iterator<Item = token_index::Result<Token>>) -> Vec<(i64, OffsetSet)> {
    tokens
        .map(|t| t.map(|t| (t.key(), t.into_offsets())).unwrap())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn serialized_tree_round_trips(tokens in arb_tokens(600), block_size in arb_block_size()) {
        let (builder, bytes) = serialize(&tokens, block_size);
        prop_assert_eq!(builder.serialized_size().unwrap(), bytes.len() as u64);

        let tree = TokenTree::open(bytes).unwrap();
        prop_assert_eq!(tree.count(), tokens.len() as u64);
        let expected: Vec<(i64, OffsetSet)> = tokens.into_iter().collect();
        prop_assert_eq!(collect(tree.iter()), expected);
    }

    #[test]
    fn lookups_match_source_map(
        tokens in arb_tokens(400),
        probes in prop::collection::vec(any::<i64>(), 0..32),
    ) {
        let (_, bytes) = serialize(&tokens, 256);
        let tree = TokenTree::open(bytes).unwrap();
        for (key, offsets) in &tokens {
            let found = tree.get(*key).unwrap().map(Token::into_offsets);
            prop_assert_eq!(found.as_ref(), Some(offsets));
        }
        for probe in probes {
            let found = tree.get(probe).unwrap().map(Token::into_offsets);
            prop_assert_eq!(found.as_ref(), tokens.get(&probe));
        }
    }

    #[test]
    fn skip_yields_exactly_the_tail_at_or_above_target(
        tokens in arb_tokens(400),
        consumed in 0usize..8,
        target in any::<i64>(),
    ) {
        let (builder, bytes) = serialize(&tokens, 256);
        let tree = TokenTree::open(bytes).unwrap();

        let mut from_tree = tree.iter();
        let mut from_builder = builder.iterator();
        let mut last = None;
        for _ in 0..consumed {
            if !from_tree.has_next().unwrap() {
                break;
            }
            let key = from_tree.next_token().unwrap().key();
            prop_assert_eq!(from_builder.next_token().unwrap().key(), key);
            last = Some(key);
        }

        from_tree.skip_to(target).unwrap();
        from_builder.skip_to(target).unwrap();

        let expected: Vec<(i64, OffsetSet)> = tokens
            .range(target..)
            .filter(|(k, _)| last.map_or(true, |last| **k > last))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        prop_assert_eq!(collect(from_tree), expected.clone());
        prop_assert_eq!(collect(from_builder), expected);
    }

    #[test]
    fn adding_maps_unions_offsets(a in arb_tokens(200), b in arb_tokens(200)) {
        let mut builder = TokenTreeBuilder::from_tokens(a.clone());
        builder.finish().unwrap();
        builder.add(b.clone());
        prop_assert!(builder.is_layout_stale() || b.is_empty());

        let mut expected = a;
        for (key, offsets) in b {
            expected.entry(key).or_default().union(&offsets);
        }
        builder.finish().unwrap();
        let mut out = Vec::new();
        builder.write(&mut out).unwrap();
        let tree = TokenTree::open(Bytes::from(out)).unwrap();
        prop_assert_eq!(collect(tree.iter()), expected.into_iter().collect::<Vec<_>>());
    }
}
