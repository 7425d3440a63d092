//! Property-based tests for the sorted-tree leaf store.
//!
//! Uses proptest to verify ordering and range-scan behavior over arbitrary
//! unique key sets, across block sizes small enough to force frequent node
//! splits.

use proptest::prelude::*;
use tidemark::tree::{InsertOutcome, LeafTree, SampleKey, SampleValue};

/// Strategy for a set of unique sample keys in arbitrary insertion order.
fn key_set_strategy() -> impl Strategy<Value = Vec<SampleKey>> {
    prop::collection::hash_set((0u64..100_000, 0u64..64), 1..300).prop_map(|set| {
        set.into_iter()
            .map(|(ts, point)| SampleKey::new(ts, point))
            .collect()
    })
}

/// Block sizes that hold 4, 7, and 31 records respectively.
fn block_size_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![Just(139usize), Just(239usize), Just(1_003usize)]
}

fn build(block_size: usize, keys: &[SampleKey]) -> LeafTree<SampleKey, SampleValue> {
    let mut tree = LeafTree::new(block_size).unwrap();
    for key in keys {
        let outcome = tree
            .insert(*key, SampleValue::new(0, key.timestamp as f64))
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);
    }
    tree
}

proptest! {
    /// A full forward scan yields exactly the sorted input, strictly
    /// ascending, regardless of insertion order and split pattern.
    #[test]
    fn test_scan_equals_sorted_input(
        keys in key_set_strategy(),
        block_size in block_size_strategy(),
    ) {
        let tree = build(block_size, &keys);
        prop_assert_eq!(tree.len(), keys.len() as u64);

        let scanned: Vec<SampleKey> = tree
            .iter()
            .map(|item| item.unwrap().0)
            .collect();
        let mut expected = keys.clone();
        expected.sort();
        prop_assert_eq!(&scanned, &expected);
        for pair in scanned.windows(2) {
            prop_assert!(pair[0] < pair[1], "keys not strictly ascending");
        }
    }

    /// Every inserted key is retrievable with its value; re-inserting any
    /// of them is refused without changing the tree.
    #[test]
    fn test_lookup_and_duplicate_refusal(
        keys in key_set_strategy(),
        block_size in block_size_strategy(),
    ) {
        let mut tree = build(block_size, &keys);
        let len_before = tree.len();

        for key in &keys {
            let stored = tree.get(key).unwrap();
            prop_assert_eq!(stored, Some(SampleValue::new(0, key.timestamp as f64)));

            let outcome = tree.insert(*key, SampleValue::new(9, -1.0)).unwrap();
            prop_assert_eq!(outcome, InsertOutcome::DuplicateKey);
        }
        prop_assert_eq!(tree.len(), len_before);

        // A key outside the generated timestamp range is never present.
        prop_assert_eq!(tree.get(&SampleKey::new(u64::MAX, 0)).unwrap(), None);
    }

    /// A half-open range scan equals the filtered full scan.
    #[test]
    fn test_range_equals_filtered_scan(
        keys in key_set_strategy(),
        block_size in block_size_strategy(),
        start_ts in 0u64..100_000,
        span in 1u64..50_000,
    ) {
        let tree = build(block_size, &keys);
        let start = SampleKey::new(start_ts, 0);
        let stop = SampleKey::new(start_ts + span, 0);

        let ranged: Vec<SampleKey> = tree
            .range(start, stop)
            .map(|item| item.unwrap().0)
            .collect();
        let filtered: Vec<SampleKey> = tree
            .iter()
            .map(|item| item.unwrap().0)
            .filter(|key| *key >= start && *key < stop)
            .collect();
        prop_assert_eq!(ranged, filtered);
    }
}
