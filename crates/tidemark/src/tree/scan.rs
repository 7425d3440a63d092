//! Lazy forward cursor over the leaf chain of a sorted-tree image.
//!
//! A [`RangeScan`] works against any [`BlockSource`], so the same cursor
//! walks the in-memory buffer of a live tree and the blocks of an opened
//! staging file. It seeks inside the starting node by binary search, yields
//! records in ascending key order, follows `next_node` across leaves, and
//! ends at the end of the chain or at the first key `>=` the stop bound
//! (half-open ranges).

use std::marker::PhantomData;

use crate::error::Result;
use crate::tree::blocks::BlockSource;
use crate::tree::leaf::search_node;
use crate::tree::node::{NodeHeader, NODE_HEADER_SIZE, NO_NODE};
use crate::tree::record::{Key, Record};

/// A forward cursor yielding `(key, value)` pairs in ascending key order.
///
/// Read errors and structural corruption end the scan after being yielded
/// once as an `Err` item.
pub struct RangeScan<'a, K: Key, V: Record> {
    source: &'a dyn BlockSource,
    block: Vec<u8>,
    /// Node to load next; [`NO_NODE`] ends the scan.
    next: u32,
    loaded: bool,
    count: usize,
    next_node: u32,
    pos: usize,
    /// Seek key for the first loaded node; `None` after it is applied.
    start: Option<K>,
    stop: Option<K>,
    done: bool,
    _value: PhantomData<V>,
}

impl<'a, K: Key, V: Record> RangeScan<'a, K, V> {
    /// Creates a cursor starting at `start_node`, seeking to `start` inside
    /// it, bounded above (exclusively) by `stop`.
    pub(crate) fn new(
        source: &'a dyn BlockSource,
        start_node: u32,
        start: Option<K>,
        stop: Option<K>,
    ) -> Self {
        Self {
            block: vec![0u8; source.block_size()],
            source,
            next: start_node,
            loaded: false,
            count: 0,
            next_node: NO_NODE,
            pos: 0,
            start,
            stop,
            done: false,
            _value: PhantomData,
        }
    }

    fn load(&mut self) -> Result<()> {
        self.source.read_block(self.next, &mut self.block)?;
        let header = NodeHeader::decode_leaf(&self.block)?;
        self.count = header.child_count as usize;
        self.next_node = header.next_node;
        self.pos = match self.start.take() {
            Some(start) => match search_node::<K, V>(&self.block, self.count, &start) {
                Ok(slot) | Err(slot) => slot,
            },
            None => 0,
        };
        self.loaded = true;
        Ok(())
    }
}

impl<K: Key, V: Record> Iterator for RangeScan<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if !self.loaded {
                if self.next == NO_NODE {
                    self.done = true;
                    return None;
                }
                if let Err(err) = self.load() {
                    self.done = true;
                    return Some(Err(err));
                }
            }
            if self.pos >= self.count {
                self.loaded = false;
                self.next = self.next_node;
                continue;
            }
            let record_size = K::SIZE + V::SIZE;
            let offset = NODE_HEADER_SIZE + self.pos * record_size;
            let key = K::decode(&self.block[offset..offset + K::SIZE]);
            if let Some(stop) = &self.stop {
                if key >= *stop {
                    self.done = true;
                    return None;
                }
            }
            let value = V::decode(&self.block[offset + K::SIZE..offset + record_size]);
            self.pos += 1;
            return Some(Ok((key, value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tree::leaf::LeafTree;
    use crate::tree::record::{SampleKey, SampleValue};

    fn tree_with(keys: impl IntoIterator<Item = u64>) -> LeafTree<SampleKey, SampleValue> {
        // 4 records per node, several nodes for the counts used below.
        let mut tree = LeafTree::new(139).unwrap();
        for n in keys {
            tree.insert(SampleKey::new(n, 0), SampleValue::new(0, n as f64))
                .unwrap();
        }
        tree
    }

    fn timestamps(scan: crate::tree::scan::RangeScan<'_, SampleKey, SampleValue>) -> Vec<u64> {
        scan.map(|item| item.unwrap().0.timestamp).collect()
    }

    #[test]
    fn test_empty_tree_scan_yields_nothing() {
        let tree = tree_with(0..0);
        assert_eq!(timestamps(tree.iter()), Vec::<u64>::new());
    }

    #[test]
    fn test_scan_crosses_node_boundaries() {
        let tree = tree_with((0..40).map(|n| n * 2));
        let expected: Vec<u64> = (0..40).map(|n| n * 2).collect();
        assert_eq!(timestamps(tree.iter()), expected);
    }

    #[test]
    fn test_range_seeks_to_absent_start_key() {
        let tree = tree_with((0..40).map(|n| n * 2));
        // 7 and 21 are not stored; the scan starts at 8 and stops before 20.
        let hits = timestamps(tree.range(SampleKey::new(7, 0), SampleKey::new(21, 0)));
        assert_eq!(hits, vec![8, 10, 12, 14, 16, 18, 20]);
    }

    #[test]
    fn test_range_stop_bound_is_exclusive() {
        let tree = tree_with(0..12);
        let hits = timestamps(tree.range(SampleKey::new(4, 0), SampleKey::new(8, 0)));
        assert_eq!(hits, vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_empty_range_when_start_at_or_past_stop() {
        let tree = tree_with(0..12);
        let hits = timestamps(tree.range(SampleKey::new(8, 0), SampleKey::new(8, 0)));
        assert_eq!(hits, Vec::<u64>::new());
    }

    #[test]
    fn test_independent_cursors() {
        let tree = tree_with(0..20);
        let mut a = tree.iter();
        let mut b = tree.iter();
        assert_eq!(a.next().unwrap().unwrap().0.timestamp, 0);
        assert_eq!(a.next().unwrap().unwrap().0.timestamp, 1);
        assert_eq!(b.next().unwrap().unwrap().0.timestamp, 0);
    }
}
