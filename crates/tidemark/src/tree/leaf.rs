//! Leaf level of the sorted tree: binary-search insert, node splits, point
//! lookups.
//!
//! Records live inside fixed-size blocks as a sorted array of
//! `key || value` pairs after the node header. A [`LeafTree`] owns the
//! in-memory block image plus a first-key index mapping each non-head
//! leaf's smallest key to its node id; routing a key means taking the
//! greatest indexed first key `<=` the key, falling back to the head leaf.
//! Because a key is only ever routed to a node whose first key it is `>=`,
//! the indexed first keys never change after a node is created, so the
//! index needs no repair on ordinary inserts.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::tree::blocks::BlockBuffer;
use crate::tree::node::{NodeHeader, NODE_HEADER_SIZE, NO_NODE};
use crate::tree::record::{Key, Record};
use crate::tree::scan::RangeScan;

/// Outcome of inserting a record into a leaf tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was stored.
    Inserted,
    /// The key already exists; the tree was not modified.
    DuplicateKey,
}

/// Binary search over the sorted key array of a leaf block.
///
/// Returns `Ok(slot)` on an exact match, `Err(slot)` with the insertion
/// point otherwise. The midpoint is `min + (max - min) / 2` so the search
/// cannot overflow on large counts.
pub(crate) fn search_node<K: Key, V: Record>(
    block: &[u8],
    count: usize,
    key: &K,
) -> std::result::Result<usize, usize> {
    let record_size = K::SIZE + V::SIZE;
    let mut min = 0usize;
    let mut max = count;
    while min < max {
        let mid = min + (max - min) / 2;
        let offset = NODE_HEADER_SIZE + mid * record_size;
        let probe = K::decode(&block[offset..offset + K::SIZE]);
        match probe.cmp(key) {
            Ordering::Equal => return Ok(mid),
            Ordering::Less => min = mid + 1,
            Ordering::Greater => max = mid,
        }
    }
    Err(min)
}

/// An in-memory sorted tree holding fixed-width records in leaf blocks
/// linked into a doubly linked chain.
///
/// Keys are unique; inserting an existing key returns
/// [`InsertOutcome::DuplicateKey`] without modifying the tree. Forward
/// scans follow the leaf chain and always observe strictly ascending keys.
#[derive(Debug)]
pub struct LeafTree<K: Key, V: Record> {
    blocks: BlockBuffer,
    /// First key of every non-head leaf, for routing lookups and inserts.
    index: BTreeMap<K, u32>,
    head: u32,
    entry_count: u64,
    max_children: usize,
    _value: PhantomData<V>,
}

impl<K: Key, V: Record> LeafTree<K, V> {
    /// Creates an empty tree with the given block size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if a block cannot hold at
    /// least two records, the minimum a node split requires.
    pub fn new(block_size: usize) -> Result<Self> {
        let record_size = K::SIZE + V::SIZE;
        // The header stores the count as i16, so a node never holds more
        // records than that even when the block could fit them.
        let max_children = (block_size.saturating_sub(NODE_HEADER_SIZE) / record_size)
            .min(i16::MAX as usize);
        if max_children < 2 {
            return Err(Error::InvalidConfiguration(format!(
                "block size {block_size} holds fewer than two {record_size}-byte records"
            )));
        }
        Ok(Self {
            blocks: BlockBuffer::new(block_size),
            index: BTreeMap::new(),
            head: NO_NODE,
            entry_count: 0,
            max_children,
            _value: PhantomData,
        })
    }

    /// Inserts a record.
    pub fn insert(&mut self, key: K, value: V) -> Result<InsertOutcome> {
        if self.head == NO_NODE {
            let id = self.blocks.allocate();
            NodeHeader::new_leaf().encode(self.blocks.block_mut(id)?);
            self.head = id;
        }
        let mut node = self.route(&key);
        let record_size = K::SIZE + V::SIZE;

        // Duplicates are detected before any split so a full node is never
        // mutated on a refused insert.
        let (mut header, mut slot) = {
            let block = self.blocks.block(node)?;
            let header = NodeHeader::decode_leaf(block)?;
            match search_node::<K, V>(block, header.child_count as usize, &key) {
                Ok(_) => return Ok(InsertOutcome::DuplicateKey),
                Err(slot) => (header, slot),
            }
        };

        if header.child_count as usize == self.max_children {
            let (new_node, first_key_moved) = self.split(node, header)?;
            if key >= first_key_moved {
                node = new_node;
            }
            let block = self.blocks.block(node)?;
            header = NodeHeader::decode_leaf(block)?;
            slot = match search_node::<K, V>(block, header.child_count as usize, &key) {
                Ok(_) => {
                    return Err(Error::CorruptStructure(
                        "duplicate key surfaced after node split".to_string(),
                    ))
                }
                Err(slot) => slot,
            };
        }

        let block = self.blocks.block_mut(node)?;
        let count = header.child_count as usize;
        let start = NODE_HEADER_SIZE + slot * record_size;
        let end = NODE_HEADER_SIZE + count * record_size;
        block.copy_within(start..end, start + record_size);
        key.encode(&mut block[start..start + K::SIZE]);
        value.encode(&mut block[start + K::SIZE..start + record_size]);
        header.child_count += 1;
        header.encode(block);

        self.entry_count += 1;
        Ok(InsertOutcome::Inserted)
    }

    /// Splits a full node in half, allocating the upper half into a new
    /// node spliced after it in the leaf chain. Returns the new node's id
    /// and its first key; the pending insert is routed to the new node when
    /// its key is `>=` that first key.
    fn split(&mut self, node: u32, header: NodeHeader) -> Result<(u32, K)> {
        let count = header.child_count as usize;
        if count < 2 {
            return Err(Error::CorruptStructure(format!(
                "cannot split node {node} holding {count} records"
            )));
        }
        let record_size = K::SIZE + V::SIZE;
        let items_first = count / 2;
        let items_second = count - items_first;
        let old_next = header.next_node;
        let new_node = self.blocks.allocate();

        let first_key_moved;
        {
            let (source, target) = self.blocks.pair_mut(node, new_node)?;
            let moved = NODE_HEADER_SIZE + items_first * record_size;
            let len = items_second * record_size;
            target[NODE_HEADER_SIZE..NODE_HEADER_SIZE + len]
                .copy_from_slice(&source[moved..moved + len]);
            first_key_moved = K::decode(&target[NODE_HEADER_SIZE..NODE_HEADER_SIZE + K::SIZE]);

            NodeHeader {
                level: 0,
                child_count: items_first as i16,
                previous_node: header.previous_node,
                next_node: new_node,
            }
            .encode(source);
            NodeHeader {
                level: 0,
                child_count: items_second as i16,
                previous_node: node,
                next_node: old_next,
            }
            .encode(target);
        }

        // Sibling repair: the old successor's back pointer must follow the
        // new node or the chain loses reciprocity.
        if old_next != NO_NODE {
            let block = self.blocks.block_mut(old_next)?;
            let mut next_header = NodeHeader::decode_leaf(block)?;
            next_header.previous_node = new_node;
            next_header.encode(block);
        }

        self.index.insert(first_key_moved, new_node);
        Ok((new_node, first_key_moved))
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        if self.head == NO_NODE {
            return Ok(None);
        }
        let block = self.blocks.block(self.route(key))?;
        let header = NodeHeader::decode_leaf(block)?;
        match search_node::<K, V>(block, header.child_count as usize, key) {
            Ok(slot) => {
                let offset = NODE_HEADER_SIZE + slot * (K::SIZE + V::SIZE) + K::SIZE;
                Ok(Some(V::decode(&block[offset..offset + V::SIZE])))
            }
            Err(_) => Ok(None),
        }
    }

    /// Returns a lazy cursor over the half-open key range `[start, stop)`.
    ///
    /// Each call creates an independent cursor; cursors never lock against
    /// each other.
    pub fn range(&self, start: K, stop: K) -> RangeScan<'_, K, V> {
        let node = if self.head == NO_NODE {
            NO_NODE
        } else {
            self.route(&start)
        };
        RangeScan::new(&self.blocks, node, Some(start), Some(stop))
    }

    /// Returns a cursor over every record in ascending key order.
    pub fn iter(&self) -> RangeScan<'_, K, V> {
        RangeScan::new(&self.blocks, self.head, None, None)
    }

    fn route(&self, key: &K) -> u32 {
        self.index
            .range(..=key)
            .next_back()
            .map(|(_, &id)| id)
            .unwrap_or(self.head)
    }

    /// Number of records stored in the tree.
    pub fn len(&self) -> u64 {
        self.entry_count
    }

    /// Whether the tree holds no records.
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Bytes occupied by the in-memory block image, reserved block included.
    pub fn size_bytes(&self) -> usize {
        self.blocks.size_bytes()
    }

    /// Id of the first leaf in the chain, or 0 while the tree is empty.
    pub fn head(&self) -> u32 {
        self.head
    }

    /// The fixed block size of the image.
    pub fn block_size(&self) -> usize {
        self.blocks.block_size()
    }

    pub(crate) fn block_image(&self) -> &BlockBuffer {
        &self.blocks
    }

    #[cfg(test)]
    pub(crate) fn max_children(&self) -> usize {
        self.max_children
    }
}
