//! Immutable staging files: the on-disk serialization of one rollover
//! generation.
//!
//! A staging file stores the frozen tree's node blocks verbatim at their
//! node ids, so `node_id * block_size` is the file offset of a block and
//! the reserved block 0 holds the file header instead of a node:
//!
//! ```text
//! +-------+---------+------------+-----------+------------+-------------+----------+------------+----------+
//! | magic | version | block_size | head_node | node_count | entry_count | key_size | value_size | body_crc |
//! | TMRK  | u16 LE  | u32 LE     | u32 LE    | u32 LE     | u64 LE      | u16 LE   | u16 LE     | u32 LE   |
//! +-------+---------+------------+-----------+------------+-------------+----------+------------+----------+
//! ```
//!
//! `body_crc` is the CRC32 of all node blocks in id order. The writer
//! streams the node blocks first, writes the header last, and `sync_all`s
//! before returning; a staging file that exists with a valid header was
//! durably flushed. Opened files are immutable, so cursors over them need
//! no locking.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::tree::blocks::BlockSource;
use crate::tree::leaf::LeafTree;
use crate::tree::node::{NodeHeader, NODE_HEADER_SIZE, NO_NODE};
use crate::tree::record::{Key, Record};
use crate::tree::scan::RangeScan;

const MAGIC: [u8; 4] = *b"TMRK";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 34;

struct Header {
    block_size: u32,
    head_node: u32,
    node_count: u32,
    entry_count: u64,
    key_size: u16,
    value_size: u16,
    body_crc: u32,
}

impl Header {
    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&MAGIC); // magic (4 bytes)
        buf[4..6].copy_from_slice(&VERSION.to_le_bytes()); // version (2 bytes)
        buf[6..10].copy_from_slice(&self.block_size.to_le_bytes()); // block size (4 bytes)
        buf[10..14].copy_from_slice(&self.head_node.to_le_bytes()); // head node (4 bytes)
        buf[14..18].copy_from_slice(&self.node_count.to_le_bytes()); // node count (4 bytes)
        buf[18..26].copy_from_slice(&self.entry_count.to_le_bytes()); // entry count (8 bytes)
        buf[26..28].copy_from_slice(&self.key_size.to_le_bytes()); // key size (2 bytes)
        buf[28..30].copy_from_slice(&self.value_size.to_le_bytes()); // value size (2 bytes)
        buf[30..34].copy_from_slice(&self.body_crc.to_le_bytes()); // body CRC32 (4 bytes)
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(Self {
            block_size: u32::from_le_bytes(buf[6..10].try_into().unwrap()),
            head_node: u32::from_le_bytes(buf[10..14].try_into().unwrap()),
            node_count: u32::from_le_bytes(buf[14..18].try_into().unwrap()),
            entry_count: u64::from_le_bytes(buf[18..26].try_into().unwrap()),
            key_size: u16::from_le_bytes(buf[26..28].try_into().unwrap()),
            value_size: u16::from_le_bytes(buf[28..30].try_into().unwrap()),
            body_crc: u32::from_le_bytes(buf[30..34].try_into().unwrap()),
        })
    }
}

/// Serializes a frozen tree to `path` and durably flushes it.
pub(crate) fn write_staging_file<K: Key, V: Record>(
    tree: &LeafTree<K, V>,
    path: &Path,
) -> Result<()> {
    let blocks = tree.block_image();
    let block_size = blocks.block_size();
    let mut file = File::create(path)?;

    // Node blocks first; the header is only written once their bytes and
    // CRC are final.
    let mut hasher = crc32fast::Hasher::new();
    file.seek(SeekFrom::Start(block_size as u64))?;
    for id in 1..blocks.block_count() {
        let block = blocks.block(id)?;
        hasher.update(block);
        file.write_all(block)?;
    }

    let header = Header {
        block_size: block_size as u32,
        head_node: tree.head(),
        node_count: blocks.block_count() - 1,
        entry_count: tree.len(),
        key_size: K::SIZE as u16,
        value_size: V::SIZE as u16,
        body_crc: hasher.finalize(),
    };
    let mut header_block = vec![0u8; block_size];
    header.encode(&mut header_block);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header_block)?;
    file.sync_all()?;
    Ok(())
}

/// A read-only view over one staging file.
///
/// Opening validates the header, verifies the body CRC, and walks the leaf
/// chain once to rebuild the first-key routing index and check that the
/// sibling pointers are reciprocal. After that, block reads seek under an
/// internal mutex, so any number of cursors can scan the immutable file
/// concurrently.
#[derive(Debug)]
pub struct StagingFile<K: Key, V: Record> {
    file: Mutex<File>,
    path: PathBuf,
    block_size: usize,
    node_count: u32,
    head: u32,
    entry_count: u64,
    /// First key of every non-head leaf, for routing range starts.
    index: BTreeMap<K, u32>,
    _value: PhantomData<V>,
}

impl<K: Key, V: Record> StagingFile<K, V> {
    /// Opens and validates the staging file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;

        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = Header::decode(&header_buf)?;
        if header.key_size as usize != K::SIZE || header.value_size as usize != V::SIZE {
            return Err(Error::CorruptStructure(format!(
                "record shape mismatch: file stores {}/{} byte records, expected {}/{}",
                header.key_size,
                header.value_size,
                K::SIZE,
                V::SIZE
            )));
        }
        let block_size = header.block_size as usize;
        if block_size < NODE_HEADER_SIZE + K::SIZE + V::SIZE {
            return Err(Error::CorruptStructure(format!(
                "block size {block_size} cannot hold a record"
            )));
        }

        let mut staging = Self {
            file: Mutex::new(file),
            path,
            block_size,
            node_count: header.node_count,
            head: header.head_node,
            entry_count: header.entry_count,
            index: BTreeMap::new(),
            _value: PhantomData,
        };
        staging.verify_crc(header.body_crc)?;
        staging.rebuild_index()?;
        Ok(staging)
    }

    fn verify_crc(&mut self, expected: u32) -> Result<()> {
        let mut hasher = crc32fast::Hasher::new();
        let mut block = vec![0u8; self.block_size];
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(self.block_size as u64))?;
        for _ in 0..self.node_count {
            file.read_exact(&mut block)?;
            hasher.update(&block);
        }
        drop(file);
        let actual = hasher.finalize();
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }

    /// Walks the leaf chain, collecting each non-head leaf's first key and
    /// verifying that `prev`/`next` pointers are reciprocal, the chain
    /// covers every node exactly once, and the stored entry count matches.
    fn rebuild_index(&mut self) -> Result<()> {
        if self.head == NO_NODE {
            if self.node_count != 0 || self.entry_count != 0 {
                return Err(Error::CorruptStructure(
                    "headless file with a non-empty body".to_string(),
                ));
            }
            return Ok(());
        }

        let mut block = vec![0u8; self.block_size];
        let mut id = self.head;
        let mut prev = NO_NODE;
        let mut visited = 0u32;
        let mut entries = 0u64;
        while id != NO_NODE {
            if visited >= self.node_count {
                return Err(Error::CorruptStructure(
                    "leaf chain longer than the node count, likely a cycle".to_string(),
                ));
            }
            self.read_block(id, &mut block)?;
            let header = NodeHeader::decode_leaf(&block)?;
            if header.previous_node != prev {
                return Err(Error::CorruptStructure(format!(
                    "node {id} points back to {} instead of {prev}",
                    header.previous_node
                )));
            }
            if id != self.head {
                let first = K::decode(&block[NODE_HEADER_SIZE..NODE_HEADER_SIZE + K::SIZE]);
                self.index.insert(first, id);
            }
            entries += header.child_count as u64;
            visited += 1;
            prev = id;
            id = header.next_node;
        }
        if visited != self.node_count {
            return Err(Error::CorruptStructure(format!(
                "leaf chain covers {visited} of {} nodes",
                self.node_count
            )));
        }
        if entries != self.entry_count {
            return Err(Error::CorruptStructure(format!(
                "leaf chain holds {entries} records, header says {}",
                self.entry_count
            )));
        }
        Ok(())
    }

    /// Returns a cursor over the half-open key range `[start, stop)`.
    pub fn range(&self, start: K, stop: K) -> RangeScan<'_, K, V> {
        let node = if self.head == NO_NODE {
            NO_NODE
        } else {
            self.index
                .range(..=&start)
                .next_back()
                .map(|(_, &id)| id)
                .unwrap_or(self.head)
        };
        RangeScan::new(self, node, Some(start), Some(stop))
    }

    /// Returns a cursor over every record in ascending key order.
    pub fn iter(&self) -> RangeScan<'_, K, V> {
        RangeScan::new(self, self.head, None, None)
    }

    /// Number of records stored in the file.
    pub fn len(&self) -> u64 {
        self.entry_count
    }

    /// Whether the file holds no records.
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<K: Key, V: Record> BlockSource for StagingFile<K, V> {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.node_count + 1
    }

    fn read_block(&self, id: u32, buf: &mut [u8]) -> Result<()> {
        if id == NO_NODE || id > self.node_count {
            return Err(Error::CorruptStructure(format!(
                "block id {id} out of range ({} node blocks)",
                self.node_count
            )));
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(id as u64 * self.block_size as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }
}
