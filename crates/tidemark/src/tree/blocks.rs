//! Fixed-size block storage for sorted-tree images.
//!
//! Nodes are addressed by block index into a sequence of fixed-size blocks;
//! block 0 is reserved (node id 0 is the "no sibling" sentinel, and in a
//! serialized staging file block 0 holds the file header instead). Every
//! access is a bounds-checked slice operation on an owned block buffer, so
//! a corrupt node id can never read outside the image.

use crate::error::{Error, Result};

/// Read access to a set of fixed-size blocks.
///
/// Implemented by the in-memory [`BlockBuffer`] and by opened staging
/// files, so range-scan cursors work over either.
pub trait BlockSource {
    /// The fixed block size of this source in bytes.
    fn block_size(&self) -> usize;

    /// Number of addressable blocks, including the reserved block 0.
    fn block_count(&self) -> u32;

    /// Reads block `id` into `buf`, which is exactly `block_size` long.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptStructure`] if `id` is out of range.
    fn read_block(&self, id: u32, buf: &mut [u8]) -> Result<()>;
}

/// An in-memory, growable image of fixed-size blocks.
#[derive(Debug)]
pub struct BlockBuffer {
    block_size: usize,
    blocks: Vec<Box<[u8]>>,
}

impl BlockBuffer {
    /// Creates an empty image with the given block size. Block 0 is
    /// allocated immediately and stays reserved.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            blocks: vec![vec![0u8; block_size].into_boxed_slice()],
        }
    }

    /// Allocates a zeroed block and returns its id (never 0).
    pub fn allocate(&mut self) -> u32 {
        let id = self.blocks.len() as u32;
        self.blocks
            .push(vec![0u8; self.block_size].into_boxed_slice());
        id
    }

    /// Borrows block `id`.
    pub fn block(&self, id: u32) -> Result<&[u8]> {
        self.blocks
            .get(id as usize)
            .map(|b| &**b)
            .ok_or_else(|| out_of_range(id, self.blocks.len()))
    }

    /// Mutably borrows block `id`.
    pub fn block_mut(&mut self, id: u32) -> Result<&mut [u8]> {
        let len = self.blocks.len();
        self.blocks
            .get_mut(id as usize)
            .map(|b| &mut **b)
            .ok_or_else(|| out_of_range(id, len))
    }

    /// Mutably borrows two distinct blocks at once, `first < second`.
    /// Used by node splits, which copy records between two blocks.
    pub fn pair_mut(&mut self, first: u32, second: u32) -> Result<(&mut [u8], &mut [u8])> {
        let len = self.blocks.len();
        if first >= second || second as usize >= len {
            return Err(Error::CorruptStructure(format!(
                "invalid block pair ({first}, {second}) of {len}"
            )));
        }
        let (lo, hi) = self.blocks.split_at_mut(second as usize);
        Ok((&mut lo[first as usize], &mut hi[0]))
    }

    /// Total bytes held by the image, reserved block included.
    pub fn size_bytes(&self) -> usize {
        self.blocks.len() * self.block_size
    }

    /// Number of blocks in the image, reserved block included.
    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    /// The fixed block size of the image in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl BlockSource for BlockBuffer {
    fn block_size(&self) -> usize {
        BlockBuffer::block_size(self)
    }

    fn block_count(&self) -> u32 {
        BlockBuffer::block_count(self)
    }

    fn read_block(&self, id: u32, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(self.block(id)?);
        Ok(())
    }
}

fn out_of_range(id: u32, count: usize) -> Error {
    Error::CorruptStructure(format!("block id {id} out of range ({count} blocks)"))
}
