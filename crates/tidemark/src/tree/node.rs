//! Leaf node block header.
//!
//! Every block of a sorted-tree image starts with an 11-byte header:
//!
//! ```text
//! +--------+-------------+---------------+-----------+
//! | level  | child_count | previous_node | next_node |
//! | u8 (1) | i16 LE (2)  | u32 LE (4)    | u32 LE (4)|
//! +--------+-------------+---------------+-----------+
//! ```
//!
//! `level` doubles as the node-type flag: 0 means leaf. `previous_node` and
//! `next_node` link the leaves at level 0 into a doubly linked chain used
//! for ordered forward scans; node id 0 is the reserved "no sibling"
//! sentinel (block 0 is never a node).

use crate::error::{Error, Result};

/// Encoded size of a node header in bytes.
pub const NODE_HEADER_SIZE: usize = 11;

/// Reserved node id meaning "no sibling" (also the level of leaf nodes'
/// header flag is distinct from this; see module docs).
pub const NO_NODE: u32 = 0;

/// Header of a sorted-tree node block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    /// Tree level of the node; 0 marks a leaf.
    pub level: u8,
    /// Number of records stored in the node.
    pub child_count: i16,
    /// Id of the previous sibling at the same level, or [`NO_NODE`].
    pub previous_node: u32,
    /// Id of the next sibling at the same level, or [`NO_NODE`].
    pub next_node: u32,
}

impl NodeHeader {
    /// Creates an empty leaf header with no siblings.
    pub fn new_leaf() -> Self {
        Self {
            level: 0,
            child_count: 0,
            previous_node: NO_NODE,
            next_node: NO_NODE,
        }
    }

    /// Encodes the header into the start of a block buffer.
    pub fn encode(&self, block: &mut [u8]) {
        block[0] = self.level;
        block[1..3].copy_from_slice(&self.child_count.to_le_bytes());
        block[3..7].copy_from_slice(&self.previous_node.to_le_bytes());
        block[7..11].copy_from_slice(&self.next_node.to_le_bytes());
    }

    /// Decodes a header from the start of a block buffer, requiring the
    /// block to be a leaf.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptStructure`] if the node-type flag is not a
    /// leaf or the child count is negative.
    pub fn decode_leaf(block: &[u8]) -> Result<Self> {
        if block[0] != 0 {
            return Err(Error::CorruptStructure(format!(
                "expected a leaf node, found level {}",
                block[0]
            )));
        }
        let child_count = i16::from_le_bytes(block[1..3].try_into().unwrap());
        if child_count < 0 {
            return Err(Error::CorruptStructure(format!(
                "negative child count {child_count}"
            )));
        }
        Ok(Self {
            level: 0,
            child_count,
            previous_node: u32::from_le_bytes(block[3..7].try_into().unwrap()),
            next_node: u32::from_le_bytes(block[7..11].try_into().unwrap()),
        })
    }
}
