//! Sorted-tree leaf store.
//!
//! An ordered record store built from fixed-size blocks: leaf nodes hold
//! sorted arrays of fixed-width `key || value` records and are linked into
//! a doubly linked chain for ordered forward scans. The in-memory form
//! ([`LeafTree`]) is the write buffer of the first-stage pipeline; the same
//! block layout is serialized verbatim into immutable staging files.

pub mod blocks;
pub mod leaf;
pub mod node;
pub mod record;
pub mod scan;

pub use blocks::{BlockBuffer, BlockSource};
pub use leaf::{InsertOutcome, LeafTree};
pub use node::{NodeHeader, NODE_HEADER_SIZE, NO_NODE};
pub use record::{Key, Record, SampleKey, SampleValue};
pub use scan::RangeScan;
