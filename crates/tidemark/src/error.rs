//! Error and Result types for Tidemark storage operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for Tidemark operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for storage-engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A structural invariant of the sorted tree was violated, such as
    /// reading a non-leaf block as a leaf or splitting a node below
    /// minimum occupancy. Fatal for the operation; never silently ignored.
    #[error("corrupt structure: {0}")]
    CorruptStructure(String),

    /// A configuration value was rejected at assignment time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A path-like setting was blank or contained invalid path characters.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// An operation requiring durable logging was attempted while the
    /// rollover log is not file backed.
    #[error("rollover log is not file backed")]
    NotFileBacked,

    /// A rollover-log operation referenced an entry id that is not
    /// registered.
    #[error("unknown rollover entry: {0}")]
    UnknownRollover(uuid::Uuid),

    /// The first-stage writer has shut down, or its background worker
    /// stopped, and no further appends are accepted.
    #[error("first-stage writer is shut down")]
    Shutdown,

    /// Invalid magic bytes in a staging or log file header.
    #[error("invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported on-disk format version.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u16),

    /// File checksum does not match the stored value.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// Underlying I/O error. Disk failures during a rollover are not
    /// retried automatically; the caller decides whether to retry the
    /// whole rollover.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
