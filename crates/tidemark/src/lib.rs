//! Tidemark - first stage of a time-series historian's write path.
//!
//! Incoming samples are buffered in a sorted tree of fixed-size blocks and
//! periodically rolled over into immutable staging files, each rollover
//! protected by a crash-recoverable log entry that is committed only after
//! the staging file is durably on disk.
//!
//! # Components
//!
//! - [`LeafTree`]: sorted in-memory buffer of fixed-width records
//! - [`FirstStageWriter`]: buffered ingestion with size and time rollover
//!   triggers and a backpressure ceiling
//! - [`StagingFile`]: immutable on-disk image of one rollover generation
//! - [`RolloverLog`]: Pending -> Committed bookkeeping and crash recovery
//!
//! # Example
//!
//! ```rust,ignore
//! use tidemark::{FirstStageWriter, FirstStageWriterSettings, SampleKey, SampleValue};
//!
//! let mut settings = FirstStageWriterSettings::new("/data/stage1")?;
//! settings.log_mut().set_log_path("/data/rollover-logs")?;
//!
//! let mut writer: FirstStageWriter<SampleKey, SampleValue> =
//!     FirstStageWriter::new(settings)?;
//! writer.append(SampleKey::new(now_ms, point_id), SampleValue::new(0, 230.17))?;
//!
//! // Readers consume committed staging files, never the live buffer.
//! for entry in writer.log().committed() {
//!     let file: StagingFile<SampleKey, SampleValue> =
//!         StagingFile::open(entry.staging_file())?;
//!     for sample in file.iter() {
//!         let (key, value) = sample?;
//!     }
//! }
//!
//! writer.shutdown()?;
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod staging;
pub mod tree;

pub use error::{Error, Result};
pub use staging::{
    FirstStageWriter, FirstStageWriterSettings, RolloverEntry, RolloverLog, RolloverLogSettings,
    RolloverReason, RolloverState, StagingFile, StagingFileSettings,
};
pub use tree::{InsertOutcome, LeafTree, RangeScan, SampleKey, SampleValue};
