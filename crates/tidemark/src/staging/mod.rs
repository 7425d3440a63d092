//! First-stage staging pipeline.
//!
//! Ingested records buffer in memory and roll over into immutable,
//! GUID-named staging files, with every generation tracked through a
//! crash-recoverable rollover log. Downstream tiers consume committed
//! staging files; this module never merges them (that is the next stage's
//! job).

pub mod file;
pub mod log;
pub mod settings;
pub mod writer;

pub use file::StagingFile;
pub use log::{RolloverEntry, RolloverLog, RolloverState};
pub use settings::{FirstStageWriterSettings, RolloverLogSettings, StagingFileSettings};
pub use writer::{FirstStageWriter, RolloverReason};
