//! Validated configuration for the first-stage write path.
//!
//! Numeric settings clamp out-of-range assignments to the nearest legal
//! value instead of failing, so a writer can always be constructed from
//! whatever a config file hands over. Path-like settings are the opposite:
//! a bad prefix, extension, or directory is rejected at assignment time,
//! long before the first rollover would trip over it.
//!
//! All settings types are plain owned data; `Clone` produces a deep copy,
//! and the writer snapshots its settings at construction so later mutation
//! of the original cannot reach a running pipeline.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Characters never allowed in file-name prefixes, extensions, or
/// directory paths handed to the naming helpers.
const INVALID_NAME_CHARS: &[char] = &['*', '?', '"', '<', '>', '|', '\0'];

fn validate_name_part(label: &str, value: &str) -> Result<()> {
    if value.contains(INVALID_NAME_CHARS) || value.contains(['/', '\\']) {
        return Err(Error::InvalidPath(format!(
            "{label} {value:?} contains invalid path characters"
        )));
    }
    Ok(())
}

fn validate_directory(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidPath(format!("{label} is blank")));
    }
    if value.contains(INVALID_NAME_CHARS) {
        return Err(Error::InvalidPath(format!(
            "{label} {value:?} contains invalid path characters"
        )));
    }
    Ok(())
}

/// `[prefix " "] GUID extension`, the naming scheme shared by rollover log
/// files and staging files.
fn compose_file_name(prefix: &str, id: Uuid, extension: &str) -> String {
    if prefix.is_empty() {
        format!("{id}{extension}")
    } else {
        format!("{prefix} {id}{extension}")
    }
}

/// Where and how rollover log files are written.
///
/// An unset log path puts the log in memory-only mode: entries live in the
/// process only and durability is explicitly traded away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloverLogSettings {
    log_path: Option<PathBuf>,
    file_prefix: String,
    file_extension: String,
}

impl Default for RolloverLogSettings {
    fn default() -> Self {
        Self {
            log_path: None,
            file_prefix: "Rollover".to_string(),
            file_extension: ".RolloverLog".to_string(),
        }
    }
}

impl RolloverLogSettings {
    /// Creates file-backed settings rooted at `log_path`, with default
    /// prefix and extension.
    pub fn file_backed(log_path: impl Into<PathBuf>) -> Result<Self> {
        let mut settings = Self::default();
        settings.set_log_path(log_path)?;
        Ok(settings)
    }

    /// Directory the log files are written to, if file backed.
    pub fn log_path(&self) -> Option<&PathBuf> {
        self.log_path.as_ref()
    }

    /// Whether the log persists its entries to disk.
    pub fn is_file_backed(&self) -> bool {
        self.log_path.is_some()
    }

    /// Sets the log directory. An empty value switches the log to
    /// memory-only mode.
    pub fn set_log_path(&mut self, log_path: impl Into<PathBuf>) -> Result<()> {
        let path = log_path.into();
        let text = path.to_string_lossy();
        if text.trim().is_empty() {
            self.log_path = None;
            return Ok(());
        }
        if text.contains(INVALID_NAME_CHARS) {
            return Err(Error::InvalidPath(format!(
                "log path {text:?} contains invalid path characters"
            )));
        }
        self.log_path = Some(path);
        Ok(())
    }

    /// File-name prefix of log files; may be empty.
    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    /// Sets the file-name prefix. Empty is allowed; path separators and
    /// wildcard characters are not.
    pub fn set_file_prefix(&mut self, prefix: impl Into<String>) -> Result<()> {
        let prefix = prefix.into();
        validate_name_part("file prefix", &prefix)?;
        self.file_prefix = prefix;
        Ok(())
    }

    /// File-name extension of log files, always carrying a leading `.`.
    pub fn file_extension(&self) -> &str {
        &self.file_extension
    }

    /// Sets the file-name extension, normalizing it to a leading `.`.
    pub fn set_file_extension(&mut self, extension: impl Into<String>) -> Result<()> {
        let extension = extension.into();
        if extension.trim().is_empty() {
            return Err(Error::InvalidPath("file extension is blank".to_string()));
        }
        validate_name_part("file extension", &extension)?;
        self.file_extension = if extension.starts_with('.') {
            extension
        } else {
            format!(".{extension}")
        };
        Ok(())
    }

    /// The glob-style pattern log files are enumerated with:
    /// `"*" + extension`, or `prefix + " *" + extension` when a prefix is
    /// set.
    pub fn search_pattern(&self) -> String {
        if self.file_prefix.is_empty() {
            format!("*{}", self.file_extension)
        } else {
            format!("{} *{}", self.file_prefix, self.file_extension)
        }
    }

    /// Whether `file_name` matches [`Self::search_pattern`].
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.ends_with(&self.file_extension)
            && (self.file_prefix.is_empty()
                || file_name.starts_with(&format!("{} ", self.file_prefix)))
    }

    /// Full path of the log file for rollover generation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFileBacked`] in memory-only mode.
    pub fn file_name(&self, id: Uuid) -> Result<PathBuf> {
        let dir = self.log_path.as_ref().ok_or(Error::NotFileBacked)?;
        Ok(dir.join(compose_file_name(&self.file_prefix, id, &self.file_extension)))
    }

    /// Generates a fresh GUID-named log file path.
    pub fn generate_file_name(&self) -> Result<(Uuid, PathBuf)> {
        let id = Uuid::new_v4();
        Ok((id, self.file_name(id)?))
    }
}

/// Where and how staging files are written. A staging file shares the GUID
/// of its rollover-log entry, so the two are matched by name on recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingFileSettings {
    directory: PathBuf,
    file_prefix: String,
    file_extension: String,
}

impl StagingFileSettings {
    /// Creates settings rooted at `directory`, with the default `"Stage1"`
    /// prefix and `".stage1"` extension.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        validate_directory("staging directory", &directory.to_string_lossy())?;
        Ok(Self {
            directory,
            file_prefix: "Stage1".to_string(),
            file_extension: ".stage1".to_string(),
        })
    }

    /// Directory staging files are written to.
    pub fn directory(&self) -> &PathBuf {
        &self.directory
    }

    /// Sets the staging directory.
    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) -> Result<()> {
        let directory = directory.into();
        validate_directory("staging directory", &directory.to_string_lossy())?;
        self.directory = directory;
        Ok(())
    }

    /// File-name prefix of staging files; may be empty.
    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    /// Sets the file-name prefix. Empty is allowed; path separators and
    /// wildcard characters are not.
    pub fn set_file_prefix(&mut self, prefix: impl Into<String>) -> Result<()> {
        let prefix = prefix.into();
        validate_name_part("file prefix", &prefix)?;
        self.file_prefix = prefix;
        Ok(())
    }

    /// File-name extension of staging files, always carrying a leading `.`.
    pub fn file_extension(&self) -> &str {
        &self.file_extension
    }

    /// Sets the file-name extension, normalizing it to a leading `.`.
    pub fn set_file_extension(&mut self, extension: impl Into<String>) -> Result<()> {
        let extension = extension.into();
        if extension.trim().is_empty() {
            return Err(Error::InvalidPath("file extension is blank".to_string()));
        }
        validate_name_part("file extension", &extension)?;
        self.file_extension = if extension.starts_with('.') {
            extension
        } else {
            format!(".{extension}")
        };
        Ok(())
    }

    /// Full path of the staging file for rollover generation `id`.
    pub fn file_name(&self, id: Uuid) -> PathBuf {
        self.directory
            .join(compose_file_name(&self.file_prefix, id, &self.file_extension))
    }
}

const MIN_ROLLOVER_INTERVAL_MS: u64 = 1_000;
const MAX_ROLLOVER_INTERVAL_MS: u64 = 60_000;
const DEFAULT_ROLLOVER_INTERVAL_MS: u64 = 10_000;

const MIN_SIZE_MB: u32 = 1;
const MAX_SIZE_MB: u32 = 1_024;
const DEFAULT_ROLLOVER_SIZE_MB: u32 = 200;
const DEFAULT_MAXIMUM_ALLOWED_MB: u32 = 300;

const MIN_BLOCK_SIZE: usize = 512;
const MAX_BLOCK_SIZE: usize = 65_536;
const DEFAULT_BLOCK_SIZE: usize = 4_096;

/// Settings governing the first-stage writer: rollover triggers, the
/// backpressure ceiling, the block size of the buffered tree, and the
/// owned staging-file and rollover-log settings.
#[derive(Debug, Clone)]
pub struct FirstStageWriterSettings {
    rollover_interval_ms: u64,
    rollover_size_mb: u32,
    maximum_allowed_mb: u32,
    block_size: usize,
    staging: StagingFileSettings,
    log: RolloverLogSettings,
}

impl FirstStageWriterSettings {
    /// Creates default settings with staging files under `staging_dir` and
    /// a memory-only rollover log.
    pub fn new(staging_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            rollover_interval_ms: DEFAULT_ROLLOVER_INTERVAL_MS,
            rollover_size_mb: DEFAULT_ROLLOVER_SIZE_MB,
            maximum_allowed_mb: DEFAULT_MAXIMUM_ALLOWED_MB,
            block_size: DEFAULT_BLOCK_SIZE,
            staging: StagingFileSettings::new(staging_dir)?,
            log: RolloverLogSettings::default(),
        })
    }

    /// Time-based rollover trigger in milliseconds.
    pub fn rollover_interval_ms(&self) -> u64 {
        self.rollover_interval_ms
    }

    /// Time-based rollover trigger as a [`Duration`].
    pub fn rollover_interval(&self) -> Duration {
        Duration::from_millis(self.rollover_interval_ms)
    }

    /// Sets the rollover interval, clamped to `[1000, 60000]` ms.
    pub fn set_rollover_interval_ms(&mut self, ms: u64) {
        self.rollover_interval_ms = ms.clamp(MIN_ROLLOVER_INTERVAL_MS, MAX_ROLLOVER_INTERVAL_MS);
    }

    /// Size-based rollover trigger in megabytes.
    pub fn rollover_size_mb(&self) -> u32 {
        self.rollover_size_mb
    }

    /// Size-based rollover trigger in bytes.
    pub fn rollover_size_bytes(&self) -> u64 {
        self.rollover_size_mb as u64 * 1_024 * 1_024
    }

    /// Sets the rollover size, clamped to `[1, 1024]` MB.
    pub fn set_rollover_size_mb(&mut self, mb: u32) {
        self.rollover_size_mb = mb.clamp(MIN_SIZE_MB, MAX_SIZE_MB);
    }

    /// Configured backpressure ceiling in megabytes.
    pub fn maximum_allowed_mb(&self) -> u32 {
        self.maximum_allowed_mb
    }

    /// Sets the backpressure ceiling, clamped to `[1, 1024]` MB.
    pub fn set_maximum_allowed_mb(&mut self, mb: u32) {
        self.maximum_allowed_mb = mb.clamp(MIN_SIZE_MB, MAX_SIZE_MB);
    }

    /// The ceiling the writer actually enforces: never below the rollover
    /// size, or the size trigger could never fire.
    pub fn effective_maximum_allowed_mb(&self) -> u32 {
        self.maximum_allowed_mb.max(self.rollover_size_mb)
    }

    /// [`Self::effective_maximum_allowed_mb`] in bytes.
    pub fn effective_maximum_allowed_bytes(&self) -> u64 {
        self.effective_maximum_allowed_mb() as u64 * 1_024 * 1_024
    }

    /// Block size of the buffered sorted tree in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sets the tree block size, clamped to `[512, 65536]` bytes.
    pub fn set_block_size(&mut self, bytes: usize) {
        self.block_size = bytes.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE);
    }

    /// Staging-file naming settings.
    pub fn staging(&self) -> &StagingFileSettings {
        &self.staging
    }

    /// Mutable staging-file naming settings.
    pub fn staging_mut(&mut self) -> &mut StagingFileSettings {
        &mut self.staging
    }

    /// Rollover-log settings.
    pub fn log(&self) -> &RolloverLogSettings {
        &self.log
    }

    /// Mutable rollover-log settings.
    pub fn log_mut(&mut self) -> &mut RolloverLogSettings {
        &mut self.log
    }
}
