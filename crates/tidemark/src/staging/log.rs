//! The rollover log: crash-recoverable bookkeeping of staging files.
//!
//! Every rollover generation gets one log entry, persisted (when file
//! backed) as a small GUID-named file:
//!
//! ```text
//! +-------+---------+----------+-------+----------+--------------+--------+
//! | magic | version | uuid     | state | path_len | staging path | crc32  |
//! | TMRL  | u16 LE  | 16 bytes | u8    | u32 LE   | path_len     | u32 LE |
//! +-------+---------+----------+-------+----------+--------------+--------+
//! ```
//!
//! The CRC covers everything before it. An entry is created `Pending`
//! before its staging file is written and moves to `Committed` only after
//! the staging file's durable flush, so after a crash a `Pending` entry
//! marks an interrupted rollover and a `Committed` entry marks a staging
//! file safe to consume. The log exclusively owns its entries; the writer
//! only requests creation and commit.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::staging::settings::RolloverLogSettings;

const MAGIC: [u8; 4] = *b"TMRL";
const VERSION: u16 = 1;
// magic + version + uuid + state + path_len
const FIXED_PREFIX: usize = 4 + 2 + 16 + 1 + 4;

/// Lifecycle state of a rollover generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverState {
    /// The staging file is being written; after a crash it must be
    /// replayed or discarded.
    Pending,
    /// The staging file is durably flushed and safe to consume.
    Committed,
}

/// One rollover generation tracked by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloverEntry {
    id: Uuid,
    staging_file: PathBuf,
    state: RolloverState,
}

impl RolloverEntry {
    /// Identifier of the rollover generation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Path of the staging file this entry tracks.
    pub fn staging_file(&self) -> &PathBuf {
        &self.staging_file
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RolloverState {
        self.state
    }

    fn encode(&self) -> Vec<u8> {
        // Paths are stored as UTF-8 text so the format stays portable.
        let path = self.staging_file.to_string_lossy();
        let path = path.as_bytes();
        let mut buf = Vec::with_capacity(FIXED_PREFIX + path.len() + 4);
        buf.extend_from_slice(&MAGIC); // magic (4 bytes)
        buf.extend_from_slice(&VERSION.to_le_bytes()); // version (2 bytes)
        buf.extend_from_slice(self.id.as_bytes()); // uuid (16 bytes)
        buf.push(match self.state {
            RolloverState::Pending => 0,
            RolloverState::Committed => 1,
        }); // state (1 byte)
        buf.extend_from_slice(&(path.len() as u32).to_le_bytes()); // path length (4 bytes)
        buf.extend_from_slice(path); // staging path
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes()); // CRC32 (4 bytes)
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_PREFIX + 4 {
            return Err(Error::CorruptStructure(format!(
                "log entry truncated at {} bytes",
                buf.len()
            )));
        }
        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let path_len = u32::from_le_bytes(buf[23..27].try_into().unwrap()) as usize;
        if buf.len() != FIXED_PREFIX + path_len + 4 {
            return Err(Error::CorruptStructure(format!(
                "log entry length {} does not match its path length {path_len}",
                buf.len()
            )));
        }
        let body = &buf[..FIXED_PREFIX + path_len];
        let expected = u32::from_le_bytes(buf[FIXED_PREFIX + path_len..].try_into().unwrap());
        let actual = crc32fast::hash(body);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        let state = match buf[22] {
            0 => RolloverState::Pending,
            1 => RolloverState::Committed,
            other => {
                return Err(Error::CorruptStructure(format!(
                    "unknown rollover state byte {other}"
                )))
            }
        };
        let path = std::str::from_utf8(&buf[27..27 + path_len]).map_err(|_| {
            Error::CorruptStructure("log entry staging path is not valid UTF-8".to_string())
        })?;
        Ok(Self {
            id: Uuid::from_bytes(buf[6..22].try_into().unwrap()),
            staging_file: PathBuf::from(path),
            state,
        })
    }
}

/// Tracks rollover generations through their `Pending -> Committed`
/// lifecycle, persisting each transition when file backed.
pub struct RolloverLog {
    settings: RolloverLogSettings,
    entries: Mutex<BTreeMap<Uuid, RolloverEntry>>,
}

impl RolloverLog {
    /// Creates a log, creating the log directory when file backed.
    pub fn new(settings: RolloverLogSettings) -> Result<Self> {
        if let Some(dir) = settings.log_path() {
            fs::create_dir_all(dir)?;
        } else {
            debug!("rollover log is memory-only, durability is off");
        }
        Ok(Self {
            settings,
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    /// Settings this log was built with.
    pub fn settings(&self) -> &RolloverLogSettings {
        &self.settings
    }

    /// Registers generation `id` as `Pending` for `staging_file`. When file
    /// backed, the log file is durably flushed before this returns.
    pub fn create_pending(&self, id: Uuid, staging_file: PathBuf) -> Result<()> {
        let entry = RolloverEntry {
            id,
            staging_file,
            state: RolloverState::Pending,
        };
        self.persist(&entry)?;
        debug!(%id, staging_file = %entry.staging_file.display(), "rollover pending");
        self.entries.lock().unwrap().insert(id, entry);
        Ok(())
    }

    /// Marks generation `id` as `Committed`. Callers invoke this only after
    /// the staging file's durable flush; when file backed, the transition
    /// itself is durably flushed before this returns.
    pub fn commit(&self, id: Uuid) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&id).ok_or(Error::UnknownRollover(id))?;
        let committed = RolloverEntry {
            state: RolloverState::Committed,
            ..entry.clone()
        };
        self.persist(&committed)?;
        info!(%id, staging_file = %committed.staging_file.display(), "rollover committed");
        *entry = committed;
        Ok(())
    }

    /// Drops generation `id` once the downstream merge has consumed its
    /// staging file, deleting the log file when file backed.
    pub fn remove(&self, id: Uuid) -> Result<()> {
        let entry = self
            .entries
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or(Error::UnknownRollover(id))?;
        if self.settings.is_file_backed() {
            match fs::remove_file(self.settings.file_name(id)?) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(%id, "rollover log file already missing on remove");
                }
                Err(err) => return Err(err.into()),
            }
        }
        debug!(%id, staging_file = %entry.staging_file.display(), "rollover removed");
        Ok(())
    }

    /// All entries currently in `Pending` state.
    pub fn pending(&self) -> Vec<RolloverEntry> {
        self.list(RolloverState::Pending)
    }

    /// All entries currently in `Committed` state.
    pub fn committed(&self) -> Vec<RolloverEntry> {
        self.list(RolloverState::Committed)
    }

    fn list(&self, state: RolloverState) -> Vec<RolloverEntry> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.state == state)
            .cloned()
            .collect()
    }

    fn persist(&self, entry: &RolloverEntry) -> Result<()> {
        if !self.settings.is_file_backed() {
            return Ok(());
        }
        let path = self.settings.file_name(entry.id)?;
        let mut file = File::create(&path)?;
        file.write_all(&entry.encode())?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads back every parseable log entry under the settings' log path.
    /// Unreadable or corrupt files are logged and skipped; a memory-only
    /// log has nothing to recover.
    pub fn recover(settings: &RolloverLogSettings) -> Result<Vec<RolloverEntry>> {
        let Some(dir) = settings.log_path() else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(dir)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !settings.matches(name) {
                continue;
            }
            match fs::read(&path).map_err(Error::from).and_then(|bytes| {
                RolloverEntry::decode(&bytes)
            }) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable rollover log file");
                }
            }
        }
        entries.sort_by_key(|entry| entry.id);
        info!(count = entries.len(), "recovered rollover log entries");
        Ok(entries)
    }

    /// Recovers only interrupted rollovers: entries still `Pending` whose
    /// staging file exists on disk, to be replayed or discarded by the
    /// downstream merge.
    pub fn recover_pending(settings: &RolloverLogSettings) -> Result<Vec<RolloverEntry>> {
        let entries = Self::recover(settings)?;
        Ok(entries
            .into_iter()
            .filter(|entry| {
                if entry.state != RolloverState::Pending {
                    return false;
                }
                if !entry.staging_file.exists() {
                    warn!(
                        id = %entry.id,
                        staging_file = %entry.staging_file.display(),
                        "pending rollover has no staging file, discarding"
                    );
                    return false;
                }
                true
            })
            .collect())
    }
}
