//! The first-stage writer: buffered ingestion with staged rollovers.
//!
//! Appends land in an in-memory [`LeafTree`] buffer. When the buffer
//! crosses the size trigger, or the rollover interval elapses with data
//! buffered, the buffer is atomically swapped for a fresh one and the
//! frozen tree is handed to a single background worker, which writes it as
//! an immutable staging file under rollover-log protection: the log entry
//! is created `Pending` before the file is written and committed strictly
//! after the file's durable flush.
//!
//! Appends are bounded by a backpressure ceiling: while buffered plus
//! in-flight bytes reach the effective maximum, `append` blocks until a
//! completing rollover frees capacity. Worker I/O errors are not retried;
//! they are recorded and surfaced on the next `append`, `flush`,
//! `wait_idle`, or `shutdown` call. Scans are never served from the live
//! buffer; readers consume committed staging files only.

use std::fs;
use std::mem;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::staging::file::write_staging_file;
use crate::staging::log::RolloverLog;
use crate::staging::settings::FirstStageWriterSettings;
use crate::tree::leaf::{InsertOutcome, LeafTree};
use crate::tree::record::{Key, Record};

/// Why a buffer was frozen and handed to the rollover worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverReason {
    /// The buffer reached the rollover size trigger.
    SizeExceeded,
    /// The rollover interval elapsed with data buffered.
    TimeElapsed,
    /// An explicit `flush` or `shutdown` request.
    Manual,
}

/// Worker wake-up period for the time trigger.
const WORKER_TICK: Duration = Duration::from_millis(250);

enum Job<K: Key, V: Record> {
    Rollover(LeafTree<K, V>, RolloverReason),
    Shutdown,
}

struct State<K: Key, V: Record> {
    buffer: LeafTree<K, V>,
    in_flight_bytes: u64,
    in_flight_count: u32,
    last_rollover: Instant,
    worker_error: Option<Error>,
    shutdown: bool,
}

struct Shared<K: Key, V: Record> {
    state: Mutex<State<K, V>>,
    /// Signaled when a completing rollover frees in-flight capacity.
    capacity: Condvar,
    /// Signaled when the in-flight count drops to zero.
    idle: Condvar,
    log: RolloverLog,
    settings: FirstStageWriterSettings,
}

impl<K: Key, V: Record> Shared<K, V> {
    fn buffered_bytes(state: &State<K, V>) -> u64 {
        if state.buffer.is_empty() {
            0
        } else {
            state.buffer.size_bytes() as u64
        }
    }

    /// Swaps a fresh buffer in under the lock and returns the frozen tree,
    /// or `None` when the buffer is empty. Appends never observe a
    /// half-swapped state.
    fn freeze(
        &self,
        state: &mut State<K, V>,
        reason: RolloverReason,
    ) -> Result<Option<LeafTree<K, V>>> {
        state.last_rollover = Instant::now();
        if state.buffer.is_empty() {
            return Ok(None);
        }
        let fresh = LeafTree::new(self.settings.block_size())?;
        let frozen = mem::replace(&mut state.buffer, fresh);
        state.in_flight_bytes += frozen.size_bytes() as u64;
        state.in_flight_count += 1;
        debug!(
            ?reason,
            entries = frozen.len(),
            bytes = frozen.size_bytes(),
            "buffer frozen for rollover"
        );
        Ok(Some(frozen))
    }

    /// Serializes one frozen tree: pending log entry, staging file, durable
    /// flush, commit. The log entry and the staging file share one GUID.
    fn persist(&self, tree: &LeafTree<K, V>, reason: RolloverReason) -> Result<()> {
        let id = Uuid::new_v4();
        let path = self.settings.staging().file_name(id);
        self.log.create_pending(id, path.clone())?;
        write_staging_file(tree, &path)?;
        self.log.commit(id)?;
        info!(
            %id,
            ?reason,
            entries = tree.len(),
            path = %path.display(),
            "rollover complete"
        );
        Ok(())
    }

    /// Runs one rollover on the worker thread and settles the in-flight
    /// accounting, recording any failure for the next foreground call.
    fn run_rollover(&self, tree: LeafTree<K, V>, reason: RolloverReason) {
        let bytes = tree.size_bytes() as u64;
        let result = self.persist(&tree, reason);
        let mut state = self.state.lock().unwrap();
        state.in_flight_bytes -= bytes;
        state.in_flight_count -= 1;
        if let Err(err) = result {
            error!(%err, "rollover failed");
            state.worker_error = Some(err);
        }
        self.capacity.notify_all();
        if state.in_flight_count == 0 {
            self.idle.notify_all();
        }
    }
}

fn worker_loop<K, V>(shared: Arc<Shared<K, V>>, rx: mpsc::Receiver<Job<K, V>>)
where
    K: Key,
    V: Record,
{
    loop {
        match rx.recv_timeout(WORKER_TICK) {
            Ok(Job::Rollover(tree, reason)) => shared.run_rollover(tree, reason),
            Ok(Job::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                // Time trigger: quiet periods still roll a non-empty
                // buffer over once the interval elapses.
                let frozen = {
                    let mut state = shared.state.lock().unwrap();
                    if state.buffer.is_empty()
                        || state.last_rollover.elapsed() < shared.settings.rollover_interval()
                    {
                        None
                    } else {
                        match shared.freeze(&mut state, RolloverReason::TimeElapsed) {
                            Ok(frozen) => frozen,
                            Err(err) => {
                                state.worker_error = Some(err);
                                None
                            }
                        }
                    }
                };
                if let Some(tree) = frozen {
                    shared.run_rollover(tree, RolloverReason::TimeElapsed);
                }
            }
        }
    }
    debug!("rollover worker stopped");
}

/// Buffered, rollover-driven ingestion front of the historian write path.
///
/// The historian instantiation is
/// `FirstStageWriter<SampleKey, SampleValue>`; any fixed-width record
/// shapes plug in the same way.
pub struct FirstStageWriter<K: Key + Send + 'static, V: Record + Send + 'static> {
    shared: Arc<Shared<K, V>>,
    tx: mpsc::Sender<Job<K, V>>,
    worker: Option<JoinHandle<()>>,
}

impl<K: Key + Send + 'static, V: Record + Send + 'static> FirstStageWriter<K, V> {
    /// Starts a writer over its own settings snapshot, creating the staging
    /// directory and rollover log as configured.
    pub fn new(settings: FirstStageWriterSettings) -> Result<Self> {
        fs::create_dir_all(settings.staging().directory())?;
        let log = RolloverLog::new(settings.log().clone())?;
        let buffer = LeafTree::new(settings.block_size())?;

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                buffer,
                in_flight_bytes: 0,
                in_flight_count: 0,
                last_rollover: Instant::now(),
                worker_error: None,
                shutdown: false,
            }),
            capacity: Condvar::new(),
            idle: Condvar::new(),
            log,
            settings,
        });
        let (tx, rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("tidemark-rollover".to_string())
            .spawn(move || worker_loop(worker_shared, rx))?;

        Ok(Self {
            shared,
            tx,
            worker: Some(worker),
        })
    }

    /// Appends one record, blocking while the backpressure ceiling is
    /// reached. Returns [`InsertOutcome::DuplicateKey`] without buffering
    /// anything when the key already exists in the live buffer.
    pub fn append(&mut self, key: K, value: V) -> Result<InsertOutcome> {
        let mut state = self.lock_checked()?;

        let ceiling = self.shared.settings.effective_maximum_allowed_bytes();
        while Shared::buffered_bytes(&state) + state.in_flight_bytes >= ceiling {
            if state.in_flight_count == 0 {
                self.send_rollover(&mut state, RolloverReason::SizeExceeded)?;
                continue;
            }
            state = self.shared.capacity.wait(state).unwrap();
            if let Some(err) = state.worker_error.take() {
                return Err(err);
            }
            if state.shutdown {
                return Err(Error::Shutdown);
            }
        }

        let outcome = state.buffer.insert(key, value)?;
        if outcome == InsertOutcome::Inserted {
            // Size first, then time; at most one rollover per append.
            if Shared::buffered_bytes(&state) >= self.shared.settings.rollover_size_bytes() {
                self.send_rollover(&mut state, RolloverReason::SizeExceeded)?;
            } else if state.last_rollover.elapsed() >= self.shared.settings.rollover_interval() {
                self.send_rollover(&mut state, RolloverReason::TimeElapsed)?;
            }
        }
        Ok(outcome)
    }

    /// Rolls a non-empty buffer over immediately. A no-op on an empty
    /// buffer.
    pub fn flush(&mut self) -> Result<()> {
        let mut state = self.lock_checked()?;
        self.send_rollover(&mut state, RolloverReason::Manual)
    }

    /// Blocks until no rollover is queued or running. Bounded, since
    /// buffered data is bounded by the backpressure ceiling.
    pub fn wait_idle(&self) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        while state.in_flight_count > 0 {
            state = self.shared.idle.wait(state).unwrap();
        }
        match state.worker_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Flushes any buffered data, stops the worker, and surfaces any
    /// deferred rollover error. Further appends fail with
    /// [`Error::Shutdown`].
    pub fn shutdown(&mut self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.shutdown {
                state.shutdown = true;
                if let Some(frozen) = self.shared.freeze(&mut state, RolloverReason::Manual)? {
                    // Queued ahead of Shutdown, so the worker still
                    // processes it.
                    let _ = self.tx.send(Job::Rollover(frozen, RolloverReason::Manual));
                }
            }
        }
        let _ = self.tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.shared.capacity.notify_all();
        let mut state = self.shared.state.lock().unwrap();
        match state.worker_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The rollover log tracking this writer's staging files.
    pub fn log(&self) -> &RolloverLog {
        &self.shared.log
    }

    /// Settings snapshot the writer runs with.
    pub fn settings(&self) -> &FirstStageWriterSettings {
        &self.shared.settings
    }

    /// Number of records currently buffered.
    pub fn buffered_len(&self) -> u64 {
        self.shared.state.lock().unwrap().buffer.len()
    }

    /// Bytes in flight to staging files, across queued and running
    /// rollovers.
    pub fn in_flight_bytes(&self) -> u64 {
        self.shared.state.lock().unwrap().in_flight_bytes
    }

    fn lock_checked(&self) -> Result<MutexGuard<'_, State<K, V>>> {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return Err(Error::Shutdown);
        }
        if let Some(err) = state.worker_error.take() {
            return Err(err);
        }
        Ok(state)
    }

    fn send_rollover(&self, state: &mut State<K, V>, reason: RolloverReason) -> Result<()> {
        if let Some(frozen) = self.shared.freeze(state, reason)? {
            self.tx
                .send(Job::Rollover(frozen, reason))
                .map_err(|_| Error::Shutdown)?;
        }
        Ok(())
    }
}

impl<K: Key + Send + 'static, V: Record + Send + 'static> Drop for FirstStageWriter<K, V> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.shutdown() {
                error!(%err, "first-stage writer shutdown on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::record::{SampleKey, SampleValue};
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> FirstStageWriterSettings {
        let mut settings = FirstStageWriterSettings::new(dir.path().join("stage")).unwrap();
        settings
            .log_mut()
            .set_log_path(dir.path().join("logs"))
            .unwrap();
        settings.set_block_size(512);
        settings
    }

    fn writer(dir: &TempDir) -> FirstStageWriter<SampleKey, SampleValue> {
        FirstStageWriter::new(settings(dir)).unwrap()
    }

    #[test]
    fn test_append_and_duplicate() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir);
        assert_eq!(
            writer
                .append(SampleKey::new(1, 1), SampleValue::new(0, 1.0))
                .unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            writer
                .append(SampleKey::new(1, 1), SampleValue::new(0, 2.0))
                .unwrap(),
            InsertOutcome::DuplicateKey
        );
        assert_eq!(writer.buffered_len(), 1);
        writer.shutdown().unwrap();
    }

    #[test]
    fn test_flush_writes_a_committed_staging_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir);
        for n in 0..100u64 {
            writer
                .append(SampleKey::new(n, 1), SampleValue::new(0, n as f64))
                .unwrap();
        }
        writer.flush().unwrap();
        writer.wait_idle().unwrap();

        assert_eq!(writer.buffered_len(), 0);
        assert_eq!(writer.in_flight_bytes(), 0);
        let committed = writer.log().committed();
        assert_eq!(committed.len(), 1);
        assert!(committed[0].staging_file().exists());
        writer.shutdown().unwrap();
    }

    #[test]
    fn test_flush_of_empty_buffer_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir);
        writer.flush().unwrap();
        writer.wait_idle().unwrap();
        assert!(writer.log().committed().is_empty());
        writer.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_flushes_and_rejects_further_appends() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir);
        writer
            .append(SampleKey::new(7, 7), SampleValue::new(0, 7.0))
            .unwrap();
        writer.shutdown().unwrap();

        assert_eq!(writer.log().committed().len(), 1);
        let err = writer
            .append(SampleKey::new(8, 8), SampleValue::new(0, 8.0))
            .unwrap_err();
        assert!(matches!(err, Error::Shutdown));
    }

    #[test]
    fn test_time_trigger_rolls_a_quiet_buffer() {
        let dir = TempDir::new().unwrap();
        let mut config = settings(&dir);
        config.set_rollover_interval_ms(1_000);
        let mut writer: FirstStageWriter<SampleKey, SampleValue> =
            FirstStageWriter::new(config).unwrap();

        writer
            .append(SampleKey::new(1, 1), SampleValue::new(0, 1.0))
            .unwrap();
        std::thread::sleep(Duration::from_millis(1_800));
        writer.wait_idle().unwrap();

        assert_eq!(writer.buffered_len(), 0);
        assert_eq!(writer.log().committed().len(), 1);
        writer.shutdown().unwrap();
    }
}
