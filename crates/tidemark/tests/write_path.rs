//! Integration tests for the first-stage write path: append through
//! rollover to committed staging files, plus crash recovery through the
//! rollover log.

use std::collections::BTreeSet;
use std::path::Path;

use tempfile::TempDir;
use uuid::Uuid;

use tidemark::{
    Error, FirstStageWriter, FirstStageWriterSettings, RolloverLog, RolloverState, SampleKey,
    SampleValue, StagingFile,
};

fn make_settings(root: &Path) -> FirstStageWriterSettings {
    let mut settings = FirstStageWriterSettings::new(root.join("stage")).unwrap();
    settings.log_mut().set_log_path(root.join("logs")).unwrap();
    settings.set_block_size(512);
    settings.set_rollover_size_mb(1);
    settings.set_maximum_allowed_mb(1);
    // Keep the time trigger out of these tests.
    settings.set_rollover_interval_ms(60_000);
    settings
}

fn append_samples(
    writer: &mut FirstStageWriter<SampleKey, SampleValue>,
    range: std::ops::Range<u64>,
) {
    for n in range {
        writer
            .append(SampleKey::new(n, 1), SampleValue::new(0, n as f64))
            .unwrap();
    }
}

/// Parses the GUID out of a `[prefix " "] GUID extension` file name.
fn generation_id(path: &Path, prefix: &str, extension: &str) -> Uuid {
    let name = path.file_name().unwrap().to_str().unwrap();
    let stem = name
        .strip_prefix(&format!("{prefix} "))
        .unwrap_or_else(|| panic!("{name} does not carry the {prefix:?} prefix"));
    let stem = stem
        .strip_suffix(extension)
        .unwrap_or_else(|| panic!("{name} does not carry the {extension:?} extension"));
    Uuid::parse_str(stem).unwrap_or_else(|_| panic!("{name} does not carry a GUID"))
}

#[test]
fn test_end_to_end_rollover_pipeline() {
    const TOTAL: u64 = 80_000;

    let root = TempDir::new().unwrap();
    let settings = make_settings(root.path());
    let mut writer: FirstStageWriter<SampleKey, SampleValue> =
        FirstStageWriter::new(settings.clone()).unwrap();

    // Roughly 2.5 MiB of tree against a 1 MiB rollover trigger and a 1 MiB
    // backpressure ceiling, so appends cross both at least once.
    append_samples(&mut writer, 0..TOTAL);
    writer.flush().unwrap();
    writer.wait_idle().unwrap();

    assert_eq!(writer.buffered_len(), 0);
    assert_eq!(writer.in_flight_bytes(), 0);
    assert!(writer.log().pending().is_empty());

    let committed = writer.log().committed();
    assert!(committed.len() >= 2, "expected multiple rollovers");

    // Every staging file carries the GUID of its log entry.
    for entry in &committed {
        assert_eq!(
            generation_id(entry.staging_file(), "Stage1", ".stage1"),
            entry.id()
        );
    }

    // The union of all committed staging files is exactly the appended data.
    let mut recovered_keys = BTreeSet::new();
    let mut total_records = 0u64;
    for entry in &committed {
        let staging: StagingFile<SampleKey, SampleValue> =
            StagingFile::open(entry.staging_file()).unwrap();
        total_records += staging.len();
        for item in staging.iter() {
            let (key, value) = item.unwrap();
            assert_eq!(value, SampleValue::new(0, key.timestamp as f64));
            assert!(recovered_keys.insert(key), "key {key:?} appears twice");
        }
    }
    assert_eq!(total_records, TOTAL);
    assert_eq!(
        recovered_keys.iter().map(|k| k.timestamp).collect::<Vec<_>>(),
        (0..TOTAL).collect::<Vec<_>>()
    );

    writer.shutdown().unwrap();
}

#[test]
fn test_size_trigger_fires_once_past_threshold() {
    const TOTAL: u64 = 20_000;

    let root = TempDir::new().unwrap();
    let mut writer: FirstStageWriter<SampleKey, SampleValue> =
        FirstStageWriter::new(make_settings(root.path())).unwrap();

    append_samples(&mut writer, 0..TOTAL);
    writer.wait_idle().unwrap();

    let committed = writer.log().committed();
    assert_eq!(committed.len(), 1, "expected exactly one size rollover");

    let staging: StagingFile<SampleKey, SampleValue> =
        StagingFile::open(committed[0].staging_file()).unwrap();
    assert_eq!(staging.len() + writer.buffered_len(), TOTAL);

    writer.shutdown().unwrap();
}

#[test]
fn test_backpressure_blocks_until_in_flight_drains() {
    const TOTAL: u64 = 15_000;

    let root = TempDir::new().unwrap();
    let mut writer: FirstStageWriter<SampleKey, SampleValue> =
        FirstStageWriter::new(make_settings(root.path())).unwrap();

    // Past the 1 MiB rollover trigger: the frozen buffer alone reaches the
    // 1 MiB ceiling.
    append_samples(&mut writer, 0..TOTAL);
    let rolled = writer.in_flight_bytes() > 0 || !writer.log().committed().is_empty();
    assert!(rolled, "size trigger never froze the buffer");

    // With the whole ceiling in flight, this append may only proceed once
    // the rollover completes and frees the capacity, so its return proves
    // the in-flight bytes drained.
    writer
        .append(SampleKey::new(TOTAL, 1), SampleValue::new(0, TOTAL as f64))
        .unwrap();
    assert_eq!(writer.in_flight_bytes(), 0);
    assert_eq!(writer.log().committed().len(), 1);
    assert!(writer.log().pending().is_empty());

    writer.shutdown().unwrap();
}

#[test]
fn test_rollover_failure_surfaces_to_a_later_append() {
    let root = TempDir::new().unwrap();
    let mut writer: FirstStageWriter<SampleKey, SampleValue> =
        FirstStageWriter::new(make_settings(root.path())).unwrap();

    // With the staging directory gone, the next rollover cannot create its
    // file; the failure must reach a foreground append, including one
    // blocked on the backpressure ceiling.
    std::fs::remove_dir_all(root.path().join("stage")).unwrap();

    let mut failed = None;
    for n in 0..30_000u64 {
        if let Err(err) = writer.append(SampleKey::new(n, 1), SampleValue::new(0, n as f64)) {
            failed = Some(err);
            break;
        }
    }
    let err = failed.expect("rollover failure never surfaced to an append");
    assert!(matches!(err, Error::Io(_)));
    assert!(writer.log().committed().is_empty());
    assert_eq!(writer.in_flight_bytes(), 0);

    // The interrupted generation stays Pending in the log; nothing was
    // committed behind the failure.
    assert_eq!(writer.log().pending().len(), 1);
    writer.shutdown().unwrap();
}

#[test]
fn test_recovery_distinguishes_pending_from_committed() {
    let root = TempDir::new().unwrap();
    let settings = make_settings(root.path());

    // A clean run leaves committed entries behind.
    {
        let mut writer: FirstStageWriter<SampleKey, SampleValue> =
            FirstStageWriter::new(settings.clone()).unwrap();
        append_samples(&mut writer, 0..200);
        writer.flush().unwrap();
        writer.wait_idle().unwrap();
        writer.shutdown().unwrap();
    }

    let recovered = RolloverLog::recover(settings.log()).unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].state(), RolloverState::Committed);
    assert!(RolloverLog::recover_pending(settings.log())
        .unwrap()
        .is_empty());

    // The committed staging file survives recovery readable.
    let staging: StagingFile<SampleKey, SampleValue> =
        StagingFile::open(recovered[0].staging_file()).unwrap();
    assert_eq!(staging.len(), 200);

    // Simulate a crash mid-rollover: a Pending entry whose staging file
    // exists, and one whose staging file was never written.
    let log = RolloverLog::new(settings.log().clone()).unwrap();
    let interrupted = Uuid::new_v4();
    log.create_pending(interrupted, recovered[0].staging_file().clone())
        .unwrap();
    log.create_pending(Uuid::new_v4(), root.path().join("stage/never-written.stage1"))
        .unwrap();

    let pending = RolloverLog::recover_pending(settings.log()).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id(), interrupted);
    assert_eq!(pending[0].state(), RolloverState::Pending);
}
