//! Integration tests for log rotation, compression and retention.

use std::{
    fs,
    io::Read,
    time::{Duration, SystemTime},
};

use flate2::read::GzDecoder;
use lentochka::logging::housekeeping::{
    compress_file, compress_rotated, expire_old_files, prune_empty_logs, rotate_if_oversized,
};
use lentochka::logging::Housekeeper;
use tempfile::tempdir;

const DAY: Duration = Duration::from_secs(86_400);

#[test]
fn rotation_suffix_follows_highest_existing() -> lentochka::Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("lentochka.log");
    fs::write(&log, vec![b'x'; 64])?;
    fs::write(dir.path().join("lentochka.log.1"), "old")?;
    fs::write(dir.path().join("lentochka.log.3.gz"), "older")?;

    let rotated = rotate_if_oversized(&log, 32)?.expect("log is over the threshold");
    assert_eq!(dir.path().join("lentochka.log.4"), rotated);
    assert!(!log.exists());
    assert_eq!(64, fs::metadata(&rotated)?.len());
    Ok(())
}

#[test]
fn small_or_missing_log_is_not_rotated() -> lentochka::Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("lentochka.log");
    assert_eq!(None, rotate_if_oversized(&log, 32)?);

    fs::write(&log, "short")?;
    assert_eq!(None, rotate_if_oversized(&log, 32)?);
    assert!(log.exists());
    Ok(())
}

#[test]
fn compressed_log_decodes_to_original() -> lentochka::Result<()> {
    let dir = tempdir()?;
    let rotated = dir.path().join("lentochka.log.1");
    let body = "line one\nline two\n".repeat(100);
    fs::write(&rotated, &body)?;

    let gz = compress_file(&rotated)?;
    assert_eq!(dir.path().join("lentochka.log.1.gz"), gz);
    assert!(!rotated.exists());

    let mut decoded = String::new();
    GzDecoder::new(fs::File::open(&gz)?).read_to_string(&mut decoded)?;
    assert_eq!(body, decoded);
    Ok(())
}

#[test]
fn existing_archive_is_never_overwritten() -> lentochka::Result<()> {
    let dir = tempdir()?;
    let rotated = dir.path().join("lentochka.log.2");
    let gz = dir.path().join("lentochka.log.2.gz");
    fs::write(&rotated, "fresh")?;
    fs::write(&gz, "previous archive")?;

    assert!(compress_file(&rotated).is_err());
    assert!(rotated.exists());
    assert_eq!("previous archive", fs::read_to_string(&gz)?);
    Ok(())
}

#[test]
fn only_rotated_files_are_compressed() -> lentochka::Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("lentochka.log"), "live")?;
    fs::write(dir.path().join("lentochka.log.5"), "rotated")?;
    fs::write(dir.path().join("lentochka.log.4.gz"), "done")?;

    assert_eq!(1, compress_rotated(dir.path()));
    assert!(dir.path().join("lentochka.log").exists());
    assert!(dir.path().join("lentochka.log.5.gz").exists());
    assert!(!dir.path().join("lentochka.log.5").exists());
    Ok(())
}

#[test]
fn retention_deletes_only_files_past_the_cutoff() -> lentochka::Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("agent-a.log");
    fs::write(&log, "output")?;

    // Ten days later the file is within a 30 day window.
    let report = expire_old_files(dir.path(), 30, SystemTime::now() + 10 * DAY);
    assert_eq!(0, report.deleted);
    assert!(log.exists());

    // Exactly at the boundary the file is kept.
    let report = expire_old_files(dir.path(), 30, SystemTime::now() + 30 * DAY + DAY / 2);
    assert_eq!(0, report.deleted);
    assert!(log.exists());

    let report = expire_old_files(dir.path(), 30, SystemTime::now() + 32 * DAY);
    assert_eq!(1, report.deleted);
    assert_eq!(0, report.failed);
    assert!(!log.exists());
    Ok(())
}

#[test]
fn empty_logs_are_pruned_regardless_of_age() -> lentochka::Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("empty.log"), "")?;
    fs::write(dir.path().join("full.log"), "content")?;
    fs::write(dir.path().join("empty.txt"), "")?;

    let report = prune_empty_logs(dir.path());
    assert_eq!(1, report.deleted);
    assert!(!dir.path().join("empty.log").exists());
    assert!(dir.path().join("full.log").exists());
    assert!(dir.path().join("empty.txt").exists());
    Ok(())
}

#[test]
fn housekeeper_covers_every_directory() -> lentochka::Result<()> {
    let root = tempdir()?;
    let logs = root.path().join("logs");
    let agent = logs.join("agent");
    fs::create_dir_all(&agent)?;
    fs::write(logs.join("lentochka.log.1"), "rotated")?;
    fs::write(agent.join("agent-x.log"), "")?;
    fs::write(agent.join("agent-y.log"), "kept")?;

    let housekeeper = Housekeeper::new(vec![logs.clone(), agent.clone(), logs.clone()], 90, true);
    let report = housekeeper.run(SystemTime::now());

    assert_eq!(1, report.compressed);
    assert_eq!(1, report.empty.deleted);
    assert_eq!(0, report.expired.deleted);
    assert!(logs.join("lentochka.log.1.gz").exists());
    assert!(agent.join("agent-y.log").exists());
    Ok(())
}

#[test]
fn disabled_cleanup_keeps_old_files() -> lentochka::Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("agent-old.log");
    fs::write(&log, "output")?;

    let report = Housekeeper::new(vec![dir.path().to_path_buf()], 1, false)
        .run(SystemTime::now() + 10 * DAY);
    assert_eq!(0, report.expired.deleted);
    assert!(log.exists());
    Ok(())
}
