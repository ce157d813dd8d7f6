//! Log lifecycle: size rotation, gzip compression, age-based retention and
//! removal of empty logs. Nothing here is fatal to a run.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use flate2::{write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::LoggingSection;

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub failed: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub compressed: usize,
    pub expired: SweepReport,
    pub empty: SweepReport,
}

/// Rename `path` aside when it has reached `max_bytes`.
///
/// The suffix is one past the highest suffix already used by a rotated or
/// compressed sibling, so it never collides and never goes backwards.
pub fn rotate_if_oversized(path: &Path, max_bytes: u64) -> io::Result<Option<PathBuf>> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    if meta.len() < max_bytes {
        return Ok(None);
    }

    let next = highest_rotation_suffix(path)? + 1;
    let rotated = with_suffix(path, &next.to_string());
    fs::rename(path, &rotated)?;
    Ok(Some(rotated))
}

fn highest_rotation_suffix(path: &Path) -> io::Result<u64> {
    let (Some(dir), Some(base)) = (path.parent(), path.file_name().and_then(|n| n.to_str()))
    else {
        return Ok(0);
    };
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    let prefix = format!("{base}.");

    let mut highest = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(n) = name
            .strip_prefix(&prefix)
            .map(|rest| rest.strip_suffix(".gz").unwrap_or(rest))
            .and_then(|digits| digits.parse::<u64>().ok())
        {
            highest = highest.max(n);
        }
    }
    Ok(highest)
}

/// Gzip `path` into `<path>.gz`, removing the source only once the
/// compressed copy is complete.
pub fn compress_file(path: &Path) -> io::Result<PathBuf> {
    let gz_path = with_suffix(path, "gz");
    let result = (|| {
        let mut reader = BufReader::new(File::open(path)?);
        let out = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&gz_path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer.get_ref().sync_all()
    })();

    match result {
        Ok(()) => {
            fs::remove_file(path)?;
            Ok(gz_path)
        }
        Err(err) => {
            if err.kind() != io::ErrorKind::AlreadyExists {
                let _ = fs::remove_file(&gz_path);
            }
            Err(err)
        }
    }
}

/// Compress every rotated-aside file (`<name>.<n>`) left in `dir`.
pub fn compress_rotated(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cannot list log directory");
            return 0;
        }
    };

    let mut compressed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || !is_rotated_name(&path) {
            continue;
        }
        match compress_file(&path) {
            Ok(gz) => {
                info!(from = %path.display(), to = %gz.display(), "archived rotated log");
                compressed += 1;
            }
            Err(err) => {
                error!(file = %path.display(), error = %err, "cannot compress rotated log");
            }
        }
    }
    compressed
}

fn is_rotated_name(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    !ext.is_empty()
        && ext.bytes().all(|b| b.is_ascii_digit())
        && path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| stem.ends_with(".log"))
}

/// Delete regular files in `dir` whose age in whole days exceeds
/// `retention_days`. Per-file failures are logged and counted.
pub fn expire_old_files(dir: &Path, retention_days: u64, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cannot list log directory");
            return report;
        }
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let Ok(modified) = meta.modified() else { continue };
        let age_days = now
            .duration_since(modified)
            .unwrap_or(Duration::ZERO)
            .as_secs()
            / SECS_PER_DAY;
        if age_days <= retention_days {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(file = %path.display(), age_days, "expired log removed");
                report.deleted += 1;
            }
            Err(err) => {
                error!(file = %path.display(), error = %err, "cannot remove expired log");
                report.failed += 1;
            }
        }
    }

    if report.deleted > 0 {
        info!(dir = %dir.display(), deleted = report.deleted, "deleted old logs");
    }
    report
}

/// Delete zero-byte `*.log` files in `dir`, whatever their age.
pub fn prune_empty_logs(dir: &Path) -> SweepReport {
    let mut report = SweepReport::default();
    let Ok(entries) = fs::read_dir(dir) else {
        return report;
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let empty = entry
            .metadata()
            .map(|m| m.is_file() && m.len() == 0)
            .unwrap_or(false);
        if !empty {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(file = %path.display(), "deleted empty log file");
                report.deleted += 1;
            }
            Err(err) => {
                error!(file = %path.display(), error = %err, "cannot remove empty log file");
                report.failed += 1;
            }
        }
    }
    report
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".");
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Applies the whole lifecycle to a set of log directories.
#[derive(Debug, Clone)]
pub struct Housekeeper {
    dirs: Vec<PathBuf>,
    retention_days: u64,
    cleanup_enabled: bool,
}

impl Housekeeper {
    pub fn new(dirs: Vec<PathBuf>, retention_days: u64, cleanup_enabled: bool) -> Self {
        let mut unique: Vec<PathBuf> = Vec::new();
        for dir in dirs {
            if !unique.contains(&dir) {
                unique.push(dir);
            }
        }
        Self {
            dirs: unique,
            retention_days,
            cleanup_enabled,
        }
    }

    pub fn from_config(logging: &LoggingSection) -> Self {
        Self::new(
            vec![logging.log_dir.clone(), logging.agent_log_dir.clone()],
            logging.retention_days,
            logging.cleanup_enabled,
        )
    }

    pub fn run(&self, now: SystemTime) -> HousekeepingReport {
        let mut report = HousekeepingReport::default();
        for dir in &self.dirs {
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "log directory missing; nothing to do");
                continue;
            }
            report.compressed += compress_rotated(dir);
            report.empty.merge(prune_empty_logs(dir));
            if self.cleanup_enabled {
                report
                    .expired
                    .merge(expire_old_files(dir, self.retention_days, now));
            } else {
                debug!(dir = %dir.display(), "automatic log cleanup disabled");
            }
        }
        info!(
            compressed = report.compressed,
            expired = report.expired.deleted,
            empty_removed = report.empty.deleted,
            failures = report.expired.failed + report.empty.failed,
            "housekeeping finished"
        );
        report
    }
}
