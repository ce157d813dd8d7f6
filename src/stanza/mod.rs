//! Stanza domain module.
//!
//! A stanza is one rsync-replicated backup directory awaiting archival. This
//! module classifies the upstream replication marker, tracks the completion
//! marker written after a successful archival, and walks the search root to
//! build the processing queue.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod discovery;
pub mod marker;
pub mod status;

pub use discovery::{discover, Discovery, DiscoveryOptions, DiscoverySummary};
pub use marker::{commit, is_archived, CompletionMarker};
pub use status::{read_replication_status, ReplicationStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stanza {
    /// Top-level directory below the search root holding this stanza.
    pub repository: PathBuf,
    /// Stanza path relative to its repository, `.` when they coincide.
    pub name: String,
    /// Absolute path of the stanza directory (the one holding the status marker).
    pub path: PathBuf,
    pub replication: ReplicationStatus,
}

impl Stanza {
    pub fn new(root: &Path, path: &Path, replication: ReplicationStatus) -> Self {
        let repository = repository_of(root, path);
        let name = match path.strip_prefix(&repository) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        };
        Self {
            repository,
            name,
            path: path.to_path_buf(),
            replication,
        }
    }

    /// Paths handed to the archival agent for this stanza.
    pub fn archive_paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    /// Identifier safe to embed in a file name.
    pub fn log_id(&self) -> String {
        let joined = if self.name == "." {
            self.repository.to_string_lossy().into_owned()
        } else {
            format!("{}/{}", self.repository.to_string_lossy(), self.name)
        };
        sanitize_file_component(&joined)
    }
}

/// Replace path separators and whitespace so the result is a single file name
/// component, trimming leading separators.
pub fn sanitize_file_component(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_whitespace() {
                '-'
            } else {
                c
            }
        })
        .collect();
    replaced.trim_start_matches('-').to_string()
}

fn repository_of(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(root) {
        Ok(rel) => match rel.components().next() {
            Some(first) => root.join(first),
            None => root.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
