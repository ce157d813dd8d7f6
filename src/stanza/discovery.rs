//! Stanza discovery: walk the search root and build the archival queue.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{config::FailureScope, Error, Result};

use super::{marker, read_replication_status, ReplicationStatus, Stanza};

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub status_marker: String,
    pub completion_marker: String,
    pub exclude: Vec<Pattern>,
    pub failure_scope: FailureScope,
}

impl DiscoveryOptions {
    pub fn new(status_marker: impl Into<String>, completion_marker: impl Into<String>) -> Self {
        Self {
            status_marker: status_marker.into(),
            completion_marker: completion_marker.into(),
            exclude: Vec::new(),
            failure_scope: FailureScope::Unit,
        }
    }

    pub fn with_exclude<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in patterns {
            let raw = raw.as_ref();
            let pattern = Pattern::new(raw)
                .map_err(|e| Error::Config(format!("invalid exclude pattern {raw:?}: {e}")))?;
            self.exclude.push(pattern);
        }
        Ok(self)
    }

    pub fn with_failure_scope(mut self, scope: FailureScope) -> Self {
        self.failure_scope = scope;
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|p| p.matches_path(path))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub archived: usize,
    pub excluded_by_repository: usize,
    pub queued: usize,
}

impl DiscoverySummary {
    /// Candidates that will not be handed to the archival agent.
    pub fn skipped(&self) -> usize {
        self.total - self.queued
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discovery {
    pub queue: Vec<Stanza>,
    pub summary: DiscoverySummary,
}

/// Walk `root` and return the stanzas eligible for archival, in walk order.
///
/// Read-only: nothing under `root` is created, modified or removed.
/// Unreadable directories are skipped with a warning.
pub fn discover(root: &Path, opts: &DiscoveryOptions) -> Discovery {
    let mut candidates: Vec<(Stanza, bool)> = Vec::new();
    let mut summary = DiscoverySummary::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !opts.is_excluded(entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                warn!(path = %path, error = %err, "skipping unreadable path during discovery");
                continue;
            }
        };

        if !entry.file_type().is_file() || entry.file_name() != opts.status_marker.as_str() {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };

        summary.total += 1;
        let replication = read_replication_status(entry.path());
        match replication {
            ReplicationStatus::Completed => summary.completed += 1,
            ReplicationStatus::Failed => summary.failed += 1,
            ReplicationStatus::Pending => summary.pending += 1,
        }

        let archived = marker::is_archived(dir, &opts.completion_marker);
        if archived {
            summary.archived += 1;
        }
        candidates.push((Stanza::new(root, dir, replication), archived));
    }

    let failed_repositories: HashSet<PathBuf> = match opts.failure_scope {
        FailureScope::Unit => HashSet::new(),
        FailureScope::Repository => candidates
            .iter()
            .filter(|(s, _)| s.replication == ReplicationStatus::Failed)
            .map(|(s, _)| s.repository.clone())
            .collect(),
    };
    for repo in &failed_repositories {
        info!(repository = %repo.display(), "skipping entire repository: at least one failed replication");
    }

    let mut queue = Vec::new();
    for (stanza, archived) in candidates {
        if archived {
            info!(stanza = %stanza.path.display(), "stanza already archived");
            continue;
        }
        if !stanza.replication.is_completed() {
            debug!(stanza = %stanza.path.display(), status = %stanza.replication, "stanza not ready");
            continue;
        }
        if failed_repositories.contains(&stanza.repository) {
            summary.excluded_by_repository += 1;
            continue;
        }
        info!(stanza = %stanza.path.display(), repository = %stanza.repository.display(), "stanza queued");
        queue.push(stanza);
    }
    summary.queued = queue.len();

    info!(
        total = summary.total,
        completed = summary.completed,
        failed = summary.failed,
        pending = summary.pending,
        archived = summary.archived,
        excluded_by_repository = summary.excluded_by_repository,
        queued = summary.queued,
        "RESULTS: discovery finished"
    );

    Discovery { queue, summary }
}
