use std::{fmt, fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::error;

/// Replication state reported by the upstream rsync job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationStatus {
    Completed,
    Failed,
    /// Neither completed nor failed: still running, empty or unrecognised.
    Pending,
}

impl ReplicationStatus {
    /// Classify marker content. "failed" wins over "complete" so a marker
    /// mentioning both never lets a stanza through.
    pub fn classify(content: &str) -> Self {
        let lowered = content.trim().to_lowercase();
        if lowered.contains("failed") {
            Self::Failed
        } else if lowered.contains("complete") {
            Self::Completed
        } else {
            Self::Pending
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Pending => "pending",
        };
        f.write_str(s)
    }
}

/// Read and classify a status marker. An unreadable marker is reported as
/// failed, never completed.
pub fn read_replication_status(marker: &Path) -> ReplicationStatus {
    match fs::read(marker) {
        Ok(bytes) => ReplicationStatus::classify(&String::from_utf8_lossy(&bytes)),
        Err(err) => {
            error!(marker = %marker.display(), error = %err, "cannot read replication status");
            ReplicationStatus::Failed
        }
    }
}
