//! Completion marker store.
//!
//! The marker's presence is the only persisted archival state. Its content
//! is diagnostic.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionMarker {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl CompletionMarker {
    pub fn render(&self) -> String {
        format!(
            "Backup written to tape\nStart: {}\nEnd: {}\n",
            self.started_at.to_rfc3339(),
            self.finished_at.to_rfc3339()
        )
    }
}

pub fn marker_path(stanza_dir: &Path, marker_name: &str) -> PathBuf {
    stanza_dir.join(marker_name)
}

pub fn is_archived(stanza_dir: &Path, marker_name: &str) -> bool {
    marker_path(stanza_dir, marker_name).exists()
}

/// Write the completion marker exactly once.
///
/// Content lands in a hidden sibling first and is hard-linked to the final
/// name, so readers either see no marker or a complete one. Linking fails
/// with `AlreadyExists` when a marker is already present.
pub fn commit(stanza_dir: &Path, marker_name: &str, marker: &CompletionMarker) -> Result<PathBuf> {
    let final_path = marker_path(stanza_dir, marker_name);
    let tmp_path = stanza_dir.join(format!(".{marker_name}.{}.tmp", std::process::id()));

    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(marker.render().as_bytes())?;
        file.sync_all()?;
    }

    let linked = match fs::hard_link(&tmp_path, &final_path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(err),
        // Filesystems without hard links: fall back to rename after a
        // last existence check.
        Err(_) if !final_path.exists() => fs::rename(&tmp_path, &final_path),
        Err(err) => Err(err),
    };

    if tmp_path.exists() {
        let _ = fs::remove_file(&tmp_path);
    }
    linked?;

    Ok(final_path)
}
