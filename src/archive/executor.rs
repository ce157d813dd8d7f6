//! Archival execution controller.
//!
//! Runs the agent for each queued stanza, one at a time, and commits the
//! completion marker only after the agent exits with status 0.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn};

use crate::{
    context::RunContext,
    metrics::MetricStatus,
    stanza::{self, CompletionMarker, Discovery, Stanza},
    Result,
};

use super::command::AgentCommand;

const AGENT_LOG_ECHO_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Archived { marker: PathBuf, agent_log: PathBuf },
    /// A marker appeared between discovery and execution.
    AlreadyArchived,
    Failed {
        reason: String,
        agent_log: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct Archiver<'a> {
    ctx: &'a RunContext,
}

impl<'a> Archiver<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Process the discovery queue in order. A failing stanza never stops
    /// the run; a cancellation request stops it between stanzas.
    pub fn execute(&self, discovery: &Discovery) -> RunReport {
        let mut report = RunReport {
            skipped: discovery.summary.skipped(),
            ..RunReport::default()
        };

        for (idx, stanza) in discovery.queue.iter().enumerate() {
            if self.ctx.is_cancelled() {
                warn!(
                    remaining = discovery.queue.len() - idx,
                    "stop requested; leaving remaining stanzas for the next run"
                );
                report.cancelled = true;
                break;
            }

            match self.archive_stanza(stanza) {
                UnitOutcome::Archived { .. } => {
                    report.succeeded += 1;
                    self.ctx.metrics.send("processed_stanzas", 1, MetricStatus::Ok);
                }
                UnitOutcome::AlreadyArchived => report.skipped += 1,
                UnitOutcome::Failed { .. } => {
                    report.failed += 1;
                    self.ctx.metrics.send("failed_stanzas", 1, MetricStatus::Error);
                }
            }
        }

        info!(
            queued = discovery.queue.len(),
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "archival pass finished"
        );
        report
    }

    pub fn archive_stanza(&self, stanza: &Stanza) -> UnitOutcome {
        let span = info_span!("stanza", path = %stanza.path.display());
        let _enter = span.enter();

        let archive_cfg = &self.ctx.config.archive;
        if stanza::is_archived(&stanza.path, &archive_cfg.completion_marker) {
            info!("stanza archived concurrently; skipping");
            return UnitOutcome::AlreadyArchived;
        }
        if !stanza.path.is_dir() {
            error!("stanza directory vanished");
            return UnitOutcome::Failed {
                reason: "stanza directory does not exist".into(),
                agent_log: None,
            };
        }

        let started_at = Local::now();
        let command = self
            .ctx
            .template
            .render(&archive_cfg.agent, &stanza.archive_paths(), &stanza.name);
        let agent_log = self.agent_log_path(stanza, started_at);
        info!(command = %command, agent_log = %agent_log.display(), "starting archival agent");

        let status = match run_agent(&command, &agent_log, started_at) {
            Ok(status) => status,
            Err(err) => {
                error!(agent_log = %agent_log.display(), error = %err, "archival agent could not be run");
                echo_agent_log(&agent_log);
                return UnitOutcome::Failed {
                    reason: format!("launch failed: {err}"),
                    agent_log: agent_log.exists().then_some(agent_log),
                };
            }
        };

        if !status.success() {
            error!(
                status = %status,
                agent_log = %agent_log.display(),
                "archival agent failed; completion marker not written"
            );
            echo_agent_log(&agent_log);
            return UnitOutcome::Failed {
                reason: format!("agent exited with {status}"),
                agent_log: Some(agent_log),
            };
        }

        let marker = CompletionMarker {
            started_at,
            finished_at: Local::now(),
        };
        match stanza::commit(&stanza.path, &archive_cfg.completion_marker, &marker) {
            Ok(marker_path) => {
                info!(marker = %marker_path.display(), "stanza archived");
                UnitOutcome::Archived {
                    marker: marker_path,
                    agent_log,
                }
            }
            Err(err) => {
                error!(error = %err, "archival succeeded but the completion marker could not be written");
                UnitOutcome::Failed {
                    reason: format!("marker commit failed: {err}"),
                    agent_log: Some(agent_log),
                }
            }
        }
    }

    fn agent_log_path(&self, stanza: &Stanza, started_at: DateTime<Local>) -> PathBuf {
        self.ctx.config.logging.agent_log_dir.join(format!(
            "agent-{}-{}.log",
            stanza.log_id(),
            started_at.format("%Y-%m-%d_%H-%M-%S")
        ))
    }
}

/// Spawn the agent with stdout and stderr appended to `log_path` and wait
/// for it. Launch failures are recorded in the log before being returned.
fn run_agent(command: &AgentCommand, log_path: &Path, started_at: DateTime<Local>) -> Result<ExitStatus> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(log, "# command: {command}")?;
    writeln!(log, "# started: {}", started_at.to_rfc3339())?;

    let spawned = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log.try_clone()?))
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            write_trailer(&mut log, &format!("launch error: {err}"));
            return Err(err.into());
        }
    };

    let status = match child.wait() {
        Ok(status) => status,
        Err(err) => {
            write_trailer(&mut log, &format!("wait error: {err}"));
            return Err(err.into());
        }
    };
    write_trailer(&mut log, &status.to_string());
    Ok(status)
}

/// Copy the end of a failed unit's agent log into the run log.
fn echo_agent_log(agent_log: &Path) {
    match fs::read_to_string(agent_log) {
        Ok(content) => {
            for line in tail_lines(&content, AGENT_LOG_ECHO_LINES) {
                error!(agent_log = %agent_log.display(), "agent: {line}");
            }
        }
        Err(err) => warn!(agent_log = %agent_log.display(), error = %err, "cannot read agent log"),
    }
}

fn tail_lines(content: &str, max: usize) -> impl Iterator<Item = &str> {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(max);
    lines.into_iter().skip(skip)
}

fn write_trailer(log: &mut File, outcome: &str) {
    let _ = writeln!(log, "# finished: {} ({outcome})", Local::now().to_rfc3339());
}
