//! Per-run context: everything a run needs, built once at startup and passed
//! down explicitly.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::{
    archive::CommandTemplate,
    config::Config,
    metrics::MetricsSink,
    stanza::DiscoveryOptions,
    Result,
};

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub config: Config,
    pub template: CommandTemplate,
    pub metrics: MetricsSink,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(config: Config) -> Result<Self> {
        let template = CommandTemplate::parse(&config.archive.command_template)?;
        let metrics = MetricsSink::from_config(&config.monitoring);
        Ok(Self {
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            config,
            template,
            metrics,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn discovery_options(&self) -> Result<DiscoveryOptions> {
        let archive = &self.config.archive;
        Ok(
            DiscoveryOptions::new(&archive.status_marker, &archive.completion_marker)
                .with_exclude(&self.config.paths.exclude)?
                .with_failure_scope(archive.failure_scope),
        )
    }

    /// Flag shared with the signal handler; set once a stop was requested.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Timestamp used in per-run and per-stanza log file names.
    pub fn file_stamp(&self) -> String {
        self.started_at.format("%Y-%m-%d_%H-%M-%S").to_string()
    }
}
