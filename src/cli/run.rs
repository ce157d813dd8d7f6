//! Implementation of `lentochka run`.

use std::{fs, io, path::PathBuf, sync::atomic::Ordering, time::SystemTime};

use clap::Args;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    archive::{resolve_program, Archiver, RunReport},
    config::ExitPolicy,
    context::RunContext,
    lock::ProcessLock,
    logging::{
        self, housekeeping, Housekeeper, LogFormat, LogSink, LoggingConfig, GLOBAL_LOG_FILE,
    },
    metrics::MetricStatus,
    stanza, Error, Result,
};

use super::ConfigArgs;

#[derive(Debug, Clone, Args, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Discover and report, but do not invoke the archival agent
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

pub fn execute(args: RunArgs) -> Result<()> {
    let config = args.config.load()?;
    let ctx = RunContext::new(config)?;

    let rotation = prepare_logs(&ctx)?;
    let global_log = ctx.config.logging.log_dir.join(GLOBAL_LOG_FILE);
    let run_log = logging::run_log_path(&ctx.config.logging.log_dir, &ctx.file_stamp());
    logging::init_logging(LoggingConfig {
        format: log_format(&ctx),
        sink: LogSink::ConsoleAndFiles(vec![global_log.clone(), run_log.clone()]),
        level: ctx.config.logging.level.clone(),
    })?;

    let span = info_span!("run", run_id = %ctx.run_id);
    let _enter = span.enter();
    info!(run_log = %run_log.display(), "lentochka run started");
    finish_rotation(rotation);
    install_stop_handler(&ctx);

    let report = match run_with_context(&ctx, args.dry_run) {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "run aborted");
            ctx.metrics.send("script_error", 1, MetricStatus::Error);
            return Err(err);
        }
    };

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        cancelled = report.cancelled,
        "lentochka run completed"
    );

    match ctx.config.process.exit_policy {
        ExitPolicy::FailOnUnitErrors if report.failed > 0 => {
            Err(Error::UnitFailures(report.failed).into())
        }
        _ => Ok(()),
    }
}

/// The locked part of a run: discovery, archival, housekeeping, metrics.
/// The lock is released on every path out of this function.
pub fn run_with_context(ctx: &RunContext, dry_run: bool) -> Result<RunReport> {
    if !dry_run {
        let program = ctx.template.program(&ctx.config.archive.agent);
        match resolve_program(program) {
            Some(path) => debug!(agent = %path.display(), "archival agent found"),
            None => {
                error!(agent = program, "archival agent not found; check archive.agent");
                ctx.metrics.send("agent_not_found", 1, MetricStatus::Error);
                return Err(Error::AgentNotFound(program.to_string()).into());
            }
        }
    }

    let process = &ctx.config.process;
    let guard = ProcessLock::new(&ctx.config.paths.lock_file)
        .with_max_instances(process.max_instances)
        .with_grace_period(process.grace_period())
        .acquire()
        .inspect_err(|_| ctx.metrics.send("lock_error", 1, MetricStatus::Error))?;

    let discovery = stanza::discover(&ctx.config.paths.search_root, &ctx.discovery_options()?);

    let report = if dry_run {
        for stanza in &discovery.queue {
            info!(stanza = %stanza.path.display(), "dry run: would archive");
        }
        RunReport {
            skipped: discovery.summary.skipped(),
            ..RunReport::default()
        }
    } else {
        Archiver::new(ctx).execute(&discovery)
    };

    Housekeeper::from_config(&ctx.config.logging).run(SystemTime::now());

    if report.failed == 0 {
        ctx.metrics.send("run_succeeded", report.succeeded, MetricStatus::Ok);
    } else {
        ctx.metrics.send("run_failed", report.failed, MetricStatus::Error);
    }

    if let Err(err) = guard.release() {
        warn!(error = %err, "lock release reported an error");
    }
    Ok(report)
}

fn log_format(ctx: &RunContext) -> LogFormat {
    match ctx.config.logging.format {
        crate::config::LogFormatSetting::Human => LogFormat::Human,
        crate::config::LogFormatSetting::Json => LogFormat::Json,
    }
}

/// Create log directories and rotate the global log before it is reopened.
fn prepare_logs(ctx: &RunContext) -> Result<io::Result<Option<PathBuf>>> {
    let logging = &ctx.config.logging;
    fs::create_dir_all(&logging.log_dir)?;
    fs::create_dir_all(&logging.agent_log_dir)?;
    Ok(housekeeping::rotate_if_oversized(
        &logging.log_dir.join(GLOBAL_LOG_FILE),
        logging.rotate_max_bytes,
    ))
}

fn finish_rotation(rotation: io::Result<Option<PathBuf>>) {
    match rotation {
        Ok(None) => {}
        Ok(Some(rotated)) => {
            info!(rotated = %rotated.display(), "rotated global log");
            match housekeeping::compress_file(&rotated) {
                Ok(gz) => info!(archive = %gz.display(), "archived rotated log"),
                Err(err) => error!(file = %rotated.display(), error = %err, "cannot compress rotated log"),
            }
        }
        Err(err) => error!(error = %err, "cannot rotate global log"),
    }
}

fn install_stop_handler(ctx: &RunContext) {
    let flag = ctx.cancel_flag();
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        debug!(error = %err, "stop handler not installed");
    }
}
