//! Integration tests for the archival execution controller and full runs.
//!
//! The archival agent is simulated by a `/bin/sh` script that records its
//! arguments and fails for any stanza path inside a "broken.repo" repository.

use std::{
    fs,
    path::{Path, PathBuf},
};

use lentochka::archive::{Archiver, UnitOutcome};
use lentochka::cli::run::run_with_context;
use lentochka::config::{
    ArchiveConfig, Config, ExitPolicy, LoggingSection, MonitoringConfig, PathsConfig,
    ProcessConfig,
};
use lentochka::context::RunContext;
use lentochka::stanza::{discover, Stanza};
use lentochka::Error;
use tempfile::{tempdir, TempDir};

const AGENT_SCRIPT: &str = r#"
echo "$@" >> "$(dirname "$0")/calls.log"
case "$1" in
  *broken.repo*) echo "simulated tape failure" >&2; exit 3 ;;
esac
echo "archived $1"
"#;

struct Fixture {
    root: TempDir,
    work: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Self {
            root: tempdir().unwrap(),
            work: tempdir().unwrap(),
        };
        fs::write(fixture.script(), AGENT_SCRIPT).unwrap();
        fixture
    }

    fn root(&self) -> &Path {
        self.root.path()
    }

    fn script(&self) -> PathBuf {
        self.work.path().join("agent.sh")
    }

    fn lock_file(&self) -> PathBuf {
        self.work.path().join("lentochka.lock")
    }

    fn agent_log_dir(&self) -> PathBuf {
        self.work.path().join("logs/agent")
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.work.path().join("calls.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn stanza(&self, rel: &str, status: &str, archived: bool) -> PathBuf {
        let dir = self.root().join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("rsync.status"), status).unwrap();
        if archived {
            fs::write(dir.join("lentochka-status"), "Backup written to tape\n").unwrap();
        }
        dir
    }

    fn config(&self) -> Config {
        Config {
            paths: PathsConfig {
                search_root: self.root().to_path_buf(),
                exclude: Vec::new(),
                lock_file: self.lock_file(),
            },
            archive: ArchiveConfig {
                agent: "/bin/sh".into(),
                command_template: format!("{{agent}} {} {{paths}}", self.script().display()),
                ..ArchiveConfig::default()
            },
            logging: LoggingSection {
                log_dir: self.work.path().join("logs"),
                agent_log_dir: self.agent_log_dir(),
                ..LoggingSection::default()
            },
            process: ProcessConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    fn context(&self) -> RunContext {
        RunContext::new(self.config()).unwrap()
    }
}

fn marker(dir: &Path) -> PathBuf {
    dir.join("lentochka-status")
}

#[test]
fn end_to_end_archives_only_eligible_stanza() -> lentochka::Result<()> {
    let fx = Fixture::new();
    let a = fx.stanza("a.repo/backup/main", "complete", false);
    let b = fx.stanza("b.repo/backup/main", "failed: timeout", false);
    let c = fx.stanza("c.repo/backup/main", "complete", true);
    let c_marker_before = fs::read(marker(&c))?;

    let ctx = fx.context();
    let discovery = discover(fx.root(), &ctx.discovery_options()?);
    let queued: Vec<PathBuf> = discovery.queue.iter().map(|s| s.path.clone()).collect();
    assert_eq!(vec![a.clone()], queued);

    let report = Archiver::new(&ctx).execute(&discovery);
    assert_eq!(1, report.succeeded);
    assert_eq!(0, report.failed);
    assert_eq!(2, report.skipped);
    assert!(!report.cancelled);

    assert_eq!(vec![a.display().to_string()], fx.calls());
    let content = fs::read_to_string(marker(&a))?;
    assert!(content.starts_with("Backup written to tape\nStart: "));
    assert!(content.contains("\nEnd: "));
    assert!(!marker(&b).exists());
    assert_eq!(c_marker_before, fs::read(marker(&c))?);
    Ok(())
}

#[test]
fn second_run_over_unchanged_tree_invokes_nothing() -> lentochka::Result<()> {
    let fx = Fixture::new();
    fx.stanza("a.repo/backup/main", "complete", false);
    fx.stanza("a.repo/backup/wal", "complete", false);
    let ctx = fx.context();

    let first = Archiver::new(&ctx).execute(&discover(fx.root(), &ctx.discovery_options()?));
    assert_eq!(2, first.succeeded);
    assert_eq!(2, fx.calls().len());

    let again = discover(fx.root(), &ctx.discovery_options()?);
    assert!(again.queue.is_empty());
    let second = Archiver::new(&ctx).execute(&again);
    assert_eq!(0, second.succeeded);
    assert_eq!(2, second.skipped);
    assert_eq!(2, fx.calls().len());
    Ok(())
}

#[test]
fn failing_agent_leaves_no_marker_and_run_continues() -> lentochka::Result<()> {
    let fx = Fixture::new();
    let bad = fx.stanza("a-broken.repo/backup/main", "complete", false);
    let good = fx.stanza("b.repo/backup/main", "complete", false);
    let ctx = fx.context();

    let report = Archiver::new(&ctx).execute(&discover(fx.root(), &ctx.discovery_options()?));
    assert_eq!(1, report.succeeded);
    assert_eq!(1, report.failed);
    assert!(!marker(&bad).exists());
    assert!(marker(&good).exists());

    // Bad stanza was attempted first, the good one still ran afterwards.
    let calls = fx.calls();
    assert_eq!(2, calls.len());
    assert_eq!(bad.display().to_string(), calls[0]);
    Ok(())
}

#[test]
fn failure_outcome_references_captured_agent_output() -> lentochka::Result<()> {
    let fx = Fixture::new();
    let bad = fx.stanza("broken.repo/backup/main", "complete", false);
    let ctx = fx.context();
    let stanza = Stanza::new(fx.root(), &bad, lentochka::stanza::ReplicationStatus::Completed);

    let UnitOutcome::Failed {
        agent_log: Some(log),
        ..
    } = Archiver::new(&ctx).archive_stanza(&stanza)
    else {
        panic!("agent failure expected");
    };

    assert!(log.starts_with(fx.agent_log_dir()));
    let captured = fs::read_to_string(&log)?;
    assert!(captured.contains("# command: /bin/sh"));
    assert!(captured.contains("simulated tape failure"));
    assert!(captured.contains("exit status: 3"));
    assert!(!marker(&bad).exists());
    Ok(())
}

#[test]
fn launch_failure_is_a_unit_failure() -> lentochka::Result<()> {
    let fx = Fixture::new();
    let dir = fx.stanza("a.repo/backup/main", "complete", false);
    let mut config = fx.config();
    config.archive.agent = fx.work.path().join("no-such-agent").display().to_string();
    config.archive.command_template = "{agent} incr {paths}".into();
    let ctx = RunContext::new(config)?;

    let discovery = discover(fx.root(), &ctx.discovery_options()?);
    let UnitOutcome::Failed {
        agent_log: Some(log),
        ..
    } = Archiver::new(&ctx).archive_stanza(&discovery.queue[0])
    else {
        panic!("launch failure expected");
    };
    assert!(fs::read_to_string(&log)?.contains("(launch error: "));

    let report = Archiver::new(&ctx).execute(&discovery);
    assert_eq!(0, report.succeeded);
    assert_eq!(1, report.failed);
    assert!(!marker(&dir).exists());
    Ok(())
}

#[test]
fn marker_written_after_discovery_is_respected() -> lentochka::Result<()> {
    let fx = Fixture::new();
    let dir = fx.stanza("a.repo/backup/main", "complete", false);
    let ctx = fx.context();
    let discovery = discover(fx.root(), &ctx.discovery_options()?);
    assert_eq!(1, discovery.queue.len());

    // Another archiver got there first.
    fs::write(marker(&dir), "written elsewhere")?;

    let outcome = Archiver::new(&ctx).archive_stanza(&discovery.queue[0]);
    assert_eq!(UnitOutcome::AlreadyArchived, outcome);
    assert!(fx.calls().is_empty());
    assert_eq!("written elsewhere", fs::read_to_string(marker(&dir))?);
    Ok(())
}

#[test]
fn cancellation_stops_between_stanzas() -> lentochka::Result<()> {
    let fx = Fixture::new();
    fx.stanza("a.repo/backup/main", "complete", false);
    fx.stanza("b.repo/backup/main", "complete", false);
    let ctx = fx.context();
    ctx.cancel_flag()
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let report = Archiver::new(&ctx).execute(&discover(fx.root(), &ctx.discovery_options()?));
    assert!(report.cancelled);
    assert_eq!(0, report.succeeded);
    assert!(fx.calls().is_empty());
    Ok(())
}

#[test]
fn locked_run_archives_and_releases_lock() -> lentochka::Result<()> {
    let fx = Fixture::new();
    let a = fx.stanza("a.repo/backup/main", "complete", false);
    fx.stanza("b.repo/backup/main", "failed", false);
    let ctx = fx.context();

    let report = run_with_context(&ctx, false)?;
    assert_eq!(1, report.succeeded);
    assert_eq!(1, report.skipped);
    assert!(marker(&a).exists());
    assert!(!fx.lock_file().exists());
    Ok(())
}

#[test]
fn dry_run_touches_nothing() -> lentochka::Result<()> {
    let fx = Fixture::new();
    let a = fx.stanza("a.repo/backup/main", "complete", false);
    let ctx = fx.context();

    let report = run_with_context(&ctx, true)?;
    assert_eq!(0, report.succeeded);
    assert!(!marker(&a).exists());
    assert!(fx.calls().is_empty());
    Ok(())
}

#[test]
fn missing_agent_aborts_before_any_stanza() {
    let fx = Fixture::new();
    let a = fx.stanza("a.repo/backup/main", "complete", false);
    let mut config = fx.config();
    config.archive.agent = "lentochka-missing-agent".into();
    let ctx = RunContext::new(config).unwrap();

    let err = run_with_context(&ctx, false).expect_err("agent must be found");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::AgentNotFound(_))
    ));
    assert!(!marker(&a).exists());
    assert!(!fx.lock_file().exists());
}

#[test]
fn held_lock_aborts_before_any_stanza() -> lentochka::Result<()> {
    let fx = Fixture::new();
    let a = fx.stanza("a.repo/backup/main", "complete", false);
    let ctx = fx.context();

    let _held = lentochka::lock::ProcessLock::new(fx.lock_file()).acquire()?;
    let err = run_with_context(&ctx, false).expect_err("lock is held");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::LockHeld(_))));
    assert!(!marker(&a).exists());
    assert!(fx.calls().is_empty());
    Ok(())
}

#[test]
fn exit_policy_controls_cli_result() -> lentochka::Result<()> {
    let fx = Fixture::new();
    fx.stanza("broken.repo/backup/main", "complete", false);

    let mut config = fx.config();
    config.process.exit_policy = ExitPolicy::FailOnUnitErrors;
    let path = fx.work.path().join("lentochka.toml");
    fs::write(&path, toml::to_string(&config)?)?;

    let err = lentochka::run(["lentochka", "run", "--config", path.to_str().unwrap()])
        .expect_err("unit failure must surface");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::UnitFailures(1))
    ));

    config.process.exit_policy = ExitPolicy::AlwaysZero;
    fs::write(&path, toml::to_string(&config)?)?;
    lentochka::run(["lentochka", "run", "--config", path.to_str().unwrap()])?;
    Ok(())
}
