//! Configuration file loading (`lentochka.toml`).
//!
//! Every section has defaults except `paths.search_root`. Relative paths are
//! resolved against the directory holding the configuration file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{archive::CommandTemplate, Error, Result};

pub const CONFIG_FILE_NAME: &str = "lentochka.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathsConfig {
    pub search_root: PathBuf,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveConfig {
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default = "default_command_template")]
    pub command_template: String,
    #[serde(default = "default_status_marker")]
    pub status_marker: String,
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
    #[serde(default)]
    pub failure_scope: FailureScope,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            agent: default_agent(),
            command_template: default_command_template(),
            status_marker: default_status_marker(),
            completion_marker: default_completion_marker(),
            failure_scope: FailureScope::default(),
        }
    }
}

/// How far a failed replication marker reaches when building the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailureScope {
    /// Only the failed stanza itself is skipped.
    #[default]
    Unit,
    /// Every stanza of a repository is skipped if one of them failed.
    Repository,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExitPolicy {
    #[default]
    AlwaysZero,
    FailOnUnitErrors,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSection {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_agent_log_dir")]
    pub agent_log_dir: PathBuf,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormatSetting,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_true")]
    pub cleanup_enabled: bool,
    #[serde(default = "default_rotate_max_bytes")]
    pub rotate_max_bytes: u64,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            agent_log_dir: default_agent_log_dir(),
            level: default_level(),
            format: LogFormatSetting::default(),
            retention_days: default_retention_days(),
            cleanup_enabled: true,
            rotate_max_bytes: default_rotate_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessConfig {
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default)]
    pub exit_policy: ExitPolicy,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_instances: default_max_instances(),
            grace_period_secs: default_grace_period_secs(),
            exit_policy: ExitPolicy::default(),
        }
    }
}

impl ProcessConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub script: Option<PathBuf>,
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/tmp/lentochka.lock")
}

fn default_agent() -> String {
    "dsmc".into()
}

fn default_command_template() -> String {
    "{agent} incr {paths} -su=yes".into()
}

fn default_status_marker() -> String {
    "rsync.status".into()
}

fn default_completion_marker() -> String {
    "lentochka-status".into()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_agent_log_dir() -> PathBuf {
    PathBuf::from("logs/agent")
}

fn default_level() -> String {
    "info".into()
}

fn default_retention_days() -> u64 {
    90
}

fn default_true() -> bool {
    true
}

fn default_rotate_max_bytes() -> u64 {
    1_073_741_824
}

fn default_max_instances() -> usize {
    1
}

fn default_grace_period_secs() -> u64 {
    3
}

impl Config {
    /// Parse a configuration file (TOML, or JSON by extension), resolve
    /// relative paths and validate the result.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::ConfigNotFound(path.display().to_string()).into());
        }
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        let mut config: Config = match ext.as_str() {
            "json" => serde_json::from_str(&contents).map_err(Error::from)?,
            _ => toml::from_str(&contents).map_err(Error::from)?,
        };

        // Must be checked before relative resolution turns "" into the
        // config directory.
        config.check_search_root_set()?;

        let base = path
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_relative(&base);
        config.validate()?;
        Ok(config)
    }

    /// Locate the configuration file: explicit path first, then the working
    /// directory, `$HOME` and `/etc`.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Ok(home) = std::env::var("HOME") {
            candidates.push(Path::new(&home).join(CONFIG_FILE_NAME));
        }
        candidates.push(Path::new("/etc").join(CONFIG_FILE_NAME));

        candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| Error::ConfigNotFound(CONFIG_FILE_NAME.into()).into())
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::locate(explicit)?;
        Self::from_file(&path)
    }

    fn resolve_relative(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.paths.search_root);
        resolve(&mut self.paths.lock_file);
        resolve(&mut self.logging.log_dir);
        resolve(&mut self.logging.agent_log_dir);
        if let Some(script) = self.monitoring.script.as_mut() {
            resolve(script);
        }
    }

    fn check_search_root_set(&self) -> Result<()> {
        if self.paths.search_root.as_os_str().is_empty() {
            return Err(Error::Config("paths.search_root must be set".into()).into());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.check_search_root_set()?;
        if !self.paths.search_root.is_dir() {
            return Err(Error::Config(format!(
                "paths.search_root is not a directory: {}",
                self.paths.search_root.display()
            ))
            .into());
        }
        if self.process.max_instances == 0 {
            return Err(Error::Config("process.max_instances must be at least 1".into()).into());
        }
        if self.archive.agent.trim().is_empty() {
            return Err(Error::Config("archive.agent must be set".into()).into());
        }
        if self.archive.status_marker.is_empty() || self.archive.completion_marker.is_empty() {
            return Err(Error::Config("marker file names must not be empty".into()).into());
        }
        for pattern in &self.paths.exclude {
            glob::Pattern::new(pattern).map_err(|e| {
                Error::Config(format!("invalid exclude pattern {pattern:?}: {e}"))
            })?;
        }
        CommandTemplate::parse(&self.archive.command_template)?;
        Ok(())
    }
}
