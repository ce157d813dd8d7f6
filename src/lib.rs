use thiserror::Error;

pub mod archive;
pub mod cli;
pub mod config;
pub mod context;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod stanza;

pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),
    #[error("invalid archival command template: {0}")]
    InvalidTemplate(String),
    #[error("archival agent not found: {0}")]
    AgentNotFound(String),
    #[error("another instance is already running (pid {pid}, {running} live of max {max})")]
    AlreadyRunning { pid: i32, running: usize, max: usize },
    #[error("lock file {0} is held by another process")]
    LockHeld(String),
    #[error("lock file error on {path}: {source}")]
    LockIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("archival failed for {0} stanza(s)")]
    UnitFailures(usize),
    #[error("config parse error")]
    Toml(#[from] toml::de::Error),
    #[error("serialization error")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cli error: {0}")]
    Cli(String),
}

/// Entry point for the library, called by the CLI thin wrapper.
pub fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let cli_args = cli::parse_args(args.into_iter().map(Into::into))?;
    cli::dispatch(cli_args)
}
