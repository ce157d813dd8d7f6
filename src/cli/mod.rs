//! Command line interface; subcommands live here.

use std::path::PathBuf;

use clap::{error::ErrorKind, Args, CommandFactory, Parser, Subcommand};

use crate::{config::Config, Error, Result};

pub mod housekeep;
pub mod run;
pub mod scan;

#[derive(Debug, Clone)]
pub enum Command {
    Run(run::RunArgs),
    Scan(scan::ScanArgs),
    Housekeep(housekeep::HousekeepArgs),
    None,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: Command,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            command: Command::None,
        }
    }
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Args, Default)]
pub struct ConfigArgs {
    /// Path to lentochka.toml (defaults: ./, $HOME, /etc)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<Config> {
        Config::load(self.config.as_deref())
    }
}

pub fn dispatch(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run(r) => run::execute(r),
        Command::Scan(s) => scan::execute(s),
        Command::Housekeep(h) => housekeep::execute(h),
        Command::None => Ok(()),
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "lentochka",
    version,
    about = "Archive rsync-replicated backup stanzas to tape exactly once"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Subcommands>,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Discover completed stanzas and archive each one with the configured agent.
    Run(run::RunArgs),
    /// List the stanzas a run would archive, without taking the lock.
    Scan(scan::ScanArgs),
    /// Rotate, compress and expire log files only.
    Housekeep(housekeep::HousekeepArgs),
}

/// Parse CLI arguments into internal representation.
pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = args.into_iter().map(Into::into).collect();
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            err.exit()
        }
        Err(err) => return Err(Error::Cli(err.to_string().trim_end().to_string()).into()),
    };
    let command = match cli.command {
        Some(Subcommands::Run(args)) => Command::Run(args),
        Some(Subcommands::Scan(args)) => Command::Scan(args),
        Some(Subcommands::Housekeep(args)) => Command::Housekeep(args),
        None => Command::None,
    };

    Ok(CliArgs { command })
}

/// Build the underlying clap `Command` (useful for help/usage contract tests).
pub fn clap_command() -> clap::Command {
    Cli::command()
}
