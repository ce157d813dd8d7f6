//! Implementation of `lentochka scan`.

use clap::{Args, ValueEnum};

use crate::{
    context::RunContext,
    logging::{self, LoggingConfig},
    stanza::{self, Discovery},
    Result,
};

use super::ConfigArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum ScanFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Args, Default)]
pub struct ScanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output format for the queue listing.
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: ScanFormat,
}

pub fn execute(args: ScanArgs) -> Result<()> {
    let config = args.config.load()?;
    logging::init_logging(LoggingConfig {
        level: config.logging.level.clone(),
        ..LoggingConfig::default()
    })?;

    let ctx = RunContext::new(config)?;
    let discovery = stanza::discover(&ctx.config.paths.search_root, &ctx.discovery_options()?);

    let out = match args.format {
        ScanFormat::Json => serde_json::to_string_pretty(&discovery)?,
        ScanFormat::Text => format_text(&discovery),
    };
    println!("{out}");
    Ok(())
}

fn format_text(discovery: &Discovery) -> String {
    let mut out = String::new();
    for stanza in &discovery.queue {
        out.push_str(&format!(
            "{}\t{}\t{}\n",
            stanza.repository.display(),
            stanza.name,
            stanza.path.display()
        ));
    }
    let s = &discovery.summary;
    out.push_str(&format!(
        "total={} completed={} failed={} pending={} archived={} excluded_by_repository={} queued={}",
        s.total, s.completed, s.failed, s.pending, s.archived, s.excluded_by_repository, s.queued
    ));
    out
}
