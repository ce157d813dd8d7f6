//! Implementation of `lentochka housekeep`.

use std::time::SystemTime;

use clap::Args;

use crate::{
    logging::{self, Housekeeper, LoggingConfig},
    Result,
};

use super::ConfigArgs;

#[derive(Debug, Clone, Args, Default)]
pub struct HousekeepArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub fn execute(args: HousekeepArgs) -> Result<()> {
    let config = args.config.load()?;
    logging::init_logging(LoggingConfig {
        level: config.logging.level.clone(),
        ..LoggingConfig::default()
    })?;

    Housekeeper::from_config(&config.logging).run(SystemTime::now());
    Ok(())
}
