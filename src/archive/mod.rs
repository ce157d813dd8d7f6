//! Archival execution: command templates and the per-stanza controller.

pub mod command;
pub mod executor;

pub use command::{resolve_program, AgentCommand, CommandTemplate};
pub use executor::{Archiver, RunReport, UnitOutcome};
