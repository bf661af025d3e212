//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListCommand, OrderCommand, RunCommand, ScheduleCommand, ValidateCommand};
use std::ffi::OsString;

/// Dependency-ordered ELT pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "elt-pipeline")]
#[command(version)]
#[command(about = "Run ELT pipeline steps in dependency order", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline or a selection of steps
    Run(RunCommand),

    /// Validate a project file
    Validate(ValidateCommand),

    /// Print the execution order of a selection
    Order(OrderCommand),

    /// Show upcoming schedule fire times, or serve the schedules
    Schedule(ScheduleCommand),

    /// List pipelines with recorded runs
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
