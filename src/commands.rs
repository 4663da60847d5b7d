//! CLI command definitions
//!
//! Defines the clap commands for the `bpengine` binary.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run YAML scenarios against the simulated target
    Run {
        /// Scenario files to run
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Show stop messages and debug logging
        #[arg(long, short)]
        verbose: bool,

        /// Print results as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Parse a saved breakpoint session and list what it defines
    Check {
        /// Session file written by `save`
        session: PathBuf,

        /// Print the breakpoint table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Only print the config file location
        #[arg(long)]
        path: bool,
    },
}

impl Commands {
    /// Whether the command asked for debug logging
    pub fn verbose(&self) -> bool {
        matches!(self, Self::Run { verbose: true, .. })
    }
}
