//! bpengine - breakpoint engine scenario runner
//!
//! Runs YAML scenarios against the simulated target, checks saved
//! breakpoint sessions and shows the effective configuration.

use bpengine::commands::Commands;
use bpengine::{cli, common::logging};
use clap::Parser;

#[derive(Parser)]
#[command(name = "bpengine", about = "Breakpoint engine scenario runner")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.command.verbose());

    match cli::dispatch(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
