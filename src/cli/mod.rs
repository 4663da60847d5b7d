//! CLI command handling
//!
//! Dispatches CLI commands and formats output.

use colored::Colorize;

use crate::breakpoint::{BreakpointDescriptor, EnumerateFilter};
use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::paths::config_path;
use crate::common::{Error, Result};
use crate::engine::Engine;
use crate::scenario::{run_scenario, TestResult};
use crate::target::sim::SimInferior;
use crate::target::ThreadId;

/// Dispatch a CLI command; returns the process exit code
pub fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            scenarios,
            verbose,
            json,
        } => {
            let mut results: Vec<TestResult> = Vec::with_capacity(scenarios.len());
            for path in &scenarios {
                results.push(run_scenario(path, verbose)?);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_summary(&results);
            }

            Ok(if results.iter().all(|r| r.passed) { 0 } else { 1 })
        }

        Commands::Check { session, json } => {
            // Nothing is loaded, so every location comes back pending
            let mut engine = Engine::new(SimInferior::new(), Config::default());
            let restored = engine.restore_from(&session, ThreadId(1))?;
            engine.take_warnings();
            let table = engine.enumerate(&EnumerateFilter::default());

            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                println!(
                    "{} defines {} breakpoint(s)",
                    session.display(),
                    restored.len()
                );
                for descriptor in &table {
                    print_breakpoint(descriptor);
                }
            }
            Ok(0)
        }

        Commands::Config { path } => {
            let location = config_path()
                .ok_or_else(|| Error::Config("no config directory on this platform".into()))?;
            if path {
                println!("{}", location.display());
                return Ok(0);
            }
            let config = Config::load()?;
            println!("# {}", location.display());
            print!("{}", config.to_toml()?);
            Ok(0)
        }
    }
}

fn print_summary(results: &[TestResult]) {
    let passed = results.iter().filter(|r| r.passed).count();
    for result in results.iter().filter(|r| !r.passed) {
        println!(
            "{} {} (step {}/{}): {}",
            "FAILED".red().bold(),
            result.name,
            result.steps_run,
            result.steps_total,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    let line = format!("{} of {} scenarios passed", passed, results.len());
    if passed == results.len() {
        println!("{}", line.green().bold());
    } else {
        println!("{}", line.red().bold());
    }
}

fn print_breakpoint(info: &BreakpointDescriptor) {
    let state = if info.enable_state == crate::breakpoint::EnableState::Enabled {
        "y"
    } else {
        "n"
    };
    println!(
        "{:<4} {:<16} {:<4} {}",
        info.number, info.kind, state, info.what
    );
    if let Some(condition) = &info.condition {
        println!("        stop only if {}", condition);
    }
    if info.ignore_count > 0 {
        println!("        will ignore next {} crossings", info.ignore_count);
    }
    for command in &info.commands {
        println!("        {}", command.dimmed());
    }
}
