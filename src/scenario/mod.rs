//! Scenario runner
//!
//! Reads YAML scenarios describing a simulated program and a sequence of
//! breakpoint operations and stops, runs them against a real [`Engine`]
//! and checks the structured results.
//!
//! [`Engine`]: crate::engine::Engine

mod config;
mod runner;

pub use config::*;
pub use runner::{run_scenario, run_scenario_str, TestResult};
