//! bpengine - breakpoint, watchpoint and catchpoint engine
//!
//! This library keeps a native debugger's breakpoints in sync with a
//! running target: it inserts and removes traps and debug-register slots,
//! reconciles overlapping requests at the same address, evaluates
//! conditions and watched expressions, and turns each raw stop into a
//! decision about what to do next.
//!
//! The target itself is reached through the traits in [`target`];
//! [`target::sim::SimInferior`] is an in-memory implementation used by the
//! tests and the scenario runner.

pub mod breakpoint;
pub mod cli;
pub mod commands;
pub mod common;
pub mod engine;
pub mod scenario;
pub mod target;

// Re-export commonly used types
pub use breakpoint::{
    BreakpointNumber, CreateRequest, StopDecision, StopEvent, WatchHint, WatchKind,
};
pub use common::{Error, Result};
pub use engine::Engine;
pub use target::Inferior;
