//! Scenario file types
//!
//! Defines the data structures for deserializing YAML scenarios.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::breakpoint::WatchHint;
use crate::common::config::Config;
use crate::target::NativeEvent;

/// A complete scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Engine settings, same keys as `config.toml`
    #[serde(default)]
    pub config: Config,
    /// Contents of the simulated program
    #[serde(default)]
    pub target: TargetConfig,
    /// The sequence of steps to execute
    pub steps: Vec<Step>,
}

/// Simulated program layout
#[derive(Deserialize, Debug, Default)]
pub struct TargetConfig {
    #[serde(default)]
    pub modules: Vec<ModuleDef>,
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
    #[serde(default)]
    pub lines: Vec<LineDef>,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    /// Raw memory contents
    #[serde(default)]
    pub memory: Vec<MemoryDef>,
    /// Call stack entries, outermost first
    #[serde(default)]
    pub frames: Vec<FrameDef>,
    /// Hardware breakpoint slots (default 4)
    pub hw_breakpoints: Option<usize>,
    /// Hardware watchpoint slots (default 4)
    pub hw_watchpoints: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct ModuleDef {
    pub id: u32,
    pub name: String,
    #[serde(default = "default_true")]
    pub shared: bool,
    /// Whether the module is loaded when the scenario starts
    #[serde(default = "default_true")]
    pub loaded: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub address: u64,
    pub module: Option<u32>,
}

#[derive(Deserialize, Debug)]
pub struct LineDef {
    pub file: String,
    pub line: u32,
    pub address: u64,
    pub module: Option<u32>,
}

#[derive(Deserialize, Debug)]
pub struct VariableDef {
    pub name: String,
    pub address: u64,
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default)]
    pub value: i64,
    /// Index into `frames` for a frame-local variable
    pub frame: Option<usize>,
}

fn default_size() -> usize {
    4
}

#[derive(Deserialize, Debug)]
pub struct MemoryDef {
    pub address: u64,
    pub bytes: Vec<u8>,
}

#[derive(Deserialize, Debug)]
pub struct FrameDef {
    #[serde(default = "default_thread")]
    pub thread: u64,
    pub stack: u64,
    pub code: u64,
    /// Where execution continues in the caller when this frame returns
    pub return_address: u64,
}

fn default_thread() -> u64 {
    1
}

/// A single step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Run one breakpoint statement (`break`, `watch`, `delete 1-3`, ...)
    Command {
        command: String,
        expect: Option<CommandExpectation>,
    },
    /// Store a value in a program variable
    Set { variable: String, value: i64 },
    /// Install breakpoints and resume the target
    Resume { expect: Option<ResumeExpectation> },
    /// Report a stop and classify it
    Stop {
        address: u64,
        #[serde(default = "default_thread")]
        thread: u64,
        #[serde(default)]
        hint: WatchHint,
        data_address: Option<u64>,
        event: Option<NativeEvent>,
        exception_type: Option<String>,
        expect: Option<StopExpectation>,
    },
    LoadModule { module: u32 },
    UnloadModule { module: u32 },
    /// Return from the innermost frame of a thread
    PopFrame {
        #[serde(default = "default_thread")]
        thread: u64,
    },
    /// Run a function in the target, assigning variables while it runs
    InferiorCall {
        #[serde(default)]
        assign: BTreeMap<String, i64>,
    },
    /// Inspect one breakpoint
    CheckBreakpoint {
        number: i32,
        expect: BreakpointExpectation,
    },
    /// Inspect raw target memory
    CheckMemory { address: u64, bytes: Vec<u8> },
    /// Remove everything and detach
    Detach,
}

/// Expectations for a command
#[derive(Deserialize, Debug)]
pub struct CommandExpectation {
    /// Whether the command should succeed
    pub success: Option<bool>,
    /// Number of the breakpoint the command created
    pub number: Option<i32>,
    /// Substring of a warning the command emitted
    pub warning_contains: Option<String>,
    /// Substring of the error message
    pub error_contains: Option<String>,
}

/// Expectations for a resume
#[derive(Deserialize, Debug)]
pub struct ResumeExpectation {
    /// Number of locations newly inserted
    pub inserted: Option<usize>,
    /// Breakpoints that failed to insert
    pub failed: Option<Vec<i32>>,
    /// Whether global single-stepping is on afterwards
    pub single_step: Option<bool>,
}

/// Expectations for a stop
#[derive(Deserialize, Debug)]
pub struct StopExpectation {
    /// Whether the stop is reported to the user
    pub stop: Option<bool>,
    /// Expected action class (e.g. "stop_noisy", "single_step_over")
    pub action: Option<String>,
    /// Breakpoints that caused the stop
    pub breakpoints: Option<Vec<i32>>,
    /// Substring of one of the stop messages
    pub message_contains: Option<String>,
    /// Breakpoints deleted once the stop was handled
    pub deleted: Option<Vec<i32>>,
}

/// Expectations for one breakpoint
#[derive(Deserialize, Debug)]
pub struct BreakpointExpectation {
    /// Set to false to assert the breakpoint no longer exists
    pub exists: Option<bool>,
    pub hit_count: Option<u32>,
    pub ignore_count: Option<u32>,
    /// Expected enable state (e.g. "enabled", "disabled_unloaded_library")
    pub enable_state: Option<String>,
    pub pending: Option<bool>,
    /// Number of locations
    pub locations: Option<usize>,
    /// Number of inserted locations
    pub inserted: Option<usize>,
}
