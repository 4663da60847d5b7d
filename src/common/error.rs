//! Error types for the breakpoint engine
//!
//! Messages follow the wording a debugger user expects to see, and every
//! variant maps to a stable machine code so scenario scripts and front ends
//! can match on them without parsing text.

use std::io;
use thiserror::Error;

use crate::breakpoint::BreakpointNumber;
use crate::target::{Address, EvalError, TargetError};

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // === Resolution Errors ===
    #[error("No location found matching \"{0}\"")]
    LocationNotFound(String),

    #[error("Breakpoint {0} not found")]
    BreakpointNotFound(BreakpointNumber),

    // === Resource Errors ===
    #[error("Hardware {resource} resources exhausted: {needed} needed, {available} available")]
    ResourceExhausted {
        resource: String,
        needed: usize,
        available: usize,
    },

    // === Target Errors ===
    #[error("Cannot access memory at address {address:#x}: {source}")]
    TargetMemory {
        address: Address,
        #[source]
        source: TargetError,
    },

    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    // === Evaluation Errors ===
    #[error("Error in testing condition for breakpoint {number}: {message}")]
    ConditionEval {
        number: BreakpointNumber,
        message: String,
    },

    #[error("Watchpoint {0} deleted because the program has left the block in which its expression is valid")]
    ScopeExited(BreakpointNumber),

    #[error("Expression error: {0}")]
    Eval(#[from] EvalError),

    // === Request Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a resource exhausted error for a hardware pool
    pub fn resource_exhausted(resource: &str, needed: usize, available: usize) -> Self {
        Self::ResourceExhausted {
            resource: resource.to_string(),
            needed,
            available,
        }
    }

    /// Create a target memory error at an address
    pub fn target_memory(address: Address, source: TargetError) -> Self {
        Self::TargetMemory { address, source }
    }

    /// Create a condition evaluation error
    pub fn condition_eval(number: BreakpointNumber, message: &str) -> Self {
        Self::ConditionEval {
            number,
            message: message.to_string(),
        }
    }

    /// Create a parse error for a persisted statement
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::LocationNotFound(_) => "LOCATION_NOT_FOUND",
            Error::BreakpointNotFound(_) => "BREAKPOINT_NOT_FOUND",
            Error::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            Error::TargetMemory { .. } => "TARGET_MEMORY_ERROR",
            Error::Target(_) => "TARGET_ERROR",
            Error::ConditionEval { .. } => "CONDITION_EVAL_ERROR",
            Error::ScopeExited(_) => "SCOPE_EXITED",
            Error::Eval(_) => "EVAL_ERROR",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::Parse { .. } => "PARSE_ERROR",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }
}
