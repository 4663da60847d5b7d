//! Collaborator interfaces
//!
//! The engine never talks to a process, a symbol table or an expression
//! language directly. Everything it needs from the outside world goes
//! through the three traits in this module:
//!
//! - [`TargetControl`] - memory, debug registers, native event hooks, frames
//! - [`LocationResolver`] - location spec text to concrete addresses
//! - [`ExpressionEvaluator`] - compile and evaluate conditions and watches
//!
//! [`Inferior`] bundles the three; [`sim::SimInferior`] is an in-memory
//! implementation used by the tests and the scenario runner.

pub mod sim;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::breakpoint::LocationSpec;

/// A target address
pub type Address = u64;

/// Target thread identifier, compared by value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one stack frame (canonical frame address plus function start)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId {
    pub stack: Address,
    pub code: Address,
}

/// Object-file section identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionId(pub u32);

/// Loaded module (executable or shared library) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

/// Section layout as the target reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub id: SectionId,
    pub module: Option<ModuleId>,
    /// Run (virtual) address
    pub vma: Address,
    /// Load address; differs from `vma` only for overlay sections
    pub lma: Address,
    pub size: u64,
    pub overlay: bool,
}

impl SectionInfo {
    pub fn contains(&self, address: Address) -> bool {
        address >= self.vma && address < self.vma + self.size
    }

    /// Translate a run address into the matching load address
    pub fn load_address(&self, address: Address) -> Address {
        address - self.vma + self.lma
    }
}

/// Module metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    /// Shared libraries can come and go while the program runs
    pub shared: bool,
}

/// A contiguous range of target memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryRange {
    pub address: Address,
    pub len: usize,
}

impl MemoryRange {
    pub fn new(address: Address, len: usize) -> Self {
        Self { address, len }
    }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.address && address < self.address + self.len as u64
    }
}

/// Access type a hardware watch slot fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchAccess {
    Write,
    Read,
    Access,
}

/// Hardware debug slot pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwResource {
    Breakpoint,
    Watchpoint,
}

impl fmt::Display for HwResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Breakpoint => write!(f, "breakpoint"),
            Self::Watchpoint => write!(f, "watchpoint"),
        }
    }
}

/// Native notification primitives a catchpoint arms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchHook {
    Fork,
    VFork,
    Exec,
    ExceptionThrow,
    ExceptionCatch,
}

/// OS/runtime event the target reported for the current stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NativeEvent {
    Forked { child: u32 },
    VForked { child: u32 },
    Execd { path: String },
    ModuleLoaded { module: ModuleId },
    ModuleUnloaded { module: ModuleId },
    ExceptionThrown,
    ExceptionCaught,
}

/// Errors reported by the target control layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("cannot access memory at address {0:#x}")]
    Memory(Address),

    #[error("no free hardware {0} slot")]
    NoHardwareSlot(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("target is not running")]
    NotRunning,
}

/// Low-level control over the debugged process
pub trait TargetControl {
    fn read_memory(&mut self, address: Address, len: usize) -> Result<Vec<u8>, TargetError>;

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<(), TargetError>;

    /// Trap instruction bytes for a software breakpoint at `address`
    fn breakpoint_encoding(&self, address: Address) -> Vec<u8>;

    /// Architecture adjustment of a requested breakpoint address
    fn adjust_breakpoint_address(&self, address: Address) -> Address {
        address
    }

    fn insert_hw_breakpoint(&mut self, address: Address) -> Result<(), TargetError>;

    fn remove_hw_breakpoint(&mut self, address: Address) -> Result<(), TargetError>;

    fn insert_hw_watchpoint(
        &mut self,
        range: MemoryRange,
        access: WatchAccess,
    ) -> Result<(), TargetError>;

    fn remove_hw_watchpoint(
        &mut self,
        range: MemoryRange,
        access: WatchAccess,
    ) -> Result<(), TargetError>;

    /// Live capacity of a hardware slot pool
    fn hw_slot_capacity(&self, resource: HwResource) -> usize;

    /// Whether one region can be watched by a single hardware slot
    fn region_ok_for_hw_watch(&self, range: MemoryRange) -> bool;

    /// Data address that triggered the current watchpoint stop, if known
    fn stopped_data_address(&self) -> Option<Address>;

    /// Native event that caused the current stop, if any
    fn native_event(&self) -> Option<NativeEvent>;

    fn insert_catch_hook(&mut self, hook: CatchHook) -> Result<(), TargetError>;

    fn remove_catch_hook(&mut self, hook: CatchHook) -> Result<(), TargetError>;

    /// Runtime type name of the exception in flight
    fn current_exception_type(&mut self) -> Option<String>;

    fn section_info(&self, section: SectionId) -> Option<SectionInfo>;

    /// Whether an overlay section currently occupies its run address
    fn section_is_mapped(&self, section: SectionId) -> bool;

    /// Whether traps can be written into a mapped overlay copy directly
    fn can_instrument_mapped_overlays(&self) -> bool {
        false
    }

    fn module_info(&self, module: ModuleId) -> Option<ModuleInfo>;

    fn current_frame(&self, thread: ThreadId) -> Option<FrameId>;

    fn frame_is_live(&self, frame: FrameId) -> bool;

    /// Caller of `frame` together with the address execution returns to
    fn caller_of(&self, frame: FrameId) -> Option<(FrameId, Address)>;

    /// Counter bumped every time the target is resumed
    fn run_generation(&self) -> u64;

    /// Ask the target to single-step every resume
    fn set_global_single_step(&mut self, enabled: bool);

    fn single_step(&mut self, thread: ThreadId) -> Result<(), TargetError>;

    fn resume(&mut self) -> Result<(), TargetError>;

    fn detach(&mut self) -> Result<(), TargetError>;
}

/// One concrete match of a location spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMatch {
    pub address: Address,
    pub section: Option<SectionId>,
    pub module: Option<ModuleId>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
}

/// All matches of one location spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Canonical text form, suitable for re-resolving later
    pub canonical: String,
    pub matches: Vec<ResolvedMatch>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No symbol table is loaded for \"{0}\"")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),
}

/// Source location to address resolution
pub trait LocationResolver {
    fn resolve(&mut self, spec: &LocationSpec) -> Result<Resolution, ResolveError>;
}

/// Lexical scope an expression is compiled in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalScope {
    pub frame: Option<FrameId>,
    pub address: Option<Address>,
}

/// Handle to an expression the evaluator has already parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledExpr {
    pub text: String,
    pub handle: u64,
    /// The expression refers to frame-local storage
    pub frame_bound: bool,
}

/// A value with its raw contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub type_name: String,
    pub contents: Vec<u8>,
    pub display: String,
}

impl Value {
    /// Compare full contents, not the printed representation
    pub fn same_contents(&self, other: &Value) -> bool {
        self.type_name == other.type_name && self.contents == other.contents
    }

    pub fn is_true(&self) -> bool {
        self.contents.iter().any(|b| *b != 0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display)
    }
}

/// One step of an evaluated expression and the memory it read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub value: Value,
    pub memory: Option<MemoryRange>,
}

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub value: Value,
    pub chain: Vec<ChainEntry>,
}

impl Evaluation {
    /// Memory regions the value depends on, in chain order
    pub fn regions(&self) -> Vec<MemoryRange> {
        regions_of(&self.chain)
    }
}

pub(crate) fn regions_of(chain: &[ChainEntry]) -> Vec<MemoryRange> {
    chain.iter().filter_map(|entry| entry.memory).collect()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EvalError(pub String);

/// Expression language front end
pub trait ExpressionEvaluator {
    fn compile(&mut self, text: &str, scope: &EvalScope) -> Result<CompiledExpr, EvalError>;

    fn evaluate(&mut self, expr: &CompiledExpr, thread: ThreadId) -> Result<Evaluation, EvalError>;
}

/// Everything the engine needs from the debugged program
pub trait Inferior: TargetControl + LocationResolver + ExpressionEvaluator {}

impl<T: TargetControl + LocationResolver + ExpressionEvaluator> Inferior for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_range_contains() {
        let range = MemoryRange::new(0x1000, 4);
        assert!(range.contains(0x1000));
        assert!(range.contains(0x1003));
        assert!(!range.contains(0x1004));
        assert!(!range.contains(0xfff));
    }

    #[test]
    fn test_overlay_load_address() {
        let section = SectionInfo {
            id: SectionId(1),
            module: None,
            vma: 0x8000,
            lma: 0x2_0000,
            size: 0x100,
            overlay: true,
        };
        assert!(section.contains(0x8010));
        assert_eq!(section.load_address(0x8010), 0x2_0010);
    }

    #[test]
    fn test_value_compares_contents_not_display() {
        let a = Value {
            type_name: "int[2]".into(),
            contents: vec![1, 0, 0, 0, 2, 0, 0, 0],
            display: "{1, 2}".into(),
        };
        let mut b = a.clone();
        b.display = "{0x1, 0x2}".into();
        assert!(a.same_contents(&b));

        b.contents[4] = 3;
        assert!(!a.same_contents(&b));
    }
}
