//! Breakpoint data model
//!
//! A [`Breakpoint`] is what the user asked for; each of its [`Location`]s is
//! one physical placement in the target. Breakpoints refer to locations by
//! [`LocationId`] and locations refer back by [`BreakpointNumber`], so there
//! are no owning back-pointers anywhere; the [`BreakpointStore`] owns both.

pub mod catchpoint;
pub mod insertion;
pub mod kind;
pub mod lifecycle;
pub mod linespec;
pub mod location;
pub mod persist;
pub mod registry;
pub mod stop;
pub mod store;
pub mod watch;

pub use catchpoint::{CatchKind, ModuleFilter};
pub use insertion::{InsertOutcome, InsertReport};
pub use lifecycle::PendingOutcome;
pub use linespec::LocationSpec;
pub use location::{Location, LocationId, LocationKind, Placement};
pub use registry::{BreakpointDescriptor, CreateRequest, EnumerateFilter};
pub use stop::{ActionClass, ExplanationRecord, OutcomeClass, StopDecision, StopEvent, WatchHint};
pub use store::BreakpointStore;
pub use watch::{WatchCheck, WatchMode, WatchState};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::target::{CompiledExpr, FrameId, ModuleId, ThreadId, WatchAccess};

/// User-visible breakpoint number
///
/// User breakpoints count up from 1. Internal helpers count down from -1,
/// so the two namespaces never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakpointNumber(pub i32);

impl BreakpointNumber {
    pub fn is_internal(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for BreakpointNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which accesses a watchpoint reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    Write,
    Read,
    Access,
}

impl WatchKind {
    pub fn access(self) -> WatchAccess {
        match self {
            Self::Write => WatchAccess::Write,
            Self::Read => WatchAccess::Read,
            Self::Access => WatchAccess::Access,
        }
    }
}

/// Helper breakpoints the engine creates for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalKind {
    /// Fires when a scoped watchpoint's frame returns
    WatchpointScope,
    /// Resume point for stepping over a called function
    StepResume,
    /// Module load/unload notification hook inside a dynamic loader
    ModuleEvent,
}

/// What kind of breakpoint this is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BreakpointKind {
    /// Line or address breakpoint implemented with a software trap
    Software,
    /// Breakpoint held in a hardware debug slot
    Hardware,
    Watchpoint { kind: WatchKind },
    Catchpoint { kind: CatchKind },
    Internal { kind: InternalKind },
}

impl BreakpointKind {
    pub fn is_watchpoint(&self) -> bool {
        matches!(self, Self::Watchpoint { .. })
    }

    /// Kinds whose locations are real code addresses
    pub fn is_address_based(&self) -> bool {
        matches!(
            self,
            Self::Software | Self::Hardware | Self::Internal { .. }
        )
    }

    pub fn internal_kind(&self) -> Option<InternalKind> {
        match self {
            Self::Internal { kind } => Some(*kind),
            _ => None,
        }
    }
}

/// Enable state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnableState {
    Enabled,
    Disabled,
    /// Insertion failed in a shared library; re-enabled when it reloads
    DisabledUnloadedLibrary,
    /// Parked while the debugger runs a function in the target
    DisabledDuringCall,
    /// A trap that is part of the program itself; never removed
    Permanent,
}

impl EnableState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Enabled | Self::Permanent)
    }
}

/// What happens to a breakpoint after it causes a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Keep,
    Delete,
    Disable,
    /// Deleted at the end of the current stop regardless of hits
    DeleteAtNextStop,
}

/// Whether the location spec has turned into addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    Resolved,
    /// Never resolved yet
    Pending,
    /// Was resolved, then its module went away
    AwaitingModuleReload,
}

/// Breakpoint condition, compiled on first use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub text: String,
    pub compiled: Option<CompiledExpr>,
}

impl Condition {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            compiled: None,
        }
    }
}

/// A user-visible (or internal) breakpoint request
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub number: BreakpointNumber,
    pub kind: BreakpointKind,
    pub enable_state: EnableState,
    pub disposition: Disposition,
    pub condition: Option<Condition>,
    pub ignore_count: u32,
    pub thread: Option<ThreadId>,
    pub hit_count: u32,
    pub commands: Vec<String>,
    pub resolution: ResolutionState,
    /// Location spec as the user wrote it
    pub spec_text: Option<String>,
    /// Canonical form returned by the resolver
    pub canonical: Option<String>,
    /// Module the breakpoint last resolved in
    pub module: Option<ModuleId>,
    /// Frame the breakpoint is restricted to
    pub frame: Option<FrameId>,
    /// Watchpoint <-> scope-guard link
    pub related: Option<BreakpointNumber>,
    pub needs_reresolve: bool,
    pub locations: Vec<LocationId>,
    pub watch: Option<WatchState>,
}

impl Breakpoint {
    pub fn new(number: BreakpointNumber, kind: BreakpointKind) -> Self {
        Self {
            number,
            kind,
            enable_state: EnableState::Enabled,
            disposition: Disposition::Keep,
            condition: None,
            ignore_count: 0,
            thread: None,
            hit_count: 0,
            commands: Vec::new(),
            resolution: ResolutionState::Resolved,
            spec_text: None,
            canonical: None,
            module: None,
            frame: None,
            related: None,
            needs_reresolve: false,
            locations: Vec::new(),
            watch: None,
        }
    }

    /// Active and resolved: the only breakpoints that may touch the target
    pub fn should_be_inserted(&self) -> bool {
        self.enable_state.is_active() && self.resolution == ResolutionState::Resolved
    }

    pub fn is_pending(&self) -> bool {
        self.resolution != ResolutionState::Resolved
    }

    pub fn is_internal(&self) -> bool {
        self.number.is_internal()
    }

    /// Hit commands starting with `silent` suppress the stop report
    pub fn is_silent(&self) -> bool {
        self.commands
            .first()
            .is_some_and(|c| c.trim() == "silent")
    }

    pub fn is_temporary(&self) -> bool {
        self.disposition == Disposition::Delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_namespaces() {
        assert!(!BreakpointNumber(1).is_internal());
        assert!(BreakpointNumber(-1).is_internal());
    }

    #[test]
    fn test_should_be_inserted() {
        let mut bp = Breakpoint::new(BreakpointNumber(1), BreakpointKind::Software);
        assert!(bp.should_be_inserted());

        bp.resolution = ResolutionState::Pending;
        assert!(!bp.should_be_inserted());

        bp.resolution = ResolutionState::Resolved;
        for state in [
            EnableState::Disabled,
            EnableState::DisabledUnloadedLibrary,
            EnableState::DisabledDuringCall,
        ] {
            bp.enable_state = state;
            assert!(!bp.should_be_inserted(), "{:?}", state);
        }

        bp.enable_state = EnableState::Permanent;
        assert!(bp.should_be_inserted());
    }

    #[test]
    fn test_silent_commands() {
        let mut bp = Breakpoint::new(BreakpointNumber(1), BreakpointKind::Software);
        assert!(!bp.is_silent());
        bp.commands = vec!["silent".into(), "print x".into()];
        assert!(bp.is_silent());
        bp.commands = vec!["print x".into(), "silent".into()];
        assert!(!bp.is_silent());
    }
}
