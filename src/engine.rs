//! The engine session
//!
//! [`Engine`] owns the breakpoint store, the configuration and the inferior
//! it drives. The operations live next to the component they belong to
//! (`breakpoint::registry`, `breakpoint::insertion`, `breakpoint::stop`, ...)
//! as `impl` blocks on this type.

use crate::breakpoint::kind::InsertContext;
use crate::breakpoint::stop::ClassifyPhase;
use crate::breakpoint::{Breakpoint, BreakpointNumber, BreakpointStore};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::target::Inferior;

/// Breakpoint engine bound to one inferior
pub struct Engine<I: Inferior> {
    pub(crate) inferior: I,
    pub(crate) store: BreakpointStore,
    pub(crate) config: Config,
    /// Coalesced warnings waiting to be shown
    pub(crate) warnings: Vec<String>,
    pub(crate) phase: ClassifyPhase,
    /// Watchpoints parked by `begin_inferior_call`
    pub(crate) parked_for_call: Vec<BreakpointNumber>,
    pub(crate) global_single_step: bool,
}

impl<I: Inferior> Engine<I> {
    pub fn new(inferior: I, config: Config) -> Self {
        Self {
            inferior,
            store: BreakpointStore::new(),
            config,
            warnings: Vec::new(),
            phase: ClassifyPhase::Idle,
            parked_for_call: Vec::new(),
            global_single_step: false,
        }
    }

    pub fn inferior(&self) -> &I {
        &self.inferior
    }

    pub fn inferior_mut(&mut self) -> &mut I {
        &mut self.inferior
    }

    pub fn into_inferior(self) -> I {
        self.inferior
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &BreakpointStore {
        &self.store
    }

    pub fn breakpoint(&self, number: BreakpointNumber) -> Option<&Breakpoint> {
        self.store.get(number)
    }

    pub(crate) fn breakpoint_mut(&mut self, number: BreakpointNumber) -> Result<&mut Breakpoint> {
        self.store
            .get_mut(number)
            .ok_or(Error::BreakpointNotFound(number))
    }

    /// Whether the target has to single-step because a software watchpoint is live
    pub fn needs_global_single_step(&self) -> bool {
        self.global_single_step
    }

    /// Drain coalesced warnings
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub(crate) fn insert_context(&self) -> InsertContext {
        InsertContext {
            overlays: self.config.overlays.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::sim::SimInferior;

    #[test]
    fn test_warnings_drain() {
        let mut engine = Engine::new(SimInferior::new(), Config::default());
        engine.warn("first".into());
        engine.warn("second".into());
        assert_eq!(engine.take_warnings(), vec!["first", "second"]);
        assert!(engine.take_warnings().is_empty());
    }

    #[test]
    fn test_missing_breakpoint_is_an_error() {
        let mut engine = Engine::new(SimInferior::new(), Config::default());
        let err = engine.breakpoint_mut(BreakpointNumber(5)).unwrap_err();
        assert_eq!(err.code(), "BREAKPOINT_NOT_FOUND");
    }
}
