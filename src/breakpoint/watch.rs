//! Watchpoints
//!
//! A watchpoint remembers the value of an expression and the chain of memory
//! reads that produced it. Hardware watchpoints get one `HardwareWatch`
//! location per region of the chain; software watchpoints have no locations
//! and rely on the target single-stepping while they are active.

use serde::{Deserialize, Serialize};

use super::{
    Breakpoint, BreakpointKind, BreakpointNumber, Disposition, EnableState, InternalKind,
    Location, LocationKind, ResolutionState, WatchKind,
};
use crate::common::{Error, Result};
use crate::engine::Engine;
use crate::target::{
    regions_of, Address, ChainEntry, CompiledExpr, EvalScope, FrameId, HwResource, Inferior,
    MemoryRange, ThreadId, Value,
};

/// How a watchpoint is implemented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    Hardware,
    /// Single-step and compare; write watchpoints only
    Software,
}

/// Per-watchpoint evaluation state
#[derive(Debug, Clone)]
pub struct WatchState {
    pub expression: String,
    pub compiled: Option<CompiledExpr>,
    pub kind: WatchKind,
    pub mode: WatchMode,
    pub old_value: Option<Value>,
    pub chain: Vec<ChainEntry>,
    /// Frame the expression is only valid in
    pub scope_frame: Option<FrameId>,
    pub thread: ThreadId,
}

impl WatchState {
    pub fn regions(&self) -> Vec<MemoryRange> {
        regions_of(&self.chain)
    }

    fn triggered_by(&self, data_address: Option<Address>) -> bool {
        data_address.is_some_and(|a| self.regions().iter().any(|r| r.contains(a)))
    }
}

/// Outcome of re-checking a watchpoint at a stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCheck {
    /// The scope frame is gone; the watchpoint is going away
    Deleted,
    Changed { old: Option<Value>, new: Value },
    Unchanged,
    /// Evaluation failed; the watchpoint has been disabled
    Failed(String),
}

impl<I: Inferior> Engine<I> {
    /// Install a watchpoint on `expression`
    ///
    /// The expression is compiled in `scope_frame` (or the thread's current
    /// frame). If it refers to frame-local storage a scope-guard is placed
    /// where the frame returns to, so the watchpoint dies with its frame.
    pub fn watch(
        &mut self,
        expression: &str,
        kind: WatchKind,
        scope_frame: Option<FrameId>,
        thread: ThreadId,
    ) -> Result<BreakpointNumber> {
        let frame = scope_frame.or_else(|| self.inferior.current_frame(thread));
        let scope = EvalScope {
            frame,
            address: None,
        };
        let compiled = self.inferior.compile(expression, &scope)?;
        let eval = self.inferior.evaluate(&compiled, thread)?;
        let regions = eval.regions();
        if regions.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "Cannot watch constant value `{}'",
                expression
            )));
        }
        let mode = self.choose_watch_mode(kind, &regions, 0)?;
        let scope_frame = if compiled.frame_bound { frame } else { None };

        let number = self.store.allocate_number(false);
        let mut bp = Breakpoint::new(number, BreakpointKind::Watchpoint { kind });
        bp.spec_text = Some(expression.to_string());
        bp.frame = scope_frame;
        bp.watch = Some(WatchState {
            expression: expression.to_string(),
            compiled: Some(compiled),
            kind,
            mode,
            old_value: Some(eval.value),
            chain: eval.chain,
            scope_frame,
            thread,
        });
        self.store.insert_breakpoint(bp);
        if mode == WatchMode::Hardware {
            self.add_watch_locations(number, kind, &regions)?;
        }

        if let Some(frame) = scope_frame {
            if let Some((caller, resume_at)) = self.inferior.caller_of(frame) {
                let guard = self.create_internal(
                    InternalKind::WatchpointScope,
                    resume_at,
                    Some(caller),
                    Some(thread),
                )?;
                self.breakpoint_mut(guard)?.related = Some(number);
                self.breakpoint_mut(number)?.related = Some(guard);
            }
        }

        self.update_global_single_step();
        tracing::debug!(number = %number, expression, ?mode, "Created watchpoint");
        Ok(number)
    }

    /// Hardware if every region fits and enough slots are free, else
    /// software for write watches
    ///
    /// `reusable` counts slots the watchpoint already holds and may keep.
    fn choose_watch_mode(
        &self,
        kind: WatchKind,
        regions: &[MemoryRange],
        reusable: usize,
    ) -> Result<WatchMode> {
        let fits = self.config.watchpoints.can_use_hardware
            && !regions.is_empty()
            && regions
                .iter()
                .all(|r| self.inferior.region_ok_for_hw_watch(*r));
        let capacity = self.inferior.hw_slot_capacity(HwResource::Watchpoint);
        let others = self
            .hw_slots_committed(HwResource::Watchpoint)
            .saturating_sub(reusable);
        let available = capacity.saturating_sub(others);

        if fits && regions.len() <= available {
            return Ok(WatchMode::Hardware);
        }
        if kind != WatchKind::Write {
            return Err(Error::resource_exhausted(
                "watchpoint",
                regions.len(),
                available,
            ));
        }
        Ok(WatchMode::Software)
    }

    fn add_watch_locations(
        &mut self,
        number: BreakpointNumber,
        kind: WatchKind,
        regions: &[MemoryRange],
    ) -> Result<()> {
        for range in regions {
            let loc = Location::new(
                number,
                LocationKind::HardwareWatch {
                    range: *range,
                    access: kind.access(),
                },
                range.address,
            );
            self.store
                .add_location(loc)
                .ok_or(Error::BreakpointNotFound(number))?;
        }
        Ok(())
    }

    /// Re-check a watchpoint at a stop
    pub fn check_watchpoint(&mut self, number: BreakpointNumber) -> Result<WatchCheck> {
        let bp = self.store.get(number).ok_or(Error::BreakpointNotFound(number))?;
        let watch = bp
            .watch
            .clone()
            .ok_or_else(|| Error::InvalidArgument(format!("{} is not a watchpoint", number)))?;
        let related = bp.related;

        if let Some(frame) = watch.scope_frame {
            if !self.inferior.frame_is_live(frame) {
                for n in std::iter::once(number).chain(related) {
                    if let Some(bp) = self.store.get_mut(n) {
                        bp.disposition = Disposition::DeleteAtNextStop;
                    }
                }
                tracing::debug!(number = %number, "Watchpoint scope exited");
                return Ok(WatchCheck::Deleted);
            }
        }

        let eval = match self.evaluate_watch(number, &watch) {
            Ok(eval) => eval,
            Err(message) => {
                self.breakpoint_mut(number)?.enable_state = EnableState::Disabled;
                self.lift_breakpoint(number);
                self.update_global_single_step();
                return Ok(WatchCheck::Failed(message));
            }
        };

        let changed = !watch
            .old_value
            .as_ref()
            .is_some_and(|old| old.same_contents(&eval.value));
        let data_address = self.inferior.stopped_data_address();
        let report = match watch.kind {
            WatchKind::Write => changed,
            WatchKind::Read => watch.triggered_by(data_address),
            WatchKind::Access => changed || watch.triggered_by(data_address),
        };

        let new = eval.value.clone();
        if let Some(state) = self.breakpoint_mut(number)?.watch.as_mut() {
            state.old_value = Some(eval.value);
            state.chain = eval.chain;
        }

        if report {
            Ok(WatchCheck::Changed {
                old: watch.old_value,
                new,
            })
        } else {
            Ok(WatchCheck::Unchanged)
        }
    }

    /// Evaluate a watch expression, recompiling it if symbols changed
    fn evaluate_watch(
        &mut self,
        number: BreakpointNumber,
        watch: &WatchState,
    ) -> std::result::Result<crate::target::Evaluation, String> {
        let compiled = match &watch.compiled {
            Some(compiled) => compiled.clone(),
            None => {
                let scope = EvalScope {
                    frame: watch.scope_frame,
                    address: None,
                };
                let compiled = self
                    .inferior
                    .compile(&watch.expression, &scope)
                    .map_err(|e| e.to_string())?;
                if let Some(state) = self.store.get_mut(number).and_then(|bp| bp.watch.as_mut()) {
                    state.compiled = Some(compiled.clone());
                }
                compiled
            }
        };
        self.inferior
            .evaluate(&compiled, watch.thread)
            .map_err(|e| e.to_string())
    }

    /// Re-snapshot a watchpoint and rebuild its hardware locations
    ///
    /// A watchpoint whose frame is gone is deleted together with its guard.
    /// One that can no longer be watched is disabled with its old locations
    /// left in place.
    pub(crate) fn update_watchpoint(&mut self, number: BreakpointNumber) -> Result<()> {
        let watch = self
            .store
            .get(number)
            .and_then(|bp| bp.watch.clone())
            .ok_or(Error::BreakpointNotFound(number))?;
        if let Some(frame) = watch.scope_frame {
            if !self.inferior.frame_is_live(frame) {
                return Err(self.delete_out_of_scope(number));
            }
        }
        let eval = self.evaluate_watch(number, &watch).map_err(|message| {
            Error::Eval(crate::target::EvalError(message))
        })?;
        let regions = eval.regions();

        if let Some(state) = self.breakpoint_mut(number)?.watch.as_mut() {
            state.old_value = Some(eval.value);
            state.chain = eval.chain;
        }

        let current: Vec<MemoryRange> = self
            .store
            .locations_of(number)
            .into_iter()
            .filter_map(|id| match self.store.location(id)?.kind {
                LocationKind::HardwareWatch { range, .. } => Some(range),
                _ => None,
            })
            .collect();
        if watch.mode == WatchMode::Hardware && current == regions {
            return Ok(());
        }

        let active = self
            .store
            .get(number)
            .is_some_and(|bp| bp.should_be_inserted());
        let reusable = if active { current.len() } else { 0 };
        let mode = match self.choose_watch_mode(watch.kind, &regions, reusable) {
            Ok(mode) => mode,
            Err(e) => {
                self.breakpoint_mut(number)?.enable_state = EnableState::Disabled;
                self.lift_breakpoint(number);
                self.update_global_single_step();
                self.warn(format!("Watchpoint {} disabled: {}", number, e));
                return Err(e);
            }
        };

        for id in self.store.locations_of(number) {
            if let Err(e) = self.remove_location(id) {
                tracing::warn!(breakpoint = %number, error = %e, "Failed to remove watch location");
            }
            self.store.remove_location(id);
        }
        if let Some(state) = self.breakpoint_mut(number)?.watch.as_mut() {
            state.mode = mode;
        }
        if mode == WatchMode::Hardware {
            self.add_watch_locations(number, watch.kind, &regions)?;
        }
        Ok(())
    }

    /// Delete a watchpoint whose frame has returned, guard included
    pub(crate) fn delete_out_of_scope(&mut self, number: BreakpointNumber) -> Error {
        let error = Error::ScopeExited(number);
        self.warn(format!("{}.", error));
        if let Err(e) = self.delete(number) {
            tracing::warn!(breakpoint = %number, error = %e, "Cannot delete watchpoint");
        }
        error
    }

    /// Re-evaluate and reinstall every active hardware watchpoint
    pub fn refresh_hardware_watchpoints(&mut self) {
        let numbers: Vec<BreakpointNumber> = self
            .store
            .iter()
            .filter(|bp| bp.should_be_inserted())
            // Already reported; the stop's auto-delete takes them
            .filter(|bp| bp.disposition != Disposition::DeleteAtNextStop)
            .filter(|bp| {
                bp.watch
                    .as_ref()
                    .is_some_and(|w| w.mode == WatchMode::Hardware)
            })
            .map(|bp| bp.number)
            .collect();

        for number in numbers {
            // Scope exits and lost slots have already been dealt with
            if let Err(e) = self.update_watchpoint(number) {
                tracing::debug!(breakpoint = %number, error = %e, "Watchpoint not refreshed");
                continue;
            }
            for id in self.store.locations_of(number) {
                if let Err(e) = self.insert_location(id) {
                    tracing::warn!(breakpoint = %number, error = %e, "Cannot reinsert watchpoint");
                }
            }
        }
        self.update_global_single_step();
    }

    /// Keep the target's global single-step in line with live software watchpoints
    pub(crate) fn update_global_single_step(&mut self) {
        let needed = self.store.iter().any(|bp| {
            bp.enable_state.is_active()
                && bp.resolution == ResolutionState::Resolved
                && bp
                    .watch
                    .as_ref()
                    .is_some_and(|w| w.mode == WatchMode::Software)
        });
        if needed != self.global_single_step {
            tracing::debug!(enabled = needed, "Global single-step");
            self.inferior.set_global_single_step(needed);
            self.global_single_step = needed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Config;
    use crate::target::sim::SimInferior;
    use crate::target::{TargetControl, WatchAccess};

    const T1: ThreadId = ThreadId(1);

    fn engine_with_x() -> Engine<SimInferior> {
        let mut sim = SimInferior::new();
        sim.add_variable("x", 0x2000, 4);
        sim.set_value("x", 5);
        Engine::new(sim, Config::default())
    }

    fn value(n: i32) -> Value {
        Value {
            type_name: "int".into(),
            contents: n.to_le_bytes().to_vec(),
            display: n.to_string(),
        }
    }

    #[test]
    fn test_write_watchpoint_reports_only_changes() {
        let mut engine = engine_with_x();
        let n = engine.watch("x", WatchKind::Write, None, T1).unwrap();
        assert_eq!(
            engine.breakpoint(n).unwrap().watch.as_ref().unwrap().mode,
            WatchMode::Hardware
        );

        engine.inferior_mut().set_value("x", 5);
        assert_eq!(engine.check_watchpoint(n).unwrap(), WatchCheck::Unchanged);

        engine.inferior_mut().set_value("x", 7);
        assert_eq!(
            engine.check_watchpoint(n).unwrap(),
            WatchCheck::Changed {
                old: Some(value(5)),
                new: value(7)
            }
        );
        assert_eq!(engine.check_watchpoint(n).unwrap(), WatchCheck::Unchanged);
    }

    #[test]
    fn test_hardware_watch_installs_one_slot_per_region() {
        let mut engine = engine_with_x();
        let n = engine.watch("x", WatchKind::Write, None, T1).unwrap();
        engine.insert_all();
        assert_eq!(
            engine.inferior().hw_watchpoints(),
            vec![(MemoryRange::new(0x2000, 4), WatchAccess::Write)]
        );
        engine.delete(n).unwrap();
        assert!(engine.inferior().hw_watchpoints().is_empty());
    }

    #[test]
    fn test_software_fallback_turns_on_single_step() {
        let mut config = Config::default();
        config.watchpoints.can_use_hardware = false;
        let mut sim = SimInferior::new();
        sim.add_variable("x", 0x2000, 4);
        let mut engine = Engine::new(sim, config);

        let n = engine.watch("x", WatchKind::Write, None, T1).unwrap();
        assert!(engine.store().locations_of(n).is_empty());
        assert!(engine.needs_global_single_step());
        assert!(engine.inferior().global_single_step());

        engine.disable(n).unwrap();
        assert!(!engine.inferior().global_single_step());
    }

    #[test]
    fn test_read_watch_without_hardware_is_rejected() {
        let mut engine = engine_with_x();
        engine
            .inferior_mut()
            .set_hw_capacity(HwResource::Watchpoint, 0);
        let err = engine.watch("x", WatchKind::Read, None, T1).unwrap_err();
        assert_eq!(err.code(), "RESOURCE_EXHAUSTED");
        assert!(engine.store().is_empty());

        let n = engine.watch("x", WatchKind::Write, None, T1).unwrap();
        assert_eq!(
            engine.breakpoint(n).unwrap().watch.as_ref().unwrap().mode,
            WatchMode::Software
        );
    }

    #[test]
    fn test_read_watch_needs_data_address() {
        let mut engine = engine_with_x();
        let n = engine.watch("x", WatchKind::Read, None, T1).unwrap();
        assert_eq!(engine.check_watchpoint(n).unwrap(), WatchCheck::Unchanged);

        engine.inferior_mut().set_stopped_data_address(Some(0x2002));
        assert!(matches!(
            engine.check_watchpoint(n).unwrap(),
            WatchCheck::Changed { .. }
        ));

        engine.inferior_mut().set_stopped_data_address(Some(0x3000));
        assert_eq!(engine.check_watchpoint(n).unwrap(), WatchCheck::Unchanged);
    }

    #[test]
    fn test_constant_cannot_be_watched() {
        let mut engine = engine_with_x();
        assert!(engine.watch("5", WatchKind::Write, None, T1).is_err());
    }

    #[test]
    fn test_scoped_watchpoint_gets_a_guard() {
        let mut sim = SimInferior::new();
        let outer = FrameId { stack: 0x7ff0, code: 0x1000 };
        let inner = FrameId { stack: 0x7fe0, code: 0x1100 };
        sim.push_frame(T1, outer, 0);
        sim.push_frame(T1, inner, 0x1044);
        sim.add_local("count", 0x7fd0, 4, inner);
        let mut engine = Engine::new(sim, Config::default());

        let n = engine.watch("count", WatchKind::Write, None, T1).unwrap();
        let guard = engine.breakpoint(n).unwrap().related.unwrap();
        let guard_bp = engine.breakpoint(guard).unwrap();
        assert!(guard.is_internal());
        assert_eq!(guard_bp.related, Some(n));
        assert_eq!(guard_bp.frame, Some(outer));
        assert_eq!(
            guard_bp.kind.internal_kind(),
            Some(InternalKind::WatchpointScope)
        );
        let loc = engine.store().locations_of(guard)[0];
        assert_eq!(engine.store().location(loc).unwrap().address, 0x1044);

        engine.inferior_mut().pop_frame(T1);
        assert_eq!(engine.check_watchpoint(n).unwrap(), WatchCheck::Deleted);
        assert_eq!(
            engine.breakpoint(n).unwrap().disposition,
            Disposition::DeleteAtNextStop
        );
        assert_eq!(
            engine.breakpoint(guard).unwrap().disposition,
            Disposition::DeleteAtNextStop
        );
    }

    #[test]
    fn test_evaluation_failure_disables() {
        let mut sim = SimInferior::new();
        sim.add_variable("ptr", 0x3000, 8);
        sim.set_value("ptr", 0x4000);
        let mut engine = Engine::new(sim, Config::default());
        let n = engine.watch("*ptr", WatchKind::Write, None, T1).unwrap();
        assert_eq!(engine.store().locations_of(n).len(), 2);

        engine.inferior_mut().set_value("ptr", 0);
        let check = engine.check_watchpoint(n).unwrap();
        assert!(matches!(check, WatchCheck::Failed(_)));
        assert_eq!(
            engine.breakpoint(n).unwrap().enable_state,
            EnableState::Disabled
        );
    }

    fn engine_in_frame() -> (Engine<SimInferior>, BreakpointNumber, BreakpointNumber) {
        let mut sim = SimInferior::new();
        let outer = FrameId { stack: 0x7ff0, code: 0x1000 };
        let inner = FrameId { stack: 0x7fe0, code: 0x1100 };
        sim.push_frame(T1, outer, 0);
        sim.push_frame(T1, inner, 0x1044);
        sim.add_local("count", 0x7fd0, 4, inner);
        let mut engine = Engine::new(sim, Config::default());
        let n = engine.watch("count", WatchKind::Write, None, T1).unwrap();
        let guard = engine.breakpoint(n).unwrap().related.unwrap();
        (engine, n, guard)
    }

    fn assert_deleted_with_guard(
        engine: &mut Engine<SimInferior>,
        n: BreakpointNumber,
        guard: BreakpointNumber,
    ) {
        assert!(engine.breakpoint(n).is_none());
        assert!(engine.breakpoint(guard).is_none());
        assert!(engine.store().is_empty());
        let warnings = engine.take_warnings();
        assert!(
            warnings.iter().any(|w| w.contains("left the block")),
            "{:?}",
            warnings
        );
    }

    #[test]
    fn test_enable_after_scope_exit_deletes() {
        let (mut engine, n, guard) = engine_in_frame();
        engine.disable(n).unwrap();
        engine.inferior_mut().pop_frame(T1);

        let err = engine.enable(n).unwrap_err();
        assert_eq!(err.code(), "SCOPE_EXITED");
        assert_deleted_with_guard(&mut engine, n, guard);
    }

    #[test]
    fn test_refresh_after_scope_exit_deletes() {
        let (mut engine, n, guard) = engine_in_frame();
        engine.insert_all();
        engine.inferior_mut().pop_frame(T1);

        engine.refresh_hardware_watchpoints();
        assert_deleted_with_guard(&mut engine, n, guard);
        assert!(engine.inferior().hw_watchpoints().is_empty());
        assert_ne!(engine.inferior().bytes(0x1044, 1), vec![0xcc]);
    }

    #[test]
    fn test_inferior_call_ending_after_scope_exit_deletes() {
        let (mut engine, n, guard) = engine_in_frame();
        engine.begin_inferior_call();
        engine.inferior_mut().pop_frame(T1);

        engine.end_inferior_call();
        assert_deleted_with_guard(&mut engine, n, guard);
    }

    #[test]
    fn test_rewatch_without_free_slots_disables() {
        let mut sim = SimInferior::new();
        sim.add_variable("ptr", 0x3000, 8);
        sim.set_value("ptr", 0x4000);
        sim.add_variable("x", 0x2000, 4);
        sim.set_hw_capacity(HwResource::Watchpoint, 3);
        let mut engine = Engine::new(sim, Config::default());
        let access = engine.watch("*ptr", WatchKind::Access, None, T1).unwrap();
        let write = engine.watch("x", WatchKind::Write, None, T1).unwrap();
        engine.insert_all();
        assert_eq!(engine.inferior().hw_watchpoints().len(), 3);

        // Another user of the debug registers takes one away
        engine
            .inferior_mut()
            .set_hw_capacity(HwResource::Watchpoint, 2);
        engine.inferior_mut().set_value("ptr", 0x5000);
        engine.refresh_hardware_watchpoints();

        let bp = engine.breakpoint(access).unwrap();
        assert_eq!(bp.enable_state, EnableState::Disabled);
        assert_eq!(bp.watch.as_ref().unwrap().mode, WatchMode::Hardware);
        assert_eq!(engine.store().locations_of(access).len(), 2);
        let watched: Vec<MemoryRange> = engine
            .inferior()
            .hw_watchpoints()
            .into_iter()
            .map(|(range, _)| range)
            .collect();
        assert_eq!(watched, vec![MemoryRange::new(0x2000, 4)]);
        let warnings = engine.take_warnings();
        assert!(
            warnings.iter().any(|w| w.starts_with("Watchpoint 1 disabled")),
            "{:?}",
            warnings
        );

        engine.delete(write).unwrap();
        engine.enable(access).unwrap();
        let ranges: Vec<MemoryRange> = engine
            .store()
            .locations_of(access)
            .into_iter()
            .filter_map(|id| match engine.store().location(id)?.kind {
                LocationKind::HardwareWatch { range, .. } => Some(range),
                _ => None,
            })
            .collect();
        assert_eq!(
            ranges,
            vec![MemoryRange::new(0x3000, 8), MemoryRange::new(0x5000, 4)]
        );
    }

    #[test]
    fn test_refresh_follows_moved_pointer() {
        let mut sim = SimInferior::new();
        sim.add_variable("ptr", 0x3000, 8);
        sim.set_value("ptr", 0x4000);
        let mut engine = Engine::new(sim, Config::default());
        let n = engine.watch("*ptr", WatchKind::Write, None, T1).unwrap();
        engine.insert_all();

        engine.inferior_mut().set_value("ptr", 0x5000);
        engine.refresh_hardware_watchpoints();
        let watched: Vec<MemoryRange> = engine
            .inferior()
            .hw_watchpoints()
            .into_iter()
            .map(|(range, _)| range)
            .collect();
        assert_eq!(
            watched,
            vec![MemoryRange::new(0x3000, 8), MemoryRange::new(0x5000, 4)]
        );
        assert_eq!(engine.store().locations_of(n).len(), 2);
        assert!(engine.inferior().stopped_data_address().is_none());
    }
}
