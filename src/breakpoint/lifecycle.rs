//! Module and symbol lifecycle
//!
//! Symbol and module changes only mark breakpoints; the actual
//! re-resolution happens in `prepare_resume`, right before the target runs
//! again. Classification stays cheap that way.

use super::insertion::InsertReport;
use super::registry::location_kind_for;
use super::{
    Breakpoint, BreakpointNumber, Condition, EnableState, InternalKind, LocationSpec,
    ResolutionState,
};
use crate::common::{coalesce, Error, Result};
use crate::engine::Engine;
use crate::target::{HwResource, Inferior, ModuleId, ResolveError};

/// Result of `resolve_pending`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutcome {
    /// Resolved to exactly one location under the original number
    Resolved(BreakpointNumber),
    /// Resolved to several locations; one fresh breakpoint each
    FannedOut(Vec<BreakpointNumber>),
    StillPending,
}

impl<I: Inferior> Engine<I> {
    /// Symbols changed in `module` (or everywhere)
    pub fn on_symbols_changed(&mut self, module: Option<ModuleId>) {
        let mut marked = 0;
        for number in self.store.numbers() {
            let Some(bp) = self.store.get_mut(number) else {
                continue;
            };
            let affected = module.is_none() || bp.module == module || bp.is_pending();
            if !affected {
                continue;
            }
            if let Some(condition) = bp.condition.as_mut() {
                condition.compiled = None;
            }
            if let Some(watch) = bp.watch.as_mut() {
                watch.compiled = None;
            }
            if bp.kind.is_address_based() && !bp.is_internal() {
                bp.needs_reresolve = true;
                marked += 1;
            }
        }
        tracing::debug!(?module, marked, "Symbols changed");
    }

    pub fn on_module_loaded(&mut self, module: ModuleId) {
        for number in self.store.numbers() {
            let Some(bp) = self.store.get_mut(number) else {
                continue;
            };
            if bp.enable_state == EnableState::DisabledUnloadedLibrary && bp.module == Some(module)
            {
                bp.enable_state = EnableState::Enabled;
                bp.needs_reresolve = true;
            }
            if bp.is_pending() || bp.module == Some(module) {
                bp.needs_reresolve = true;
            }
        }
        self.on_symbols_changed(Some(module));
    }

    /// Drop everything anchored in an unloaded module
    ///
    /// The memory is already gone, so locations are forgotten without
    /// restoring shadow bytes. User breakpoints wait for the module to come
    /// back; internal hooks in the module are deleted.
    pub fn on_module_unloaded(&mut self, module: ModuleId) {
        let mut internal = Vec::new();
        let mut waiting = Vec::new();

        for number in self.store.numbers() {
            let in_module: Vec<_> = self
                .store
                .locations_of(number)
                .into_iter()
                .filter(|id| {
                    self.store
                        .location(*id)
                        .is_some_and(|loc| loc.module == Some(module))
                })
                .collect();
            if in_module.is_empty() {
                continue;
            }
            if number.is_internal() {
                internal.push(number);
                continue;
            }

            for id in &in_module {
                if let Some(loc) = self.store.location_mut(*id) {
                    loc.inserted = false;
                    loc.shadow = None;
                    loc.placed_at = None;
                }
                self.store.remove_location(*id);
            }
            if let Some(bp) = self.store.get_mut(number) {
                bp.module = Some(module);
                if bp.locations.is_empty() {
                    bp.resolution = ResolutionState::AwaitingModuleReload;
                    waiting.push(number);
                }
            }
        }

        for number in &internal {
            for id in self.store.locations_of(*number) {
                if let Some(loc) = self.store.location_mut(id) {
                    loc.inserted = false;
                    loc.shadow = None;
                }
            }
            // Nothing left in the target to fail on
            let _ = self.delete(*number);
        }

        let name = self
            .inferior
            .module_info(module)
            .map(|info| info.name)
            .unwrap_or_else(|| format!("#{}", module.0));
        if !waiting.is_empty() {
            self.warn(format!(
                "Breakpoints {} pending until {} is loaded again",
                coalesce(&waiting),
                name
            ));
        }
        tracing::debug!(
            module = %name,
            waiting = waiting.len(),
            dropped_internal = internal.len(),
            "Module unloaded"
        );
    }

    /// Resolve a pending breakpoint, or re-resolve a resolved one in place
    pub fn resolve_pending(&mut self, number: BreakpointNumber) -> Result<PendingOutcome> {
        let bp = self
            .store
            .get(number)
            .ok_or(Error::BreakpointNotFound(number))?;
        let text = bp
            .spec_text
            .clone()
            .ok_or_else(|| Error::InvalidArgument(format!("{} has no location spec", number)))?;
        let was_pending = bp.is_pending();
        let spec = LocationSpec::parse(&text)?;

        let resolution = match self.inferior.resolve(&spec) {
            Ok(resolution) => resolution,
            Err(ResolveError::NotFound(_)) => {
                self.breakpoint_mut(number)?.needs_reresolve = false;
                if was_pending {
                    return Ok(PendingOutcome::StillPending);
                }
                // Everything it pointed at is gone
                self.replace_locations(number, &[])?;
                self.breakpoint_mut(number)?.resolution = ResolutionState::Pending;
                return Ok(PendingOutcome::StillPending);
            }
            Err(ResolveError::Invalid(message)) => return Err(Error::InvalidArgument(message)),
        };
        let matches = resolution.matches;

        if was_pending && matches.len() > 1 {
            return self.fan_out(number, resolution.canonical, &matches);
        }

        let template = self
            .store
            .get(number)
            .ok_or(Error::BreakpointNotFound(number))?;
        if template.kind == super::BreakpointKind::Hardware && template.enable_state.is_active() {
            let already = self.store.locations_of(number).len();
            self.check_hw_capacity(HwResource::Breakpoint, matches.len().saturating_sub(already))?;
        }

        self.replace_locations(number, &matches)?;
        let bp = self.breakpoint_mut(number)?;
        bp.resolution = ResolutionState::Resolved;
        bp.canonical = Some(resolution.canonical);
        bp.module = matches.first().and_then(|m| m.module);
        bp.needs_reresolve = false;
        if bp.enable_state == EnableState::DisabledUnloadedLibrary {
            bp.enable_state = EnableState::Enabled;
        }
        self.check_duplicates(number);
        if was_pending {
            tracing::info!(number = %number, "Pending breakpoint resolved");
        }
        Ok(PendingOutcome::Resolved(number))
    }

    /// Swap a breakpoint's code locations for a fresh set of matches
    fn replace_locations(
        &mut self,
        number: BreakpointNumber,
        matches: &[crate::target::ResolvedMatch],
    ) -> Result<()> {
        let existing: Vec<_> = self.store.locations_of(number);
        let same = existing.len() == matches.len()
            && existing.iter().zip(matches).all(|(id, m)| {
                self.store
                    .location(*id)
                    .is_some_and(|loc| loc.requested_address == m.address && loc.section == m.section)
            });
        if same {
            return Ok(());
        }

        let kind = self
            .store
            .get(number)
            .map(|bp| location_kind_for(&bp.kind))
            .ok_or(Error::BreakpointNotFound(number))?;
        let state = self.breakpoint_mut(number)?.enable_state;
        self.breakpoint_mut(number)?.enable_state = EnableState::Disabled;
        self.lift_breakpoint(number);
        for id in existing {
            self.store.remove_location(id);
        }
        self.breakpoint_mut(number)?.enable_state = state;

        for m in matches {
            self.add_resolved_location(number, m, kind.clone())?;
        }
        Ok(())
    }

    fn fan_out(
        &mut self,
        number: BreakpointNumber,
        canonical: String,
        matches: &[crate::target::ResolvedMatch],
    ) -> Result<PendingOutcome> {
        let template: Breakpoint = self
            .store
            .get(number)
            .cloned()
            .ok_or(Error::BreakpointNotFound(number))?;
        if template.kind == super::BreakpointKind::Hardware && template.enable_state.is_active() {
            self.check_hw_capacity(HwResource::Breakpoint, matches.len())?;
        }

        let mut created = Vec::with_capacity(matches.len());
        for m in matches {
            let fresh = self.store.allocate_number(false);
            let mut bp = Breakpoint::new(fresh, template.kind.clone());
            bp.enable_state = match template.enable_state {
                EnableState::DisabledUnloadedLibrary => EnableState::Enabled,
                other => other,
            };
            bp.disposition = template.disposition;
            bp.condition = template
                .condition
                .as_ref()
                .map(|c| Condition::new(c.text.clone()));
            bp.ignore_count = template.ignore_count;
            bp.thread = template.thread;
            bp.commands = template.commands.clone();
            bp.spec_text = template.spec_text.clone();
            bp.canonical = Some(canonical.clone());
            bp.module = m.module;
            self.store.insert_breakpoint(bp);
            self.add_resolved_location(fresh, m, location_kind_for(&template.kind))?;
            self.check_duplicates(fresh);
            created.push(fresh);
        }
        self.delete(number)?;
        tracing::info!(
            pending = %number,
            created = %coalesce(&created),
            "Pending breakpoint resolved to several locations"
        );
        Ok(PendingOutcome::FannedOut(created))
    }

    /// Bring the target up to date before it runs
    ///
    /// Re-resolves everything marked since the last stop, installs every
    /// location that should be in, and sets global single-stepping.
    pub fn prepare_resume(&mut self) -> InsertReport {
        let marked: Vec<BreakpointNumber> = self
            .store
            .iter()
            .filter(|bp| bp.needs_reresolve && bp.spec_text.is_some())
            .map(|bp| bp.number)
            .collect();
        for number in marked {
            if let Err(e) = self.resolve_pending(number) {
                tracing::warn!(breakpoint = %number, error = %e, "Re-resolution failed");
                if let Some(bp) = self.store.get_mut(number) {
                    bp.needs_reresolve = false;
                }
            }
        }

        let report = self.insert_all();
        self.update_global_single_step();
        report
    }

    /// Park active watchpoints while the debugger runs code in the target
    pub fn begin_inferior_call(&mut self) {
        let parked: Vec<BreakpointNumber> = self
            .store
            .iter()
            .filter(|bp| bp.kind.is_watchpoint() && bp.enable_state == EnableState::Enabled)
            .map(|bp| bp.number)
            .collect();
        for number in &parked {
            if let Some(bp) = self.store.get_mut(*number) {
                bp.enable_state = EnableState::DisabledDuringCall;
            }
            self.lift_breakpoint(*number);
        }
        tracing::debug!(parked = parked.len(), "Inferior call starting");
        self.parked_for_call.extend(parked);
        self.update_global_single_step();
    }

    /// Restore watchpoints parked by `begin_inferior_call`
    pub fn end_inferior_call(&mut self) {
        for number in std::mem::take(&mut self.parked_for_call) {
            let Some(bp) = self.store.get_mut(number) else {
                continue;
            };
            if bp.enable_state != EnableState::DisabledDuringCall {
                continue;
            }
            bp.enable_state = EnableState::Enabled;
            // The call may have changed the watched value
            // Failures delete or disable the watchpoint and say so
            if let Err(e) = self.update_watchpoint(number) {
                tracing::debug!(breakpoint = %number, error = %e, "Watchpoint not restored");
            }
        }
        self.update_global_single_step();
    }

    /// Drop every internal module-event hook
    pub fn remove_module_event_hooks(&mut self) {
        let hooks: Vec<BreakpointNumber> = self
            .store
            .iter()
            .filter(|bp| bp.kind.internal_kind() == Some(InternalKind::ModuleEvent))
            .map(|bp| bp.number)
            .collect();
        for number in hooks {
            let _ = self.delete(number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::{CreateRequest, WatchKind};
    use crate::common::config::Config;
    use crate::target::sim::SimInferior;
    use crate::target::ThreadId;
    use pretty_assertions::assert_eq;

    const LIBFOO: ModuleId = ModuleId(7);

    fn engine() -> Engine<SimInferior> {
        let mut sim = SimInferior::new();
        sim.add_function("main", 0x1000, None);
        sim.add_variable("x", 0x2000, 4);
        Engine::new(sim, Config::default())
    }

    fn load_libfoo(engine: &mut Engine<SimInferior>) {
        let sim = engine.inferior_mut();
        sim.add_module(LIBFOO, "libfoo.so", true);
        sim.add_function("foo", 0x7000, Some(LIBFOO));
        sim.add_function("foo_init", 0x7100, Some(LIBFOO));
        sim.write_bytes(0x7000, &[0x31, 0xc0]);
        engine.on_module_loaded(LIBFOO);
    }

    #[test]
    fn test_pending_resolves_under_same_number() {
        let mut engine = engine();
        let n = engine
            .create(CreateRequest::new("foo").condition("x > 1").ignore(3))
            .unwrap();
        engine.set_commands(n, vec!["print x".into()]).unwrap();
        assert!(engine.breakpoint(n).unwrap().is_pending());
        assert_eq!(engine.resolve_pending(n).unwrap(), PendingOutcome::StillPending);

        load_libfoo(&mut engine);
        assert_eq!(engine.resolve_pending(n).unwrap(), PendingOutcome::Resolved(n));
        let bp = engine.breakpoint(n).unwrap();
        assert_eq!(bp.resolution, ResolutionState::Resolved);
        assert!(bp.enable_state.is_active());
        assert_eq!(bp.condition.as_ref().unwrap().text, "x > 1");
        assert_eq!(bp.ignore_count, 3);
        assert_eq!(bp.commands, vec!["print x".to_string()]);
        let loc = engine.store().locations_of(n)[0];
        assert_eq!(engine.store().location(loc).unwrap().address, 0x7000);
    }

    #[test]
    fn test_pending_fans_out_into_new_numbers() {
        let mut engine = engine();
        let n = engine
            .create(CreateRequest::new("init").condition("x == 2"))
            .unwrap();
        let sim = engine.inferior_mut();
        sim.add_module(ModuleId(1), "liba.so", true);
        sim.add_module(ModuleId(2), "libb.so", true);
        sim.add_function("init", 0x7000, Some(ModuleId(1)));
        sim.add_function("init", 0x9000, Some(ModuleId(2)));

        let outcome = engine.resolve_pending(n).unwrap();
        let PendingOutcome::FannedOut(created) = outcome else {
            panic!("expected fan-out, got {:?}", outcome);
        };
        assert_eq!(created, vec![BreakpointNumber(2), BreakpointNumber(3)]);
        assert!(engine.breakpoint(n).is_none());
        for number in created {
            let bp = engine.breakpoint(number).unwrap();
            assert_eq!(bp.locations.len(), 1);
            assert_eq!(bp.condition.as_ref().unwrap().text, "x == 2");
        }
    }

    #[test]
    fn test_unload_and_reload() {
        let mut engine = engine();
        load_libfoo(&mut engine);
        let n = engine.create(CreateRequest::new("foo")).unwrap();
        let hook = engine
            .create_internal(InternalKind::ModuleEvent, 0x7100, None, None)
            .unwrap();
        engine.prepare_resume();
        assert_eq!(engine.inferior().bytes(0x7000, 1), vec![0xcc]);
        let writes = engine.inferior().write_count(0x7000);
        engine.take_warnings();

        engine.inferior_mut().unload_module(LIBFOO);
        engine.on_module_unloaded(LIBFOO);
        let bp = engine.breakpoint(n).unwrap();
        assert_eq!(bp.resolution, ResolutionState::AwaitingModuleReload);
        assert!(bp.locations.is_empty());
        assert!(engine.breakpoint(hook).is_none());
        assert_eq!(engine.inferior().write_count(0x7000), writes);
        assert_eq!(
            engine.take_warnings(),
            vec!["Breakpoints 1 pending until libfoo.so is loaded again".to_string()]
        );

        engine.inferior_mut().write_bytes(0x7000, &[0x31]);
        engine.inferior_mut().load_module(LIBFOO);
        engine.on_module_loaded(LIBFOO);
        let report = engine.prepare_resume();
        assert_eq!(report.inserted, 1);
        assert!(!engine.breakpoint(n).unwrap().is_pending());
        assert_eq!(engine.inferior().bytes(0x7000, 1), vec![0xcc]);
    }

    #[test]
    fn test_library_disabled_breakpoint_comes_back() {
        let mut engine = engine();
        load_libfoo(&mut engine);
        let n = engine.create(CreateRequest::new("foo")).unwrap();
        engine.inferior_mut().protect(0x7000);
        engine.prepare_resume();
        assert_eq!(
            engine.breakpoint(n).unwrap().enable_state,
            EnableState::DisabledUnloadedLibrary
        );

        engine.inferior_mut().unprotect(0x7000);
        engine.on_module_loaded(LIBFOO);
        engine.prepare_resume();
        assert_eq!(engine.breakpoint(n).unwrap().enable_state, EnableState::Enabled);
        assert_eq!(engine.inferior().bytes(0x7000, 1), vec![0xcc]);
    }

    #[test]
    fn test_symbols_changed_recompiles_lazily() {
        let mut engine = engine();
        let n = engine.create(CreateRequest::new("main").condition("x == 0")).unwrap();
        engine.classify_stop(&crate::breakpoint::StopEvent::new(0x1000, ThreadId(1)));
        assert!(engine.breakpoint(n).unwrap().condition.as_ref().unwrap().compiled.is_some());

        engine.on_symbols_changed(None);
        let bp = engine.breakpoint(n).unwrap();
        assert!(bp.condition.as_ref().unwrap().compiled.is_none());
        assert!(bp.needs_reresolve);
        assert_eq!(engine.store().locations_of(n).len(), 1);

        engine.prepare_resume();
        assert!(!engine.breakpoint(n).unwrap().needs_reresolve);
    }

    #[test]
    fn test_reresolve_moves_location() {
        let mut engine = engine();
        let n = engine.create(CreateRequest::new("main")).unwrap();
        engine.prepare_resume();

        engine.inferior_mut().add_function("main", 0x1400, None);
        engine.on_symbols_changed(None);
        engine.prepare_resume();
        let addresses: Vec<u64> = engine
            .store()
            .locations_of(n)
            .into_iter()
            .map(|id| engine.store().location(id).unwrap().address)
            .collect();
        assert_eq!(addresses, vec![0x1000, 0x1400]);
    }

    #[test]
    fn test_inferior_call_parks_watchpoints() {
        let mut engine = engine();
        let w = engine.watch("x", WatchKind::Write, None, ThreadId(1)).unwrap();
        engine.prepare_resume();
        assert_eq!(engine.inferior().hw_watchpoints().len(), 1);

        engine.begin_inferior_call();
        assert_eq!(
            engine.breakpoint(w).unwrap().enable_state,
            EnableState::DisabledDuringCall
        );
        assert!(engine.inferior().hw_watchpoints().is_empty());

        engine.inferior_mut().set_value("x", 42);
        engine.end_inferior_call();
        let bp = engine.breakpoint(w).unwrap();
        assert_eq!(bp.enable_state, EnableState::Enabled);
        assert_eq!(
            bp.watch.as_ref().unwrap().old_value.as_ref().unwrap().display,
            "42"
        );
        engine.prepare_resume();
        assert_eq!(engine.inferior().hw_watchpoints().len(), 1);
    }
}
