//! Stop classification
//!
//! `classify_stop` turns one raw stop into an [`ExplanationRecord`] per
//! candidate breakpoint and folds their outcome classes into a single
//! [`ActionClass`]. Hit and ignore bookkeeping happens here whether or not
//! the stop ends up being reported.
//!
//! Conditions and hit commands can run code in the target. Every
//! classification carries a [`ClassifyToken`] holding the target's run
//! generation at the time of the stop; once the generation moves, whatever
//! is left of the classification is stale and gets abandoned.

use serde::{Deserialize, Serialize};

use super::kind::{ops_for, StopContext};
use super::{
    BreakpointKind, BreakpointNumber, Disposition, EnableState, InternalKind, WatchCheck,
    WatchKind, WatchMode,
};
use crate::common::{Error, Result};
use crate::engine::Engine;
use crate::target::{Address, EvalScope, Inferior, NativeEvent, ThreadId, Value};

/// What the target says about data watchpoints for this stop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchHint {
    #[default]
    No,
    Yes,
    /// Software watchpoints single-step, so every stop might be one
    Maybe,
}

/// A raw stop as reported by the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopEvent {
    pub address: Address,
    pub thread: ThreadId,
    #[serde(default)]
    pub hint: WatchHint,
}

impl StopEvent {
    pub fn new(address: Address, thread: ThreadId) -> Self {
        Self {
            address,
            thread,
            hint: WatchHint::No,
        }
    }

    pub fn with_hint(mut self, hint: WatchHint) -> Self {
        self.hint = hint;
        self
    }
}

/// Per-candidate outcome, the row index of the action table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    NoEffect,
    /// Hit a trap we are not stopping for; step over it
    BpNoStop,
    BpSilent,
    BpNoisy,
    WpSilent,
    WpNoisy,
    StepResume,
    ModuleEvent,
}

/// What the caller should do next, in increasing priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    KeepChecking,
    SingleStepOver,
    StopSilent,
    StopNoisy,
    StepResume,
    CheckModules,
    CheckModulesThenStop,
}

impl ActionClass {
    pub fn stops(self) -> bool {
        matches!(
            self,
            Self::StopSilent | Self::StopNoisy | Self::CheckModulesThenStop
        )
    }
}

const KC: ActionClass = ActionClass::KeepChecking;
const SSO: ActionClass = ActionClass::SingleStepOver;
const SS: ActionClass = ActionClass::StopSilent;
const SN: ActionClass = ActionClass::StopNoisy;
const SR: ActionClass = ActionClass::StepResume;
const CM: ActionClass = ActionClass::CheckModules;
const CMS: ActionClass = ActionClass::CheckModulesThenStop;

/// `TABLE[outcome][current]` is the action after folding in `outcome`
#[rustfmt::skip]
const TABLE: [[ActionClass; 7]; 8] = [
    //                 KC   SSO  SS   SN   SR   CM   CMS
    /* NoEffect    */ [KC,  SSO, SS,  SN,  SR,  CM,  CMS],
    /* BpNoStop    */ [SSO, SSO, SS,  SN,  SR,  CM,  CMS],
    /* BpSilent    */ [SS,  SS,  SS,  SN,  SR,  CMS, CMS],
    /* BpNoisy     */ [SN,  SN,  SN,  SN,  SR,  CMS, CMS],
    /* WpSilent    */ [SS,  SS,  SS,  SN,  SR,  CMS, CMS],
    /* WpNoisy     */ [SN,  SN,  SN,  SN,  SR,  CMS, CMS],
    /* StepResume  */ [SR,  SR,  SR,  SR,  SR,  CM,  CMS],
    /* ModuleEvent */ [CM,  CM,  CMS, CMS, CM,  CM,  CMS],
];

/// Fold one outcome into the running action
pub fn fold_action(current: ActionClass, outcome: OutcomeClass) -> ActionClass {
    TABLE[outcome as usize][current as usize]
}

/// Why one breakpoint did (or did not) stop the program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplanationRecord {
    pub breakpoint: BreakpointNumber,
    pub stop: bool,
    pub print: bool,
    /// Hit commands still to run, `silent` stripped
    pub commands: Vec<String>,
    pub outcome: OutcomeClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_error: Option<String>,
}

impl ExplanationRecord {
    fn new(breakpoint: BreakpointNumber, outcome: OutcomeClass) -> Self {
        Self {
            breakpoint,
            stop: false,
            print: false,
            commands: Vec::new(),
            outcome,
            old_value: None,
            new_value: None,
            message: None,
            condition_error: None,
        }
    }
}

/// Result of `classify_stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopDecision {
    pub action: ActionClass,
    pub explanations: Vec<ExplanationRecord>,
    /// The target ran again during classification; nothing here is current
    pub abandoned: bool,
}

impl StopDecision {
    fn empty() -> Self {
        Self {
            action: ActionClass::KeepChecking,
            explanations: Vec::new(),
            abandoned: false,
        }
    }

    pub fn should_stop(&self) -> bool {
        !self.abandoned && self.explanations.iter().any(|r| r.stop)
    }

    pub fn record(&self, number: BreakpointNumber) -> Option<&ExplanationRecord> {
        self.explanations.iter().find(|r| r.breakpoint == number)
    }
}

/// Snapshot identifying one classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyToken {
    pub generation: u64,
    pub address: Address,
    pub thread: ThreadId,
}

/// Where the engine is in handling a stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyPhase {
    Idle,
    Classifying(ClassifyToken),
    RunningCommands(ClassifyToken),
}

/// Per-candidate outcome before folding
struct Explained {
    record: ExplanationRecord,
    hardware_watch_changed: bool,
}

impl<I: Inferior> Engine<I> {
    pub fn phase(&self) -> &ClassifyPhase {
        &self.phase
    }

    /// Classify a stop
    #[tracing::instrument(skip(self, event), fields(address = event.address, thread = event.thread.0))]
    pub fn classify_stop(&mut self, event: &StopEvent) -> StopDecision {
        let token = ClassifyToken {
            generation: self.inferior.run_generation(),
            address: event.address,
            thread: event.thread,
        };
        self.phase = ClassifyPhase::Classifying(token.clone());

        let ctx = StopContext {
            address: event.address,
            thread: event.thread,
            hint: event.hint,
            event: self.inferior.native_event(),
        };
        let candidates = self.candidates(&ctx);
        tracing::debug!(?candidates, "Stop candidates");

        let mut decision = StopDecision::empty();
        let mut changed_hardware = Vec::new();
        for number in candidates {
            let Some(explained) = self.explain(number, &ctx) else {
                continue;
            };
            if explained.hardware_watch_changed {
                changed_hardware.push(number);
            }
            decision.action = fold_action(decision.action, explained.record.outcome);
            decision.explanations.push(explained.record);

            if self.inferior.run_generation() != token.generation {
                tracing::debug!(breakpoint = %number, "Target resumed during classification");
                self.phase = ClassifyPhase::Idle;
                return StopDecision {
                    abandoned: true,
                    ..StopDecision::empty()
                };
            }
        }

        if self.config.modules.stop_on_event
            && decision
                .explanations
                .iter()
                .any(|r| r.outcome == OutcomeClass::ModuleEvent)
        {
            decision.action = fold_action(decision.action, OutcomeClass::BpNoisy);
        }

        if changed_hardware.is_empty() {
            self.refresh_hardware_watchpoints();
        } else {
            for number in changed_hardware {
                if let Err(e) = self.update_watchpoint(number) {
                    tracing::debug!(breakpoint = %number, error = %e, "Watchpoint not updated");
                }
            }
        }

        let pending_commands = decision.explanations.iter().any(|r| !r.commands.is_empty());
        self.phase = if pending_commands {
            ClassifyPhase::RunningCommands(token)
        } else {
            ClassifyPhase::Idle
        };
        tracing::debug!(action = ?decision.action, "Classified stop");
        decision
    }

    fn candidates(&self, ctx: &StopContext) -> Vec<BreakpointNumber> {
        let mut candidates: Vec<BreakpointNumber> = self
            .store
            .iter()
            .filter(|bp| bp.should_be_inserted())
            .filter(|bp| ops_for(&bp.kind).matches_stop(bp, &self.store, ctx, &self.inferior))
            .map(|bp| bp.number)
            .collect();

        // A scope-guard hit makes its watchpoint a candidate too
        let guarded: Vec<BreakpointNumber> = candidates
            .iter()
            .filter_map(|n| self.store.get(*n))
            .filter(|bp| bp.kind.internal_kind() == Some(InternalKind::WatchpointScope))
            .filter_map(|bp| bp.related)
            .filter(|w| self.store.get(*w).is_some_and(|bp| bp.enable_state.is_active()))
            .collect();
        for watchpoint in guarded {
            if !candidates.contains(&watchpoint) {
                candidates.push(watchpoint);
            }
        }
        candidates
    }

    fn explain(&mut self, number: BreakpointNumber, ctx: &StopContext) -> Option<Explained> {
        let bp = self.store.get(number)?;
        let kind = bp.kind.clone();
        let frame = bp.frame;
        let thread = bp.thread;
        let hardware_watch = bp
            .watch
            .as_ref()
            .is_some_and(|w| w.mode == WatchMode::Hardware);

        let mut explained = Explained {
            record: ExplanationRecord::new(number, no_stop_outcome(&kind)),
            hardware_watch_changed: false,
        };
        let record = &mut explained.record;

        match &kind {
            BreakpointKind::Watchpoint { .. } => match self.check_watchpoint(number) {
                Ok(WatchCheck::Deleted) => {
                    record.stop = true;
                    record.print = true;
                    record.outcome = OutcomeClass::WpNoisy;
                    record.message = Some(format!(
                        "Watchpoint {} deleted because the program has left the block in which its expression is valid.",
                        number
                    ));
                    return Some(explained);
                }
                Ok(WatchCheck::Failed(message)) => {
                    record.stop = true;
                    record.print = true;
                    record.outcome = OutcomeClass::WpNoisy;
                    record.message = Some(format!(
                        "Error evaluating expression for watchpoint {}: {}; watchpoint disabled",
                        number, message
                    ));
                    return Some(explained);
                }
                Ok(WatchCheck::Unchanged) => return Some(explained),
                Ok(WatchCheck::Changed { old, new }) => {
                    record.old_value = old;
                    record.new_value = Some(new);
                    explained.hardware_watch_changed = hardware_watch;
                }
                Err(e) => {
                    tracing::warn!(breakpoint = %number, error = %e, "Cannot check watchpoint");
                    return Some(explained);
                }
            },
            BreakpointKind::Internal { kind: internal } => {
                if thread.is_some_and(|t| t != ctx.thread) {
                    return Some(explained);
                }
                if let Some(frame) = frame {
                    if self.inferior.current_frame(ctx.thread) != Some(frame) {
                        return Some(explained);
                    }
                }
                match internal {
                    InternalKind::WatchpointScope => return Some(explained),
                    InternalKind::StepResume => {
                        record.outcome = OutcomeClass::StepResume;
                        return Some(explained);
                    }
                    InternalKind::ModuleEvent => {
                        record.outcome = OutcomeClass::ModuleEvent;
                        record.stop = self.config.modules.stop_on_event;
                        record.print = record.stop;
                        return Some(explained);
                    }
                }
            }
            BreakpointKind::Catchpoint { kind: catch } => {
                if !catch.exception_type_matches(&mut self.inferior) {
                    return Some(explained);
                }
            }
            BreakpointKind::Software | BreakpointKind::Hardware => {}
        }

        self.check_hit(number, ctx, &mut explained.record);
        Some(explained)
    }

    /// Thread, condition, hit count, ignore count, disposition
    fn check_hit(&mut self, number: BreakpointNumber, ctx: &StopContext, record: &mut ExplanationRecord) {
        let Some(bp) = self.store.get(number) else {
            return;
        };
        if bp.thread.is_some_and(|t| t != ctx.thread) {
            return;
        }

        if let Some(condition) = bp.condition.clone() {
            let compiled = match condition.compiled {
                Some(compiled) => Ok(compiled),
                None => {
                    let scope = EvalScope {
                        frame: self.inferior.current_frame(ctx.thread),
                        address: Some(ctx.address),
                    };
                    self.inferior.compile(&condition.text, &scope)
                }
            };
            let verdict = compiled.and_then(|compiled| {
                if let Some(c) = self.store.get_mut(number).and_then(|bp| bp.condition.as_mut()) {
                    c.compiled = Some(compiled.clone());
                }
                self.inferior.evaluate(&compiled, ctx.thread)
            });
            match verdict {
                Ok(eval) if !eval.value.is_true() => return,
                Ok(_) => {}
                Err(e) => {
                    // Fail open: a broken condition must not hide a hit
                    self.warn(Error::condition_eval(number, &e.to_string()).to_string());
                    record.condition_error = Some(e.to_string());
                }
            }
        }

        let Some(bp) = self.store.get_mut(number) else {
            return;
        };
        bp.hit_count += 1;
        if bp.ignore_count > 0 {
            bp.ignore_count -= 1;
            tracing::debug!(breakpoint = %number, remaining = bp.ignore_count, "Ignored hit");
            return;
        }

        record.stop = true;
        record.print = !bp.is_silent();
        record.commands = bp
            .commands
            .iter()
            .skip(usize::from(bp.is_silent()))
            .cloned()
            .collect();
        record.outcome = match (bp.kind.is_watchpoint(), record.print) {
            (true, true) => OutcomeClass::WpNoisy,
            (true, false) => OutcomeClass::WpSilent,
            (false, true) => OutcomeClass::BpNoisy,
            (false, false) => OutcomeClass::BpSilent,
        };
        record.message = Some(self.stop_message(number, ctx.event.as_ref(), record));

        let disable = self
            .store
            .get(number)
            .is_some_and(|bp| bp.disposition == Disposition::Disable);
        if disable {
            if let Some(bp) = self.store.get_mut(number) {
                bp.enable_state = EnableState::Disabled;
            }
            self.lift_breakpoint(number);
            self.update_global_single_step();
        }
    }

    fn stop_message(
        &self,
        number: BreakpointNumber,
        event: Option<&NativeEvent>,
        record: &ExplanationRecord,
    ) -> String {
        let Some(bp) = self.store.get(number) else {
            return String::new();
        };
        match &bp.kind {
            BreakpointKind::Catchpoint { kind } => match event {
                Some(event) => kind.event_message(number, event),
                None => format!("Catchpoint {}", number),
            },
            BreakpointKind::Watchpoint { .. } => {
                let label = match (&bp.kind, bp.watch.as_ref().map(|w| w.mode)) {
                    (BreakpointKind::Watchpoint { kind: WatchKind::Read }, _) => {
                        "Hardware read watchpoint"
                    }
                    (BreakpointKind::Watchpoint { kind: WatchKind::Access }, _) => {
                        "Hardware access (read/write) watchpoint"
                    }
                    (_, Some(WatchMode::Hardware)) => "Hardware watchpoint",
                    _ => "Watchpoint",
                };
                let expression = bp.watch.as_ref().map_or("", |w| w.expression.as_str());
                let mut message = format!("{} {}: {}", label, number, expression);
                if let Some(old) = &record.old_value {
                    message.push_str(&format!("\n\nOld value = {}", old));
                }
                if let Some(new) = &record.new_value {
                    let prefix = if record.old_value.is_some() { "\n" } else { "\n\n" };
                    message.push_str(&format!("{}New value = {}", prefix, new));
                }
                message
            }
            _ => {
                let what = if bp.is_temporary() {
                    "Temporary breakpoint"
                } else {
                    "Breakpoint"
                };
                let location = bp
                    .locations
                    .iter()
                    .filter_map(|id| self.store.location(*id))
                    .find(|loc| loc.address == self.phase_address())
                    .map(|loc| loc.describe());
                match location {
                    Some(location) => format!("{} {}, {}", what, number, location),
                    None => format!("{} {}", what, number),
                }
            }
        }
    }

    fn phase_address(&self) -> Address {
        match &self.phase {
            ClassifyPhase::Classifying(token) | ClassifyPhase::RunningCommands(token) => {
                token.address
            }
            ClassifyPhase::Idle => 0,
        }
    }

    /// Run the hit commands of a decision
    ///
    /// Stops as soon as a command resumes the target: the remaining
    /// commands belong to a stop that no longer exists. Returns whether
    /// every command ran.
    pub fn run_stop_commands<F>(&mut self, decision: &mut StopDecision, mut execute: F) -> Result<bool>
    where
        F: FnMut(&mut I, &str) -> Result<()>,
    {
        let generation = self.inferior.run_generation();
        if let ClassifyPhase::Classifying(token) = &self.phase {
            self.phase = ClassifyPhase::RunningCommands(token.clone());
        }

        for i in 0..decision.explanations.len() {
            let commands = std::mem::take(&mut decision.explanations[i].commands);
            for command in commands {
                if let Err(e) = execute(&mut self.inferior, &command) {
                    self.phase = ClassifyPhase::Idle;
                    return Err(e);
                }
                if self.inferior.run_generation() != generation {
                    tracing::debug!(command, "Target resumed by hit command; dropping the rest");
                    for record in decision.explanations.iter_mut() {
                        record.commands.clear();
                    }
                    self.phase = ClassifyPhase::Idle;
                    return Ok(false);
                }
            }
        }
        self.phase = ClassifyPhase::Idle;
        Ok(true)
    }

    /// Delete temporary breakpoints that stopped, and everything marked
    /// delete-at-next-stop
    pub fn breakpoint_auto_delete(&mut self, decision: &StopDecision) -> Vec<BreakpointNumber> {
        let mut doomed: Vec<BreakpointNumber> = decision
            .explanations
            .iter()
            .filter(|r| r.stop)
            .filter(|r| {
                self.store
                    .get(r.breakpoint)
                    .is_some_and(|bp| bp.disposition == Disposition::Delete)
            })
            .map(|r| r.breakpoint)
            .collect();
        doomed.extend(
            self.store
                .iter()
                .filter(|bp| bp.disposition == Disposition::DeleteAtNextStop)
                .map(|bp| bp.number),
        );
        doomed.sort();
        doomed.dedup();

        for number in &doomed {
            // Infallible: deleting a missing number is a no-op
            let _ = self.delete(*number);
        }
        doomed
    }
}

fn no_stop_outcome(kind: &BreakpointKind) -> OutcomeClass {
    if kind.is_address_based() {
        OutcomeClass::BpNoStop
    } else {
        OutcomeClass::NoEffect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::{CatchKind, CreateRequest};
    use crate::common::config::Config;
    use crate::target::sim::SimInferior;
    use crate::target::{FrameId, ModuleId, TargetControl};
    use pretty_assertions::assert_eq;

    const T1: ThreadId = ThreadId(1);

    fn engine() -> Engine<SimInferior> {
        let mut sim = SimInferior::new();
        sim.add_function("main", 0x1000, None);
        sim.add_function("helper", 0x1100, None);
        sim.add_function("reset", 0x1200, None);
        sim.add_variable("x", 0x2000, 4);
        sim.write_bytes(0x1000, &[0x55]);
        Engine::new(sim, Config::default())
    }

    fn stop_at(engine: &mut Engine<SimInferior>, address: Address) -> StopDecision {
        engine.classify_stop(&StopEvent::new(address, T1))
    }

    #[test]
    fn test_table_is_monotonic_for_plain_stops() {
        let outcomes = [
            OutcomeClass::NoEffect,
            OutcomeClass::BpNoStop,
            OutcomeClass::BpSilent,
            OutcomeClass::BpNoisy,
        ];
        for a in outcomes {
            for b in outcomes {
                let ab = fold_action(fold_action(ActionClass::KeepChecking, a), b);
                let ba = fold_action(fold_action(ActionClass::KeepChecking, b), a);
                assert_eq!(ab, ba, "{:?} {:?}", a, b);
            }
        }
        assert_eq!(
            fold_action(ActionClass::StopSilent, OutcomeClass::BpNoisy),
            ActionClass::StopNoisy
        );
        assert_eq!(
            fold_action(ActionClass::StopNoisy, OutcomeClass::BpSilent),
            ActionClass::StopNoisy
        );
    }

    #[test]
    fn test_module_event_with_stop_checks_then_stops() {
        let after_event = fold_action(ActionClass::KeepChecking, OutcomeClass::ModuleEvent);
        assert_eq!(after_event, ActionClass::CheckModules);
        assert_eq!(
            fold_action(after_event, OutcomeClass::BpNoisy),
            ActionClass::CheckModulesThenStop
        );
        assert_eq!(
            fold_action(ActionClass::StopSilent, OutcomeClass::ModuleEvent),
            ActionClass::CheckModulesThenStop
        );
        assert!(ActionClass::CheckModulesThenStop > ActionClass::StepResume);
    }

    #[test]
    fn test_simple_hit() {
        let mut engine = engine();
        let n = engine.create(CreateRequest::new("main")).unwrap();
        engine.insert_all();

        let decision = stop_at(&mut engine, 0x1000);
        assert_eq!(decision.action, ActionClass::StopNoisy);
        let record = decision.record(n).unwrap();
        assert!(record.stop);
        assert!(record.print);
        assert_eq!(record.message.as_deref(), Some("Breakpoint 1, 0x1000 in main"));
        assert_eq!(engine.breakpoint(n).unwrap().hit_count, 1);
        assert_eq!(engine.phase(), &ClassifyPhase::Idle);
    }

    #[test]
    fn test_unrelated_address_keeps_checking() {
        let mut engine = engine();
        engine.create(CreateRequest::new("main")).unwrap();
        let decision = stop_at(&mut engine, 0x1004);
        assert_eq!(decision.action, ActionClass::KeepChecking);
        assert!(decision.explanations.is_empty());
    }

    #[test]
    fn test_ignored_hits_count() {
        let mut engine = engine();
        let n = engine.create(CreateRequest::new("main").ignore(2)).unwrap();

        let stops: Vec<bool> = (0..3)
            .map(|_| stop_at(&mut engine, 0x1000).record(n).unwrap().stop)
            .collect();
        assert_eq!(stops, vec![false, false, true]);
        let bp = engine.breakpoint(n).unwrap();
        assert_eq!(bp.ignore_count, 0);
        assert_eq!(bp.hit_count, 3);
    }

    #[test]
    fn test_ignored_hit_steps_over() {
        let mut engine = engine();
        engine.create(CreateRequest::new("main").ignore(1)).unwrap();
        let decision = stop_at(&mut engine, 0x1000);
        assert_eq!(decision.action, ActionClass::SingleStepOver);
        assert!(!decision.should_stop());
    }

    #[test]
    fn test_false_condition_is_not_a_hit() {
        let mut engine = engine();
        engine.inferior_mut().set_value("x", 2);
        let n = engine.create(CreateRequest::new("main").condition("x > 3")).unwrap();
        assert!(!stop_at(&mut engine, 0x1000).record(n).unwrap().stop);
        assert_eq!(engine.breakpoint(n).unwrap().hit_count, 0);

        engine.inferior_mut().set_value("x", 4);
        assert!(stop_at(&mut engine, 0x1000).record(n).unwrap().stop);
        assert_eq!(engine.breakpoint(n).unwrap().hit_count, 1);
    }

    #[test]
    fn test_condition_compiled_once() {
        let mut engine = engine();
        engine.create(CreateRequest::new("main").condition("x == 0")).unwrap();
        let before = engine.inferior().compile_count();
        stop_at(&mut engine, 0x1000);
        stop_at(&mut engine, 0x1000);
        assert_eq!(engine.inferior().compile_count(), before + 1);
    }

    #[test]
    fn test_malformed_condition_fails_open() {
        for text in ["x ==", "nosuch > 1", "(((", "*"] {
            let mut engine = engine();
            let n = engine.create(CreateRequest::new("main").condition(text)).unwrap();
            let decision = stop_at(&mut engine, 0x1000);
            let record = decision.record(n).unwrap();
            assert!(record.stop, "{}", text);
            assert!(record.condition_error.is_some());
            assert_eq!(engine.take_warnings().len(), 1);
        }
    }

    #[test]
    fn test_thread_mismatch_is_not_a_hit() {
        let mut engine = engine();
        let n = engine
            .create(CreateRequest::new("main").thread(ThreadId(2)))
            .unwrap();
        let decision = stop_at(&mut engine, 0x1000);
        assert!(!decision.record(n).unwrap().stop);
        assert_eq!(decision.action, ActionClass::SingleStepOver);
        assert_eq!(engine.breakpoint(n).unwrap().hit_count, 0);

        let decision = engine.classify_stop(&StopEvent::new(0x1000, ThreadId(2)));
        assert!(decision.record(n).unwrap().stop);
    }

    #[test]
    fn test_silent_commands() {
        let mut engine = engine();
        let n = engine
            .create(CreateRequest::new("main").commands(vec!["silent".into(), "print x".into()]))
            .unwrap();
        let decision = stop_at(&mut engine, 0x1000);
        assert_eq!(decision.action, ActionClass::StopSilent);
        let record = decision.record(n).unwrap();
        assert!(!record.print);
        assert_eq!(record.commands, vec!["print x".to_string()]);
        assert!(matches!(engine.phase(), ClassifyPhase::RunningCommands(_)));
    }

    #[test]
    fn test_disable_on_hit() {
        let mut engine = engine();
        let n = engine.create(CreateRequest::new("main").disabled()).unwrap();
        engine.enable_once(n).unwrap();
        engine.insert_all();
        assert!(stop_at(&mut engine, 0x1000).should_stop());
        assert_eq!(
            engine.breakpoint(n).unwrap().enable_state,
            EnableState::Disabled
        );
        assert_eq!(engine.inferior().bytes(0x1000, 1), vec![0x55]);
        assert!(!stop_at(&mut engine, 0x1000).should_stop());
    }

    #[test]
    fn test_temporary_deleted_after_stop() {
        let mut engine = engine();
        let temp = engine.create(CreateRequest::new("main").temporary()).unwrap();
        let keep = engine.create(CreateRequest::new("*0x1000")).unwrap();
        let decision = stop_at(&mut engine, 0x1000);
        assert_eq!(
            decision.record(temp).unwrap().message.as_deref(),
            Some("Temporary breakpoint 1, 0x1000 in main")
        );
        assert_eq!(engine.breakpoint_auto_delete(&decision), vec![temp]);
        assert!(engine.breakpoint(temp).is_none());
        assert!(engine.breakpoint(keep).is_some());
    }

    #[test]
    fn test_condition_that_resumes_abandons_classification() {
        let mut engine = engine();
        let first = engine
            .create(CreateRequest::new("main").condition("call reset"))
            .unwrap();
        let second = engine.create(CreateRequest::new("*0x1000")).unwrap();

        let decision = stop_at(&mut engine, 0x1000);
        assert!(decision.abandoned);
        assert!(decision.explanations.is_empty());
        assert!(!decision.should_stop());
        assert_eq!(engine.phase(), &ClassifyPhase::Idle);
        assert_eq!(engine.breakpoint(second).unwrap().hit_count, 0);
        assert_eq!(engine.breakpoint(first).unwrap().hit_count, 0);
    }

    #[test]
    fn test_commands_stop_when_target_resumes() {
        let mut engine = engine();
        engine
            .create(CreateRequest::new("main").commands(vec![
                "print x".into(),
                "continue".into(),
                "print never".into(),
            ]))
            .unwrap();
        let mut decision = stop_at(&mut engine, 0x1000);

        let mut ran = Vec::new();
        let finished = engine
            .run_stop_commands(&mut decision, |inferior, command| {
                ran.push(command.to_string());
                if command == "continue" {
                    inferior.resume()?;
                }
                Ok(())
            })
            .unwrap();
        assert!(!finished);
        assert_eq!(ran, vec!["print x", "continue"]);
        assert!(decision.explanations[0].commands.is_empty());
        assert_eq!(engine.phase(), &ClassifyPhase::Idle);
    }

    #[test]
    fn test_watchpoint_stop() {
        let mut engine = engine();
        engine.inferior_mut().set_value("x", 5);
        let n = engine.watch("x", WatchKind::Write, None, T1).unwrap();
        engine.insert_all();

        engine.inferior_mut().set_value("x", 5);
        let event = StopEvent::new(0x1010, T1).with_hint(WatchHint::Yes);
        let decision = engine.classify_stop(&event);
        assert!(!decision.record(n).unwrap().stop);
        assert_eq!(decision.action, ActionClass::KeepChecking);

        engine.inferior_mut().set_value("x", 7);
        let decision = engine.classify_stop(&event);
        let record = decision.record(n).unwrap();
        assert!(record.stop);
        assert_eq!(record.old_value.as_ref().unwrap().display, "5");
        assert_eq!(record.new_value.as_ref().unwrap().display, "7");
        assert_eq!(
            record.message.as_deref(),
            Some("Hardware watchpoint 1: x\n\nOld value = 5\nNew value = 7")
        );
        assert_eq!(decision.action, ActionClass::StopNoisy);
    }

    #[test]
    fn test_hint_no_skips_watchpoints() {
        let mut engine = engine();
        let n = engine.watch("x", WatchKind::Write, None, T1).unwrap();
        engine.inferior_mut().set_value("x", 9);
        let decision = stop_at(&mut engine, 0x1010);
        assert!(decision.record(n).is_none());
    }

    #[test]
    fn test_scope_guard_deletes_watchpoint() {
        let mut engine = engine();
        let outer = FrameId { stack: 0x7ff0, code: 0x1000 };
        let inner = FrameId { stack: 0x7fe0, code: 0x1100 };
        engine.inferior_mut().push_frame(T1, outer, 0);
        engine.inferior_mut().push_frame(T1, inner, 0x1044);
        engine.inferior_mut().add_local("count", 0x7fd0, 4, inner);
        let n = engine.watch("count", WatchKind::Write, None, T1).unwrap();
        let guard = engine.breakpoint(n).unwrap().related.unwrap();
        engine.insert_all();

        engine.inferior_mut().pop_frame(T1);
        let decision = stop_at(&mut engine, 0x1044);
        let record = decision.record(n).unwrap();
        assert!(record.stop);
        assert!(record.message.as_deref().unwrap().contains("left the block"));

        let deleted = engine.breakpoint_auto_delete(&decision);
        assert_eq!(deleted, vec![guard, n]);
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_catch_throw_filters_type() {
        let mut engine = engine();
        let n = engine
            .create_catchpoint(CatchKind::parse("throw MyError").unwrap(), false)
            .unwrap();
        engine.insert_all();
        engine
            .inferior_mut()
            .set_native_event(Some(NativeEvent::ExceptionThrown));

        engine.inferior_mut().set_exception_type(Some("OtherError"));
        assert!(!stop_at(&mut engine, 0x5000).should_stop());

        engine.inferior_mut().set_exception_type(Some("MyError"));
        let decision = stop_at(&mut engine, 0x5000);
        assert_eq!(
            decision.record(n).unwrap().message.as_deref(),
            Some("Catchpoint 1 (exception thrown)")
        );
    }

    #[test]
    fn test_catch_load_with_module_event() {
        let mut engine = engine();
        engine.inferior_mut().add_module(ModuleId(4), "libfoo.so", true);
        let hook = engine
            .create_internal(InternalKind::ModuleEvent, 0x1300, None, None)
            .unwrap();
        let n = engine
            .create_catchpoint(CatchKind::parse("load foo").unwrap(), false)
            .unwrap();
        engine
            .inferior_mut()
            .set_native_event(Some(NativeEvent::ModuleLoaded { module: ModuleId(4) }));

        let decision = stop_at(&mut engine, 0x1300);
        assert_eq!(decision.action, ActionClass::CheckModulesThenStop);
        assert_eq!(
            decision.record(hook).unwrap().outcome,
            OutcomeClass::ModuleEvent
        );
        assert!(decision.record(n).unwrap().stop);
    }

    #[test]
    fn test_step_resume_in_other_frame_is_ignored() {
        let mut engine = engine();
        let here = FrameId { stack: 0x7ff0, code: 0x1000 };
        let there = FrameId { stack: 0x7f00, code: 0x1000 };
        engine.inferior_mut().push_frame(T1, here, 0);
        let sr = engine
            .create_internal(InternalKind::StepResume, 0x1008, Some(there), Some(T1))
            .unwrap();
        let decision = stop_at(&mut engine, 0x1008);
        assert_eq!(decision.record(sr).unwrap().outcome, OutcomeClass::BpNoStop);
        assert_eq!(decision.action, ActionClass::SingleStepOver);

        let sr2 = engine
            .create_internal(InternalKind::StepResume, 0x100c, Some(here), Some(T1))
            .unwrap();
        let decision = stop_at(&mut engine, 0x100c);
        assert_eq!(decision.record(sr2).unwrap().outcome, OutcomeClass::StepResume);
        assert_eq!(decision.action, ActionClass::StepResume);
    }

    #[test]
    fn test_step_resume_for_other_thread_is_ignored() {
        let mut engine = engine();
        let frame = FrameId { stack: 0x7ff0, code: 0x1000 };
        engine.inferior_mut().push_frame(T1, frame, 0);
        engine.inferior_mut().push_frame(ThreadId(2), frame, 0);
        let sr = engine
            .create_internal(InternalKind::StepResume, 0x1008, Some(frame), Some(T1))
            .unwrap();

        let decision = engine.classify_stop(&StopEvent::new(0x1008, ThreadId(2)));
        assert_eq!(decision.record(sr).unwrap().outcome, OutcomeClass::BpNoStop);
        assert_eq!(decision.action, ActionClass::SingleStepOver);

        let decision = stop_at(&mut engine, 0x1008);
        assert_eq!(decision.record(sr).unwrap().outcome, OutcomeClass::StepResume);
        assert_eq!(decision.action, ActionClass::StepResume);
    }

    #[test]
    fn test_decision_serializes() {
        let mut engine = engine();
        engine.create(CreateRequest::new("main")).unwrap();
        let decision = stop_at(&mut engine, 0x1000);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "stop_noisy");
        assert_eq!(json["explanations"][0]["outcome"], "bp_noisy");
        assert!(json["explanations"][0].get("condition_error").is_none());
    }

    #[test]
    fn test_resume_bumps_generation() {
        let mut engine = engine();
        let before = engine.inferior().run_generation();
        engine.inferior_mut().resume().unwrap();
        assert_eq!(engine.inferior().run_generation(), before + 1);
    }
}
