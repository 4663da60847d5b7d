//! Scenario runner implementation
//!
//! Builds a simulated program from the scenario's `target` section, drives
//! an [`Engine`] through the steps and checks expectations against the
//! engine's structured results rather than printed text.

use std::path::Path;

use colored::Colorize;

use crate::breakpoint::{BreakpointNumber, StopEvent};
use crate::common::{Error, Result};
use crate::engine::Engine;
use crate::target::sim::SimInferior;
use crate::target::{FrameId, HwResource, ModuleId, TargetControl, ThreadId};

use super::config::{
    BreakpointExpectation, CommandExpectation, ResumeExpectation, Scenario, Step,
    StopExpectation, TargetConfig,
};

/// Thread watch expressions are evaluated in
const MAIN_THREAD: ThreadId = ThreadId(1);

/// Result of a scenario run
#[derive(Debug, serde::Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

/// Run a scenario from a YAML file
pub fn run_scenario(path: &Path, verbose: bool) -> Result<TestResult> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    run_scenario_str(&content, verbose)
}

/// Run a scenario given as YAML text
pub fn run_scenario_str(content: &str, verbose: bool) -> Result<TestResult> {
    let scenario: Scenario = serde_yaml::from_str(content)
        .map_err(|e| Error::Config(format!("Failed to parse scenario: {}", e)))?;
    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Scenario:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let inferior = build_target(&scenario.target)?;
    let mut engine = Engine::new(inferior, scenario.config);

    println!("\n{}", "Steps:".cyan());
    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;
        if let Err(e) = execute_step(&mut engine, step, step_num, verbose) {
            println!("  {} Step {}: {}", "✗".red(), step_num, e);
            return Ok(TestResult {
                name: scenario.name,
                passed: false,
                steps_run: step_num,
                steps_total,
                error: Some(e.to_string()),
            });
        }
    }

    println!(
        "\n{} {}\n",
        "✓".green().bold(),
        "Scenario Passed".green().bold()
    );

    Ok(TestResult {
        name: scenario.name,
        passed: true,
        steps_run: steps_total,
        steps_total,
        error: None,
    })
}

/// Populate a simulated inferior from the scenario's target section
fn build_target(target: &TargetConfig) -> Result<SimInferior> {
    let mut sim = SimInferior::new();

    for module in &target.modules {
        sim.add_module(ModuleId(module.id), &module.name, module.shared);
        if !module.loaded {
            sim.unload_module(ModuleId(module.id));
        }
    }
    for function in &target.functions {
        sim.add_function(&function.name, function.address, function.module.map(ModuleId));
    }
    for line in &target.lines {
        sim.add_line(&line.file, line.line, line.address, line.module.map(ModuleId));
    }

    let frames: Vec<FrameId> = target
        .frames
        .iter()
        .map(|f| FrameId {
            stack: f.stack,
            code: f.code,
        })
        .collect();
    for (def, frame) in target.frames.iter().zip(&frames) {
        sim.push_frame(ThreadId(def.thread), *frame, def.return_address);
    }

    for var in &target.variables {
        match var.frame {
            Some(index) => {
                let frame = frames.get(index).ok_or_else(|| {
                    Error::Config(format!(
                        "Variable '{}' refers to frame {} but only {} frames exist",
                        var.name,
                        index,
                        frames.len()
                    ))
                })?;
                sim.add_local(&var.name, var.address, var.size, *frame);
            }
            None => sim.add_variable(&var.name, var.address, var.size),
        }
        sim.set_value(&var.name, var.value);
    }
    for mem in &target.memory {
        sim.write_bytes(mem.address, &mem.bytes);
    }

    if let Some(slots) = target.hw_breakpoints {
        sim.set_hw_capacity(HwResource::Breakpoint, slots);
    }
    if let Some(slots) = target.hw_watchpoints {
        sim.set_hw_capacity(HwResource::Watchpoint, slots);
    }
    Ok(sim)
}

/// Execute a single step
fn execute_step(
    engine: &mut Engine<SimInferior>,
    step: &Step,
    step_num: usize,
    verbose: bool,
) -> Result<()> {
    match step {
        Step::Command { command, expect } => {
            execute_command_step(engine, command, expect.as_ref(), step_num)
        }
        Step::Set { variable, value } => {
            engine.inferior_mut().set_value(variable, *value);
            pass(step_num, &format!("set {} = {}", variable, value));
            Ok(())
        }
        Step::Resume { expect } => execute_resume_step(engine, expect.as_ref(), step_num),
        Step::Stop {
            address,
            thread,
            hint,
            data_address,
            event,
            exception_type,
            expect,
        } => {
            let sim = engine.inferior_mut();
            sim.set_stopped_data_address(*data_address);
            sim.set_native_event(event.clone());
            sim.set_exception_type(exception_type.as_deref());
            let stop = StopEvent::new(*address, ThreadId(*thread)).with_hint(*hint);
            execute_stop_step(engine, &stop, expect.as_ref(), step_num, verbose)
        }
        Step::LoadModule { module } => {
            engine.inferior_mut().load_module(ModuleId(*module));
            engine.on_module_loaded(ModuleId(*module));
            pass(step_num, &format!("load module {}", module));
            Ok(())
        }
        Step::UnloadModule { module } => {
            engine.inferior_mut().unload_module(ModuleId(*module));
            engine.on_module_unloaded(ModuleId(*module));
            pass(step_num, &format!("unload module {}", module));
            Ok(())
        }
        Step::PopFrame { thread } => {
            engine
                .inferior_mut()
                .pop_frame(ThreadId(*thread))
                .ok_or_else(|| Error::TestAssertion(format!("Thread {} has no frames", thread)))?;
            pass(step_num, &format!("pop frame of thread {}", thread));
            Ok(())
        }
        Step::InferiorCall { assign } => {
            engine.begin_inferior_call();
            for (name, value) in assign {
                engine.inferior_mut().set_value(name, *value);
            }
            engine.inferior_mut().bump_generation();
            engine.end_inferior_call();
            pass(step_num, "inferior call");
            Ok(())
        }
        Step::CheckBreakpoint { number, expect } => {
            check_breakpoint(engine, BreakpointNumber(*number), expect)?;
            pass(step_num, &format!("check breakpoint {}", number));
            Ok(())
        }
        Step::CheckMemory { address, bytes } => {
            let actual = engine.inferior().bytes(*address, bytes.len());
            if &actual != bytes {
                return Err(Error::TestAssertion(format!(
                    "Memory at {:#x}: expected {:02x?}, got {:02x?}",
                    address, bytes, actual
                )));
            }
            pass(step_num, &format!("check memory at {:#x}", address));
            Ok(())
        }
        Step::Detach => {
            engine.detach()?;
            pass(step_num, "detach");
            Ok(())
        }
    }
}

fn pass(step_num: usize, what: &str) {
    println!("  {} Step {}: {}", "✓".green(), step_num, what.dimmed());
}

/// Execute a command step
fn execute_command_step(
    engine: &mut Engine<SimInferior>,
    command: &str,
    expect: Option<&CommandExpectation>,
    step_num: usize,
) -> Result<()> {
    engine.take_warnings();
    let result = run_command(engine, command);
    let warnings = engine.take_warnings();

    if let Some(exp) = expect {
        if let Some(should_succeed) = exp.success {
            if should_succeed != result.is_ok() {
                return Err(Error::TestAssertion(format!(
                    "Command '{}' expected success={}, got success={}",
                    command,
                    should_succeed,
                    result.is_ok()
                )));
            }
        }
        if let Some(expected) = &exp.error_contains {
            let message = result.as_ref().err().map(|e| e.to_string()).unwrap_or_default();
            if !message.contains(expected.as_str()) {
                return Err(Error::TestAssertion(format!(
                    "Command '{}': expected error containing '{}', got '{}'",
                    command, expected, message
                )));
            }
        }
        if let Some(expected) = &exp.warning_contains {
            if !warnings.iter().any(|w| w.contains(expected.as_str())) {
                return Err(Error::TestAssertion(format!(
                    "Command '{}': expected warning containing '{}', got {:?}",
                    command, expected, warnings
                )));
            }
        }
    }

    // For commands that are expected to fail, we don't propagate the error
    if expect.is_some_and(|e| e.success == Some(false) || e.error_contains.is_some()) {
        pass(step_num, &format!("{} (expected failure)", command));
        return Ok(());
    }

    let created = result?;
    if let Some(expected) = expect.and_then(|e| e.number) {
        if created != Some(BreakpointNumber(expected)) {
            return Err(Error::TestAssertion(format!(
                "Command '{}': expected breakpoint {}, got {:?}",
                command, expected, created
            )));
        }
    }

    pass(step_num, command);
    Ok(())
}

/// Run one statement; returns the breakpoint it created, if any
///
/// List operations (`delete 1-3`, `disable 2 4`) are handled here; every
/// other statement goes through the session restore parser.
fn run_command(
    engine: &mut Engine<SimInferior>,
    command: &str,
) -> Result<Option<BreakpointNumber>> {
    let command = command.trim();
    let (verb, rest) = command
        .split_once(char::is_whitespace)
        .map(|(v, r)| (v, r.trim()))
        .unwrap_or((command, ""));

    match verb {
        "delete" if rest.is_empty() => {
            let all: Vec<BreakpointNumber> = engine
                .store()
                .iter()
                .filter(|bp| !bp.is_internal())
                .map(|bp| bp.number)
                .collect();
            for number in all {
                engine.delete(number)?;
            }
            Ok(None)
        }
        "delete" => {
            engine.for_each_in_list(rest, |e, n| e.delete(n))?;
            Ok(None)
        }
        "disable" => {
            engine.for_each_in_list(rest, |e, n| e.disable(n))?;
            Ok(None)
        }
        "enable" if !rest.starts_with("once") && !rest.starts_with("delete") => {
            engine.for_each_in_list(rest, |e, n| e.enable(n))?;
            Ok(None)
        }
        _ => {
            let created = engine.restore(command, MAIN_THREAD)?;
            Ok(created.first().copied())
        }
    }
}

/// Execute a resume step
fn execute_resume_step(
    engine: &mut Engine<SimInferior>,
    expect: Option<&ResumeExpectation>,
    step_num: usize,
) -> Result<()> {
    let report = engine.prepare_resume();
    engine.inferior_mut().resume()?;

    if let Some(exp) = expect {
        if let Some(expected) = exp.inserted {
            if report.inserted != expected {
                return Err(Error::TestAssertion(format!(
                    "Expected {} locations inserted, got {}",
                    expected, report.inserted
                )));
            }
        }
        if let Some(expected) = &exp.failed {
            let actual: Vec<i32> = report.failed.iter().map(|(n, _)| n.0).collect();
            if &actual != expected {
                return Err(Error::TestAssertion(format!(
                    "Expected failed breakpoints {:?}, got {:?}",
                    expected, actual
                )));
            }
        }
        if let Some(expected) = exp.single_step {
            if engine.needs_global_single_step() != expected {
                return Err(Error::TestAssertion(format!(
                    "Expected global single-step={}, got {}",
                    expected,
                    engine.needs_global_single_step()
                )));
            }
        }
    }

    pass(
        step_num,
        &format!("resume ({} inserted)", report.inserted),
    );
    Ok(())
}

/// Execute a stop step: classify, run hit commands, auto-delete
fn execute_stop_step(
    engine: &mut Engine<SimInferior>,
    stop: &StopEvent,
    expect: Option<&StopExpectation>,
    step_num: usize,
    verbose: bool,
) -> Result<()> {
    let mut decision = engine.classify_stop(stop);
    let messages: Vec<String> = decision
        .explanations
        .iter()
        .filter_map(|r| r.message.clone())
        .collect();
    let stopped_by: Vec<i32> = decision
        .explanations
        .iter()
        .filter(|r| r.stop)
        .map(|r| r.breakpoint.0)
        .collect();
    let action = serde_json::to_value(decision.action)?
        .as_str()
        .unwrap_or_default()
        .to_string();

    engine.run_stop_commands(&mut decision, run_hit_command)?;
    let deleted: Vec<i32> = engine
        .breakpoint_auto_delete(&decision)
        .into_iter()
        .map(|n| n.0)
        .collect();

    if verbose {
        for message in &messages {
            println!("    {}", message.dimmed());
        }
    }

    if let Some(exp) = expect {
        if let Some(expected) = exp.stop {
            if decision.should_stop() != expected {
                return Err(Error::TestAssertion(format!(
                    "Expected stop={}, got {} (action {})",
                    expected,
                    decision.should_stop(),
                    action
                )));
            }
        }
        if let Some(expected) = &exp.action {
            if &action != expected {
                return Err(Error::TestAssertion(format!(
                    "Expected action '{}', got '{}'",
                    expected, action
                )));
            }
        }
        if let Some(expected) = &exp.breakpoints {
            if &stopped_by != expected {
                return Err(Error::TestAssertion(format!(
                    "Expected stop caused by {:?}, got {:?}",
                    expected, stopped_by
                )));
            }
        }
        if let Some(expected) = &exp.message_contains {
            if !messages.iter().any(|m| m.contains(expected.as_str())) {
                return Err(Error::TestAssertion(format!(
                    "Expected a stop message containing '{}', got {:?}",
                    expected, messages
                )));
            }
        }
        if let Some(expected) = &exp.deleted {
            if &deleted != expected {
                return Err(Error::TestAssertion(format!(
                    "Expected {:?} deleted after the stop, got {:?}",
                    expected, deleted
                )));
            }
        }
    }

    pass(
        step_num,
        &format!("stop at {:#x} ({})", stop.address, action),
    );
    Ok(())
}

/// Hit commands understood by the simulated target
///
/// `set NAME = VALUE` assigns, `continue` resumes; everything else is only
/// logged.
fn run_hit_command(sim: &mut SimInferior, command: &str) -> Result<()> {
    let command = command.trim();
    if command == "continue" || command == "c" {
        sim.resume()?;
        return Ok(());
    }
    if let Some(assignment) = command.strip_prefix("set ") {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| Error::InvalidArgument(format!("bad assignment: {}", command)))?;
        let value: i64 = value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("bad value in: {}", command)))?;
        sim.set_value(name.trim(), value);
        return Ok(());
    }
    tracing::debug!(command, "Hit command");
    Ok(())
}

/// Check one breakpoint against its expectations
fn check_breakpoint(
    engine: &Engine<SimInferior>,
    number: BreakpointNumber,
    expect: &BreakpointExpectation,
) -> Result<()> {
    let Some(bp) = engine.breakpoint(number) else {
        if expect.exists == Some(false) {
            return Ok(());
        }
        return Err(Error::TestAssertion(format!("Breakpoint {} does not exist", number)));
    };
    if expect.exists == Some(false) {
        return Err(Error::TestAssertion(format!("Breakpoint {} still exists", number)));
    }

    if let Some(expected) = expect.hit_count {
        if bp.hit_count != expected {
            return Err(Error::TestAssertion(format!(
                "Breakpoint {}: expected hit count {}, got {}",
                number, expected, bp.hit_count
            )));
        }
    }
    if let Some(expected) = expect.ignore_count {
        if bp.ignore_count != expected {
            return Err(Error::TestAssertion(format!(
                "Breakpoint {}: expected ignore count {}, got {}",
                number, expected, bp.ignore_count
            )));
        }
    }
    if let Some(expected) = &expect.enable_state {
        let state = serde_json::to_value(bp.enable_state)?;
        let actual = state.as_str().unwrap_or_default();
        if actual != expected {
            return Err(Error::TestAssertion(format!(
                "Breakpoint {}: expected state '{}', got '{}'",
                number, expected, actual
            )));
        }
    }
    if let Some(expected) = expect.pending {
        if bp.is_pending() != expected {
            return Err(Error::TestAssertion(format!(
                "Breakpoint {}: expected pending={}, got {}",
                number,
                expected,
                bp.is_pending()
            )));
        }
    }
    if let Some(expected) = expect.locations {
        if bp.locations.len() != expected {
            return Err(Error::TestAssertion(format!(
                "Breakpoint {}: expected {} locations, got {}",
                number,
                expected,
                bp.locations.len()
            )));
        }
    }
    if let Some(expected) = expect.inserted {
        let inserted = bp
            .locations
            .iter()
            .filter(|id| engine.store().location(**id).is_some_and(|l| l.inserted))
            .count();
        if inserted != expected {
            return Err(Error::TestAssertion(format!(
                "Breakpoint {}: expected {} inserted locations, got {}",
                number, expected, inserted
            )));
        }
    }
    Ok(())
}
