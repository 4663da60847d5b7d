//! Saving and restoring breakpoints as text statements
//!
//! The format is the one a user would type: one creation statement per
//! breakpoint followed by the statements that set its attributes, which
//! refer back to it as `$bpnum`.
//!
//! ```text
//! break main.c:42 thread 2 if x > 3
//! ignore $bpnum 2
//! commands
//!   silent
//!   print x
//! end
//! disable $bpnum
//! ```

use std::fmt::Write as _;
use std::path::Path;

use super::registry::CreateRequest;
use super::{
    BreakpointKind, BreakpointNumber, CatchKind, Disposition, EnableState, WatchKind,
};
use crate::common::{Error, Result};
use crate::engine::Engine;
use crate::target::{Inferior, ThreadId};

/// Placeholder for the breakpoint created by the previous statement
const LAST: &str = "$bpnum";

impl<I: Inferior> Engine<I> {
    /// Render every user breakpoint as restorable statements
    pub fn save(&self) -> String {
        let mut out = String::new();
        for bp in self.store.iter().filter(|bp| !bp.is_internal()) {
            let temporary = bp.disposition == Disposition::Delete;
            let thread = bp.thread.map(|t| format!(" thread {}", t)).unwrap_or_default();
            let condition = bp.condition.as_ref().map(|c| c.text.as_str());

            match &bp.kind {
                BreakpointKind::Software | BreakpointKind::Hardware => {
                    let Some(spec) = bp.spec_text.as_deref().or(bp.canonical.as_deref()) else {
                        continue;
                    };
                    let command = match (&bp.kind, temporary) {
                        (BreakpointKind::Hardware, true) => "thbreak",
                        (BreakpointKind::Hardware, false) => "hbreak",
                        (_, true) => "tbreak",
                        (_, false) => "break",
                    };
                    let _ = write!(out, "{} {}{}", command, spec, thread);
                    if let Some(condition) = condition {
                        let _ = write!(out, " if {}", condition);
                    }
                    out.push('\n');
                }
                BreakpointKind::Watchpoint { kind } => {
                    let Some(watch) = bp.watch.as_ref() else {
                        continue;
                    };
                    let command = match kind {
                        WatchKind::Write => "watch",
                        WatchKind::Read => "rwatch",
                        WatchKind::Access => "awatch",
                    };
                    let _ = writeln!(out, "{} {}{}", command, watch.expression, thread);
                    if let Some(condition) = condition {
                        let _ = writeln!(out, "condition {} {}", LAST, condition);
                    }
                }
                BreakpointKind::Catchpoint { kind } => {
                    let statement = kind.describe();
                    if temporary {
                        let _ = writeln!(out, "t{}", statement);
                    } else {
                        let _ = writeln!(out, "{}", statement);
                    }
                    if let Some(condition) = condition {
                        let _ = writeln!(out, "condition {} {}", LAST, condition);
                    }
                }
                BreakpointKind::Internal { .. } => continue,
            }

            if bp.ignore_count > 0 {
                let _ = writeln!(out, "ignore {} {}", LAST, bp.ignore_count);
            }
            if !bp.commands.is_empty() {
                out.push_str("commands\n");
                for command in &bp.commands {
                    let _ = writeln!(out, "  {}", command);
                }
                out.push_str("end\n");
            }
            if bp.disposition == Disposition::Disable {
                let _ = writeln!(out, "enable once {}", LAST);
            }
            // Watch statements have no temporary form
            if temporary && bp.kind.is_watchpoint() {
                let _ = writeln!(out, "enable delete {}", LAST);
            }
            if bp.enable_state == EnableState::Disabled {
                let _ = writeln!(out, "disable {}", LAST);
            }
        }
        out
    }

    /// Replay statements produced by `save`
    ///
    /// Watch expressions are evaluated in `thread`. Returns the numbers of
    /// the breakpoints created, in statement order.
    pub fn restore(&mut self, text: &str, thread: ThreadId) -> Result<Vec<BreakpointNumber>> {
        let mut created = Vec::new();
        let mut last: Option<BreakpointNumber> = None;
        let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));

        while let Some((lineno, raw)) = lines.next() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (command, rest) = match line.split_once(char::is_whitespace) {
                Some((command, rest)) => (command, rest.trim()),
                None => (line, ""),
            };
            let at = |e: Error| Error::parse(lineno, e.to_string());

            match command {
                "break" | "tbreak" | "hbreak" | "thbreak" => {
                    let (spec, thread, condition) = split_clauses(rest, lineno)?;
                    if spec.is_empty() {
                        return Err(Error::parse(lineno, format!("{} needs a location", command)));
                    }
                    let mut request = CreateRequest::new(spec);
                    if command.starts_with('h') || command.starts_with("th") {
                        request = request.hardware();
                    }
                    if command.starts_with('t') {
                        request = request.temporary();
                    }
                    if let Some(thread) = thread {
                        request = request.thread(thread);
                    }
                    if let Some(condition) = condition {
                        request = request.condition(condition);
                    }
                    let number = self.create(request).map_err(at)?;
                    created.push(number);
                    last = Some(number);
                }
                "watch" | "rwatch" | "awatch" => {
                    let (expression, restrict, condition) = split_clauses(rest, lineno)?;
                    let kind = match command {
                        "rwatch" => WatchKind::Read,
                        "awatch" => WatchKind::Access,
                        _ => WatchKind::Write,
                    };
                    let number = self.watch(&expression, kind, None, thread).map_err(at)?;
                    if restrict.is_some() {
                        self.set_thread(number, restrict).map_err(at)?;
                    }
                    if let Some(condition) = condition {
                        self.set_condition(number, Some(condition.as_str())).map_err(at)?;
                    }
                    created.push(number);
                    last = Some(number);
                }
                "catch" | "tcatch" => {
                    let kind = CatchKind::parse(rest).map_err(at)?;
                    let number = self
                        .create_catchpoint(kind, command == "tcatch")
                        .map_err(at)?;
                    created.push(number);
                    last = Some(number);
                }
                "condition" => {
                    let (target, condition) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                    let number = resolve_ref(target, last, lineno)?;
                    let condition = Some(condition.trim()).filter(|c| !c.is_empty());
                    self.set_condition(number, condition).map_err(at)?;
                }
                "ignore" => {
                    let (target, count) = rest
                        .split_once(char::is_whitespace)
                        .ok_or_else(|| Error::parse(lineno, "ignore needs a count"))?;
                    let number = resolve_ref(target, last, lineno)?;
                    let count: u32 = count
                        .trim()
                        .parse()
                        .map_err(|_| Error::parse(lineno, format!("bad ignore count: {}", count.trim())))?;
                    self.set_ignore_count(number, count).map_err(at)?;
                }
                "commands" => {
                    let target = if rest.is_empty() { LAST } else { rest };
                    let number = resolve_ref(target, last, lineno)?;
                    let mut body = Vec::new();
                    loop {
                        let Some((_, line)) = lines.next() else {
                            return Err(Error::parse(lineno, "commands without matching end"));
                        };
                        let line = line.trim();
                        if line == "end" {
                            break;
                        }
                        body.push(line.to_string());
                    }
                    self.set_commands(number, body).map_err(at)?;
                }
                "disable" => {
                    let number = resolve_ref(rest, last, lineno)?;
                    self.disable(number).map_err(at)?;
                }
                "enable" => {
                    if let Some(target) = rest.strip_prefix("once") {
                        let number = resolve_ref(target.trim(), last, lineno)?;
                        self.enable_once(number).map_err(at)?;
                    } else if let Some(target) = rest.strip_prefix("delete") {
                        let number = resolve_ref(target.trim(), last, lineno)?;
                        self.enable_delete(number).map_err(at)?;
                    } else {
                        let number = resolve_ref(rest, last, lineno)?;
                        self.enable(number).map_err(at)?;
                    }
                }
                other => {
                    return Err(Error::parse(lineno, format!("unknown statement: {}", other)));
                }
            }
        }

        tracing::info!(restored = created.len(), "Restored breakpoints");
        Ok(created)
    }

    /// Write `save` output to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.save()).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Restore from a file written by `save_to`
    pub fn restore_from(&mut self, path: &Path, thread: ThreadId) -> Result<Vec<BreakpointNumber>> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        self.restore(&text, thread)
    }
}

/// Split `SPEC [thread N] [if COND]`
fn split_clauses(text: &str, lineno: usize) -> Result<(String, Option<ThreadId>, Option<String>)> {
    let (head, condition) = match text.find(" if ") {
        Some(idx) => (&text[..idx], Some(text[idx + 4..].trim().to_string())),
        None => (text, None),
    };
    let head = head.trim();

    let mut words: Vec<&str> = head.split_whitespace().collect();
    let mut thread = None;
    if words.len() >= 3 && words[words.len() - 2] == "thread" {
        let id = words[words.len() - 1];
        let id: u64 = id
            .parse()
            .map_err(|_| Error::parse(lineno, format!("bad thread id: {}", id)))?;
        thread = Some(ThreadId(id));
        words.truncate(words.len() - 2);
    }
    Ok((words.join(" "), thread, condition.filter(|c| !c.is_empty())))
}

fn resolve_ref(
    target: &str,
    last: Option<BreakpointNumber>,
    lineno: usize,
) -> Result<BreakpointNumber> {
    let target = target.trim();
    if target == LAST {
        return last.ok_or_else(|| Error::parse(lineno, "no breakpoint created yet"));
    }
    target
        .parse::<i32>()
        .map(BreakpointNumber)
        .map_err(|_| Error::parse(lineno, format!("bad breakpoint number: {}", target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::{EnumerateFilter, WatchKind};
    use crate::common::config::Config;
    use crate::target::sim::SimInferior;
    use pretty_assertions::assert_eq;

    fn sim() -> SimInferior {
        let mut sim = SimInferior::new();
        sim.add_function("main", 0x1000, None);
        sim.add_function("foo", 0x1100, None);
        sim.add_line("main.c", 42, 0x1010, None);
        sim.add_variable("total", 0x2000, 4);
        sim
    }

    #[test]
    fn test_save_format() {
        let mut engine = Engine::new(sim(), Config::default());
        let n = engine
            .create(
                CreateRequest::new("main.c:42")
                    .thread(ThreadId(2))
                    .condition("total > 3")
                    .ignore(2),
            )
            .unwrap();
        engine
            .set_commands(n, vec!["silent".into(), "print total".into()])
            .unwrap();
        engine.disable(n).unwrap();
        engine.create(CreateRequest::new("*0x1000").temporary()).unwrap();
        engine.create(CreateRequest::new("foo").hardware()).unwrap();
        engine.watch("total", WatchKind::Write, None, ThreadId(1)).unwrap();
        engine
            .create_catchpoint(CatchKind::parse("throw std::bad_alloc").unwrap(), false)
            .unwrap();

        let expected = "\
break main.c:42 thread 2 if total > 3
ignore $bpnum 2
commands
  silent
  print total
end
disable $bpnum
tbreak *0x1000
hbreak foo
watch total
catch throw std::bad_alloc
";
        assert_eq!(engine.save(), expected);
    }

    #[test]
    fn test_round_trip_reproduces_descriptors() {
        let mut engine = Engine::new(sim(), Config::default());
        engine
            .create(CreateRequest::new("main").condition("total == 1").thread(ThreadId(3)))
            .unwrap();
        let n = engine.create(CreateRequest::new("foo").temporary()).unwrap();
        engine.set_commands(n, vec!["print total".into()]).unwrap();
        let w = engine.watch("total", WatchKind::Access, None, ThreadId(1)).unwrap();
        engine.set_condition(w, Some("total > 9")).unwrap();
        engine.set_ignore_count(w, 4).unwrap();
        let c = engine
            .create_catchpoint(CatchKind::parse("load libfoo").unwrap(), false)
            .unwrap();
        engine.enable_once(c).unwrap();
        engine.create(CreateRequest::new("missing_fn")).unwrap();

        let text = engine.save();
        let mut fresh = Engine::new(sim(), Config::default());
        let restored = fresh.restore(&text, ThreadId(1)).unwrap();
        assert_eq!(restored.len(), 5);

        let filter = EnumerateFilter::default();
        assert_eq!(fresh.enumerate(&filter), engine.enumerate(&filter));
        assert_eq!(fresh.save(), text);
    }

    #[test]
    fn test_temporary_watchpoint_round_trip() {
        let mut engine = Engine::new(sim(), Config::default());
        let w = engine.watch("total", WatchKind::Read, None, ThreadId(1)).unwrap();
        engine.enable_delete(w).unwrap();
        let d = engine.watch("total", WatchKind::Write, None, ThreadId(1)).unwrap();
        engine.enable_delete(d).unwrap();
        engine.disable(d).unwrap();

        let text = engine.save();
        assert_eq!(
            text,
            "rwatch total\nenable delete $bpnum\nwatch total\nenable delete $bpnum\ndisable $bpnum\n"
        );

        let mut fresh = Engine::new(sim(), Config::default());
        let restored = fresh.restore(&text, ThreadId(1)).unwrap();
        for number in &restored {
            assert_eq!(
                fresh.breakpoint(*number).unwrap().disposition,
                Disposition::Delete
            );
        }
        assert_eq!(
            fresh.breakpoint(restored[1]).unwrap().enable_state,
            EnableState::Disabled
        );
        assert_eq!(fresh.save(), text);
    }

    #[test]
    fn test_restore_reports_line_numbers() {
        let mut engine = Engine::new(sim(), Config::default());
        let err = engine.restore("break main\nfrobnicate\n", ThreadId(1)).unwrap_err();
        assert_eq!(err.to_string(), "Line 2: unknown statement: frobnicate");

        let err = engine.restore("ignore $bpnum 2\n", ThreadId(1)).unwrap_err();
        assert_eq!(err.to_string(), "Line 1: no breakpoint created yet");

        let err = engine.restore("break foo\ncommands\n  print x\n", ThreadId(1)).unwrap_err();
        assert!(err.to_string().contains("commands without matching end"));
    }

    #[test]
    fn test_explicit_numbers_and_comments() {
        let mut engine = Engine::new(sim(), Config::default());
        let created = engine
            .restore("# saved session\nbreak main\nbreak foo\n\ncondition 1 total == 0\ndisable 2\n", ThreadId(1))
            .unwrap();
        assert_eq!(created, vec![BreakpointNumber(1), BreakpointNumber(2)]);
        let first = engine.breakpoint(BreakpointNumber(1)).unwrap();
        assert_eq!(first.condition.as_ref().unwrap().text, "total == 0");
        assert_eq!(
            engine.breakpoint(BreakpointNumber(2)).unwrap().enable_state,
            EnableState::Disabled
        );
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breakpoints.txt");
        let mut engine = Engine::new(sim(), Config::default());
        engine.create(CreateRequest::new("main")).unwrap();
        engine.save_to(&path).unwrap();

        let mut fresh = Engine::new(sim(), Config::default());
        assert_eq!(
            fresh.restore_from(&path, ThreadId(1)).unwrap(),
            vec![BreakpointNumber(1)]
        );
        assert!(fresh
            .restore_from(&dir.path().join("missing"), ThreadId(1))
            .is_err());
    }
}
