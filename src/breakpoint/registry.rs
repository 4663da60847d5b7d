//! Breakpoint registry
//!
//! Creation, deletion, the per-number mutators and enumeration. Creation
//! resolves the location spec right away; a spec that resolves to nothing
//! becomes a pending breakpoint when the pending policy allows it.

use std::ops::RangeInclusive;

use serde::Serialize;

use super::kind::ops_for;
use super::{
    Breakpoint, BreakpointKind, BreakpointNumber, Condition, Disposition, EnableState,
    InternalKind, Location, LocationId, LocationKind, LocationSpec, ResolutionState, WatchMode,
};
use crate::common::config::PendingPolicy;
use crate::common::{Error, Result};
use crate::engine::Engine;
use crate::target::{
    Address, FrameId, HwResource, Inferior, ResolveError, ResolvedMatch, ThreadId,
};

/// Everything needed to create a code breakpoint
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub spec: String,
    pub hardware: bool,
    pub temporary: bool,
    pub disabled: bool,
    pub condition: Option<String>,
    pub thread: Option<ThreadId>,
    pub ignore_count: u32,
    /// Indices (0-based) of the matches to keep when the spec is ambiguous
    pub select: Option<Vec<usize>>,
    pub commands: Vec<String>,
}

impl CreateRequest {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            ..Default::default()
        }
    }

    pub fn hardware(mut self) -> Self {
        self.hardware = true;
        self
    }

    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn condition(mut self, text: impl Into<String>) -> Self {
        self.condition = Some(text.into());
        self
    }

    pub fn thread(mut self, thread: ThreadId) -> Self {
        self.thread = Some(thread);
        self
    }

    pub fn ignore(mut self, count: u32) -> Self {
        self.ignore_count = count;
        self
    }

    pub fn select(mut self, indices: Vec<usize>) -> Self {
        self.select = Some(indices);
        self
    }

    pub fn commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }
}

/// Which breakpoints `enumerate` reports
#[derive(Debug, Clone, Default)]
pub struct EnumerateFilter {
    pub include_internal: bool,
    /// Restrict to these numbers
    pub numbers: Option<Vec<BreakpointNumber>>,
}

/// One location as shown in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationDescriptor {
    pub address: String,
    pub inserted: bool,
    pub duplicate: bool,
    pub what: String,
}

/// Display snapshot of a breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointDescriptor {
    pub number: BreakpointNumber,
    #[serde(rename = "type")]
    pub kind: String,
    pub disposition: Disposition,
    pub enable_state: EnableState,
    pub what: String,
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadId>,
    pub hit_count: u32,
    pub ignore_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    pub locations: Vec<LocationDescriptor>,
}

/// Listing label for the breakpoint type column
pub fn kind_label(bp: &Breakpoint) -> &'static str {
    match &bp.kind {
        BreakpointKind::Software => "breakpoint",
        BreakpointKind::Hardware => "hw breakpoint",
        BreakpointKind::Watchpoint { kind } => {
            let hardware = bp
                .watch
                .as_ref()
                .is_some_and(|w| w.mode == WatchMode::Hardware);
            match (kind, hardware) {
                (super::WatchKind::Write, true) => "hw watchpoint",
                (super::WatchKind::Write, false) => "watchpoint",
                (super::WatchKind::Read, _) => "read watchpoint",
                (super::WatchKind::Access, _) => "acc watchpoint",
            }
        }
        BreakpointKind::Catchpoint { .. } => "catchpoint",
        BreakpointKind::Internal { kind } => match kind {
            InternalKind::WatchpointScope => "watchpoint scope",
            InternalKind::StepResume => "step resume",
            InternalKind::ModuleEvent => "shlib events",
        },
    }
}

/// Parse a number list such as `"1 3-5"` or `"2,4"` into inclusive ranges
///
/// Ranges are kept as bounds; a range as wide as `1-2147483647` costs no
/// more than a single number.
pub fn parse_number_list(text: &str) -> Result<Vec<RangeInclusive<BreakpointNumber>>> {
    let mut ranges = Vec::new();
    for token in text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        let bad = || Error::InvalidArgument(format!("bad breakpoint number: '{}'", token));
        match token.split_once('-') {
            Some((from, to)) if !from.is_empty() => {
                let from: i32 = from.parse().map_err(|_| bad())?;
                let to: i32 = to.parse().map_err(|_| bad())?;
                if from > to {
                    return Err(Error::InvalidArgument(format!(
                        "inverted breakpoint range: '{}'",
                        token
                    )));
                }
                ranges.push(BreakpointNumber(from)..=BreakpointNumber(to));
            }
            _ => {
                let number = BreakpointNumber(token.parse().map_err(|_| bad())?);
                ranges.push(number..=number);
            }
        }
    }
    if ranges.is_empty() {
        return Err(Error::InvalidArgument("empty breakpoint list".to_string()));
    }
    Ok(ranges)
}

/// `"3"` or `"5-9"`
fn span_label(from: i64, to: i64) -> String {
    if from == to {
        from.to_string()
    } else {
        format!("{}-{}", from, to)
    }
}

impl<I: Inferior> Engine<I> {
    /// Create a code breakpoint from a location spec
    pub fn create(&mut self, request: CreateRequest) -> Result<BreakpointNumber> {
        let spec = LocationSpec::parse(&request.spec)?;
        let kind = if request.hardware {
            BreakpointKind::Hardware
        } else {
            BreakpointKind::Software
        };

        let resolution = match self.inferior.resolve(&spec) {
            Ok(resolution) => resolution,
            Err(ResolveError::NotFound(what)) => {
                return match self.config.breakpoints.pending {
                    PendingPolicy::Off => Err(Error::LocationNotFound(what)),
                    PendingPolicy::Auto => Ok(self.create_pending(kind, &request)),
                };
            }
            Err(ResolveError::Invalid(message)) => return Err(Error::InvalidArgument(message)),
        };

        let matches = match &request.select {
            None => resolution.matches,
            Some(indices) => {
                let mut picked = Vec::with_capacity(indices.len());
                for index in indices {
                    let m = resolution.matches.get(*index).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "no match {} for '{}' ({} found)",
                            index,
                            request.spec,
                            resolution.matches.len()
                        ))
                    })?;
                    picked.push(m.clone());
                }
                picked
            }
        };

        if request.hardware && !request.disabled {
            self.check_hw_capacity(HwResource::Breakpoint, matches.len())?;
        }

        let number = self.store.allocate_number(false);
        let mut bp = Breakpoint::new(number, kind.clone());
        apply_request(&mut bp, &request);
        bp.canonical = Some(resolution.canonical);
        bp.module = matches.first().and_then(|m| m.module);
        self.store.insert_breakpoint(bp);

        let location_kind = location_kind_for(&kind);
        for m in &matches {
            self.add_resolved_location(number, m, location_kind.clone())?;
        }
        self.check_duplicates(number);

        tracing::debug!(
            number = %number,
            spec = %request.spec,
            locations = matches.len(),
            "Created breakpoint"
        );
        Ok(number)
    }

    fn create_pending(&mut self, kind: BreakpointKind, request: &CreateRequest) -> BreakpointNumber {
        let number = self.store.allocate_number(false);
        let mut bp = Breakpoint::new(number, kind);
        apply_request(&mut bp, request);
        bp.resolution = ResolutionState::Pending;
        self.store.insert_breakpoint(bp);
        self.warn(format!(
            "Breakpoint {} ({}) pending until a matching location is loaded",
            number, request.spec
        ));
        number
    }

    /// Attach a location built from a resolver match
    pub(crate) fn add_resolved_location(
        &mut self,
        number: BreakpointNumber,
        m: &ResolvedMatch,
        kind: LocationKind,
    ) -> Result<LocationId> {
        let software = kind == LocationKind::Software;
        let mut loc = Location::new(number, kind, m.address);
        loc.address = self.inferior.adjust_breakpoint_address(m.address);
        loc.section = m.section;
        loc.module = m.module;
        loc.file = m.file.clone();
        loc.line = m.line;
        loc.function = m.function.clone();
        let address = loc.address;
        let id = self
            .store
            .add_location(loc)
            .ok_or(Error::BreakpointNotFound(number))?;

        if software && self.has_program_trap(address) {
            let bp = self.breakpoint_mut(number)?;
            if bp.enable_state == EnableState::Enabled {
                tracing::debug!(number = %number, "Program already traps here; breakpoint is permanent");
                bp.enable_state = EnableState::Permanent;
            }
        }
        Ok(id)
    }

    /// Whether the program itself has a trap instruction at `address`
    fn has_program_trap(&mut self, address: Address) -> bool {
        let trap = self.inferior.breakpoint_encoding(address);
        // Debug-register slots never touch memory, so only software traps count
        let ours = self
            .store
            .locations()
            .find(|(_, loc)| {
                loc.kind == LocationKind::Software
                    && loc.inserted
                    && loc.placed_at == Some(address)
            })
            .map(|(_, loc)| loc.shadow.clone());
        match ours {
            // Our trap is in the way; look at what it replaced
            Some(Some(shadow)) => shadow == trap,
            // A permanent location already claimed the program's trap
            Some(None) => true,
            None => self
                .inferior
                .read_memory(address, trap.len())
                .is_ok_and(|bytes| bytes == trap),
        }
    }

    /// Create an engine-internal helper breakpoint
    pub fn create_internal(
        &mut self,
        kind: InternalKind,
        address: Address,
        frame: Option<FrameId>,
        thread: Option<ThreadId>,
    ) -> Result<BreakpointNumber> {
        let spec = LocationSpec::Address { address };
        let found = self
            .inferior
            .resolve(&spec)
            .ok()
            .and_then(|r| r.matches.into_iter().next())
            .unwrap_or(ResolvedMatch {
                address,
                section: None,
                module: None,
                file: None,
                line: None,
                function: None,
            });

        let number = self.store.allocate_number(true);
        let mut bp = Breakpoint::new(number, BreakpointKind::Internal { kind });
        bp.frame = frame;
        bp.thread = thread;
        bp.canonical = Some(spec.to_string());
        bp.module = found.module;
        self.store.insert_breakpoint(bp);

        self.add_resolved_location(number, &found, LocationKind::Software)?;
        self.check_duplicates(number);
        tracing::debug!(number = %number, ?kind, address = format_args!("{:#x}", address), "Created internal breakpoint");
        Ok(number)
    }

    /// Delete a breakpoint and its related scope-guard; deleting twice is fine
    pub fn delete(&mut self, number: BreakpointNumber) -> Result<()> {
        let Some(bp) = self.store.get(number) else {
            return Ok(());
        };
        let related = bp.related;
        self.delete_one(number);
        if let Some(related) = related {
            self.delete_one(related);
        }
        Ok(())
    }

    fn delete_one(&mut self, number: BreakpointNumber) {
        let Some(bp) = self.store.get_mut(number) else {
            return;
        };
        bp.enable_state = EnableState::Disabled;
        self.lift_breakpoint(number);
        self.store.remove_breakpoint(number);
        self.parked_for_call.retain(|n| *n != number);
        for other in self.store.numbers() {
            if let Some(bp) = self.store.get_mut(other) {
                if bp.related == Some(number) {
                    bp.related = None;
                }
            }
        }
        self.update_global_single_step();
        tracing::debug!(number = %number, "Deleted breakpoint");
    }

    pub fn enable(&mut self, number: BreakpointNumber) -> Result<()> {
        let bp = self.breakpoint_mut(number)?;
        if bp.enable_state.is_active() {
            return Ok(());
        }

        let resource = match (&bp.kind, bp.watch.as_ref().map(|w| w.mode)) {
            (BreakpointKind::Hardware, _) => Some(HwResource::Breakpoint),
            (BreakpointKind::Watchpoint { .. }, Some(WatchMode::Hardware)) => {
                Some(HwResource::Watchpoint)
            }
            _ => None,
        };
        let resolved = bp.resolution == ResolutionState::Resolved;
        if let (Some(resource), true) = (resource, resolved) {
            let needed = self.store.locations_of(number).len();
            self.check_hw_capacity(resource, needed)?;
        }

        self.breakpoint_mut(number)?.enable_state = EnableState::Enabled;
        if self.store.get(number).is_some_and(|bp| bp.kind.is_watchpoint()) {
            // A watchpoint out of scope is gone by now
            if let Err(e) = self.update_watchpoint(number) {
                if let Some(bp) = self.store.get_mut(number) {
                    bp.enable_state = EnableState::Disabled;
                }
                return Err(e);
            }
        }
        self.check_duplicates(number);
        self.update_global_single_step();
        Ok(())
    }

    /// Enable, then disable again after the next stop
    pub fn enable_once(&mut self, number: BreakpointNumber) -> Result<()> {
        self.enable(number)?;
        self.breakpoint_mut(number)?.disposition = Disposition::Disable;
        Ok(())
    }

    /// Enable, then delete after the next stop
    pub fn enable_delete(&mut self, number: BreakpointNumber) -> Result<()> {
        self.enable(number)?;
        self.breakpoint_mut(number)?.disposition = Disposition::Delete;
        Ok(())
    }

    pub fn disable(&mut self, number: BreakpointNumber) -> Result<()> {
        let bp = self.breakpoint_mut(number)?;
        if bp.enable_state == EnableState::Disabled {
            return Ok(());
        }
        bp.enable_state = EnableState::Disabled;
        self.lift_breakpoint(number);
        self.update_global_single_step();
        Ok(())
    }

    /// Set or clear (`None` or empty text) the condition
    pub fn set_condition(&mut self, number: BreakpointNumber, text: Option<&str>) -> Result<()> {
        let bp = self.breakpoint_mut(number)?;
        bp.condition = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(Condition::new);
        Ok(())
    }

    pub fn set_ignore_count(&mut self, number: BreakpointNumber, count: u32) -> Result<()> {
        self.breakpoint_mut(number)?.ignore_count = count;
        Ok(())
    }

    pub fn set_commands(&mut self, number: BreakpointNumber, commands: Vec<String>) -> Result<()> {
        self.breakpoint_mut(number)?.commands = commands;
        Ok(())
    }

    pub fn set_thread(&mut self, number: BreakpointNumber, thread: Option<ThreadId>) -> Result<()> {
        self.breakpoint_mut(number)?.thread = thread;
        Ok(())
    }

    /// Apply `op` to every breakpoint named by a number list
    ///
    /// Unknown numbers produce one coalesced warning instead of an error.
    pub fn for_each_in_list<F>(&mut self, list: &str, mut op: F) -> Result<Vec<BreakpointNumber>>
    where
        F: FnMut(&mut Self, BreakpointNumber) -> Result<()>,
    {
        let mut done = Vec::new();
        let mut missing = Vec::new();
        for range in parse_number_list(list)? {
            let end = i64::from(range.end().0);
            let mut next = i64::from(range.start().0);
            for number in self.store.numbers_in(range) {
                let at = i64::from(number.0);
                if at > next {
                    missing.push(span_label(next, at - 1));
                }
                next = at + 1;
                // An earlier op may have taken this one with it
                if self.store.contains(number) {
                    op(self, number)?;
                    done.push(number);
                }
            }
            if next <= end {
                missing.push(span_label(next, end));
            }
        }
        if !missing.is_empty() {
            self.warn(format!(
                "No breakpoint number {}.",
                crate::common::coalesce(&missing)
            ));
        }
        Ok(done)
    }

    pub fn enumerate(&self, filter: &EnumerateFilter) -> Vec<BreakpointDescriptor> {
        self.store
            .iter()
            .filter(|bp| filter.include_internal || !bp.is_internal())
            .filter(|bp| {
                filter
                    .numbers
                    .as_ref()
                    .map_or(true, |numbers| numbers.contains(&bp.number))
            })
            .map(|bp| self.describe(bp))
            .collect()
    }

    fn describe(&self, bp: &Breakpoint) -> BreakpointDescriptor {
        let locations = bp
            .locations
            .iter()
            .filter_map(|id| self.store.location(*id))
            .filter(|loc| loc.kind.is_address_meaningful())
            .map(|loc| LocationDescriptor {
                address: format!("{:#x}", loc.address),
                inserted: loc.inserted,
                duplicate: loc.duplicate,
                what: loc.describe(),
            })
            .collect();
        BreakpointDescriptor {
            number: bp.number,
            kind: kind_label(bp).to_string(),
            disposition: bp.disposition,
            enable_state: bp.enable_state,
            what: ops_for(&bp.kind).describe(bp, &self.store),
            pending: bp.is_pending(),
            condition: bp.condition.as_ref().map(|c| c.text.clone()),
            thread: bp.thread,
            hit_count: bp.hit_count,
            ignore_count: bp.ignore_count,
            commands: bp.commands.clone(),
            locations,
        }
    }
}

fn apply_request(bp: &mut Breakpoint, request: &CreateRequest) {
    bp.spec_text = Some(request.spec.clone());
    bp.condition = request
        .condition
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Condition::new);
    bp.thread = request.thread;
    bp.ignore_count = request.ignore_count;
    bp.commands = request.commands.clone();
    if request.temporary {
        bp.disposition = Disposition::Delete;
    }
    if request.disabled {
        bp.enable_state = EnableState::Disabled;
    }
}

pub(crate) fn location_kind_for(kind: &BreakpointKind) -> LocationKind {
    match kind {
        BreakpointKind::Hardware => LocationKind::Hardware,
        _ => LocationKind::Software,
    }
}
