//! Per-kind capability interface
//!
//! Every [`BreakpointKind`] maps to one [`LocationOps`] implementation. The
//! insertion manager and the stop classifier only ever go through this
//! trait, so adding a kind means adding one impl rather than touching a
//! switch in every caller.

use super::{
    Breakpoint, BreakpointKind, BreakpointStore, InternalKind, Location, LocationKind, WatchHint,
};
use crate::common::{Error, Result};
use crate::target::{Address, NativeEvent, TargetControl, TargetError, ThreadId};

/// Target-independent facts needed while inserting
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertContext {
    /// Overlay debugging is on
    pub overlays: bool,
}

/// The raw stop as seen by `matches_stop`
#[derive(Debug, Clone)]
pub struct StopContext {
    pub address: Address,
    pub thread: ThreadId,
    pub hint: WatchHint,
    pub event: Option<NativeEvent>,
}

/// Capabilities every breakpoint kind provides
pub trait LocationOps: Sync {
    /// Realise one location in the target
    fn insert(
        &self,
        location: &mut Location,
        target: &mut dyn TargetControl,
        ctx: &InsertContext,
    ) -> Result<()>;

    /// Undo `insert`
    fn remove(&self, location: &mut Location, target: &mut dyn TargetControl) -> Result<()>;

    /// Whether this breakpoint is a candidate for the stop
    fn matches_stop(
        &self,
        bp: &Breakpoint,
        store: &BreakpointStore,
        stop: &StopContext,
        target: &dyn TargetControl,
    ) -> bool;

    /// One-line description for listings
    fn describe(&self, bp: &Breakpoint, store: &BreakpointStore) -> String;
}

struct CodeOps;
struct HardwareOps;
struct WatchOps;
struct CatchOps;
struct InternalOps;

static CODE_OPS: CodeOps = CodeOps;
static HARDWARE_OPS: HardwareOps = HardwareOps;
static WATCH_OPS: WatchOps = WatchOps;
static CATCH_OPS: CatchOps = CatchOps;
static INTERNAL_OPS: InternalOps = InternalOps;

/// Capability table lookup
pub fn ops_for(kind: &BreakpointKind) -> &'static dyn LocationOps {
    match kind {
        BreakpointKind::Software => &CODE_OPS,
        BreakpointKind::Hardware => &HARDWARE_OPS,
        BreakpointKind::Watchpoint { .. } => &WATCH_OPS,
        BreakpointKind::Catchpoint { .. } => &CATCH_OPS,
        BreakpointKind::Internal { .. } => &INTERNAL_OPS,
    }
}

/// Address the trap is physically written to
///
/// Overlay sections share one run address between several load images. When
/// the section isn't mapped, or the target can't write into the mapped copy,
/// the trap goes into the load image so it is carried in on the next map.
pub fn placement_address(
    location: &Location,
    target: &dyn TargetControl,
    ctx: &InsertContext,
) -> Address {
    if !ctx.overlays {
        return location.address;
    }
    let Some(section) = location.section.and_then(|s| target.section_info(s)) else {
        return location.address;
    };
    if !section.overlay {
        return location.address;
    }
    if target.section_is_mapped(section.id) && target.can_instrument_mapped_overlays() {
        location.address
    } else {
        section.load_address(location.address)
    }
}

/// Whether the location sits in an overlay that is not currently mapped
pub fn in_unmapped_overlay(location: &Location, target: &dyn TargetControl) -> bool {
    location
        .section
        .and_then(|s| target.section_info(s))
        .is_some_and(|section| section.overlay && !target.section_is_mapped(section.id))
}

fn hw_error(resource: &str, e: TargetError) -> Error {
    match e {
        TargetError::NoHardwareSlot(_) => Error::resource_exhausted(resource, 1, 0),
        other => Error::Target(other),
    }
}

fn insert_trap(
    location: &mut Location,
    target: &mut dyn TargetControl,
    ctx: &InsertContext,
) -> Result<()> {
    let at = placement_address(location, target, ctx);
    let trap = target.breakpoint_encoding(at);
    let shadow = target
        .read_memory(at, trap.len())
        .map_err(|e| Error::target_memory(at, e))?;
    target
        .write_memory(at, &trap)
        .map_err(|e| Error::target_memory(at, e))?;
    location.shadow = Some(shadow);
    location.placed_at = Some(at);
    location.inserted = true;
    Ok(())
}

fn remove_trap(location: &mut Location, target: &mut dyn TargetControl) -> Result<()> {
    let at = location.placed_at.unwrap_or(location.address);
    if let Some(shadow) = &location.shadow {
        target
            .write_memory(at, shadow)
            .map_err(|e| Error::target_memory(at, e))?;
    }
    location.shadow = None;
    location.placed_at = None;
    location.inserted = false;
    Ok(())
}

fn at_address(
    bp: &Breakpoint,
    store: &BreakpointStore,
    stop: &StopContext,
    target: &dyn TargetControl,
) -> bool {
    bp.locations.iter().any(|id| {
        store.location(*id).is_some_and(|loc| {
            loc.kind.is_address_meaningful()
                && loc.address == stop.address
                && !in_unmapped_overlay(loc, target)
        })
    })
}

fn describe_locations(bp: &Breakpoint, store: &BreakpointStore) -> String {
    if bp.is_pending() {
        return format!(
            "<PENDING> {}",
            bp.spec_text.as_deref().unwrap_or("<unknown>")
        );
    }
    let described: Vec<String> = bp
        .locations
        .iter()
        .filter_map(|id| store.location(*id))
        .map(Location::describe)
        .collect();
    match described.len() {
        0 => "<no locations>".to_string(),
        1 => described[0].clone(),
        n => format!("<MULTIPLE: {}> {}", n, described.join("; ")),
    }
}

impl LocationOps for CodeOps {
    fn insert(
        &self,
        location: &mut Location,
        target: &mut dyn TargetControl,
        ctx: &InsertContext,
    ) -> Result<()> {
        insert_trap(location, target, ctx)
    }

    fn remove(&self, location: &mut Location, target: &mut dyn TargetControl) -> Result<()> {
        remove_trap(location, target)
    }

    fn matches_stop(
        &self,
        bp: &Breakpoint,
        store: &BreakpointStore,
        stop: &StopContext,
        target: &dyn TargetControl,
    ) -> bool {
        at_address(bp, store, stop, target)
    }

    fn describe(&self, bp: &Breakpoint, store: &BreakpointStore) -> String {
        format!("breakpoint at {}", describe_locations(bp, store))
    }
}

impl LocationOps for HardwareOps {
    fn insert(
        &self,
        location: &mut Location,
        target: &mut dyn TargetControl,
        _ctx: &InsertContext,
    ) -> Result<()> {
        target
            .insert_hw_breakpoint(location.address)
            .map_err(|e| hw_error("breakpoint", e))?;
        location.placed_at = Some(location.address);
        location.inserted = true;
        Ok(())
    }

    fn remove(&self, location: &mut Location, target: &mut dyn TargetControl) -> Result<()> {
        target.remove_hw_breakpoint(location.address)?;
        location.placed_at = None;
        location.inserted = false;
        Ok(())
    }

    fn matches_stop(
        &self,
        bp: &Breakpoint,
        store: &BreakpointStore,
        stop: &StopContext,
        target: &dyn TargetControl,
    ) -> bool {
        at_address(bp, store, stop, target)
    }

    fn describe(&self, bp: &Breakpoint, store: &BreakpointStore) -> String {
        format!("hw breakpoint at {}", describe_locations(bp, store))
    }
}

impl LocationOps for WatchOps {
    fn insert(
        &self,
        location: &mut Location,
        target: &mut dyn TargetControl,
        _ctx: &InsertContext,
    ) -> Result<()> {
        if let LocationKind::HardwareWatch { range, access } = location.kind {
            target
                .insert_hw_watchpoint(range, access)
                .map_err(|e| hw_error("watchpoint", e))?;
        }
        location.inserted = true;
        Ok(())
    }

    fn remove(&self, location: &mut Location, target: &mut dyn TargetControl) -> Result<()> {
        if let LocationKind::HardwareWatch { range, access } = location.kind {
            target.remove_hw_watchpoint(range, access)?;
        }
        location.inserted = false;
        Ok(())
    }

    fn matches_stop(
        &self,
        _bp: &Breakpoint,
        _store: &BreakpointStore,
        stop: &StopContext,
        _target: &dyn TargetControl,
    ) -> bool {
        stop.hint != WatchHint::No
    }

    fn describe(&self, bp: &Breakpoint, _store: &BreakpointStore) -> String {
        let Some(watch) = &bp.watch else {
            return "watchpoint".to_string();
        };
        let prefix = match (watch.mode, watch.kind) {
            (super::WatchMode::Software, _) => "watchpoint",
            (super::WatchMode::Hardware, super::WatchKind::Write) => "hw watchpoint",
            (super::WatchMode::Hardware, super::WatchKind::Read) => "read watchpoint",
            (super::WatchMode::Hardware, super::WatchKind::Access) => "acc watchpoint",
        };
        format!("{} {}", prefix, watch.expression)
    }
}

impl LocationOps for CatchOps {
    fn insert(
        &self,
        location: &mut Location,
        target: &mut dyn TargetControl,
        _ctx: &InsertContext,
    ) -> Result<()> {
        if let LocationKind::Catch { hook: Some(hook) } = location.kind {
            target.insert_catch_hook(hook)?;
        }
        location.inserted = true;
        Ok(())
    }

    fn remove(&self, location: &mut Location, target: &mut dyn TargetControl) -> Result<()> {
        if let LocationKind::Catch { hook: Some(hook) } = location.kind {
            target.remove_catch_hook(hook)?;
        }
        location.inserted = false;
        Ok(())
    }

    fn matches_stop(
        &self,
        bp: &Breakpoint,
        _store: &BreakpointStore,
        stop: &StopContext,
        target: &dyn TargetControl,
    ) -> bool {
        match (&bp.kind, &stop.event) {
            (BreakpointKind::Catchpoint { kind }, Some(event)) => kind.matches_event(event, target),
            _ => false,
        }
    }

    fn describe(&self, bp: &Breakpoint, _store: &BreakpointStore) -> String {
        match &bp.kind {
            BreakpointKind::Catchpoint { kind } => kind.describe(),
            _ => "catchpoint".to_string(),
        }
    }
}

impl LocationOps for InternalOps {
    fn insert(
        &self,
        location: &mut Location,
        target: &mut dyn TargetControl,
        ctx: &InsertContext,
    ) -> Result<()> {
        insert_trap(location, target, ctx)
    }

    fn remove(&self, location: &mut Location, target: &mut dyn TargetControl) -> Result<()> {
        remove_trap(location, target)
    }

    fn matches_stop(
        &self,
        bp: &Breakpoint,
        store: &BreakpointStore,
        stop: &StopContext,
        target: &dyn TargetControl,
    ) -> bool {
        at_address(bp, store, stop, target)
    }

    fn describe(&self, bp: &Breakpoint, store: &BreakpointStore) -> String {
        let what = match bp.kind.internal_kind() {
            Some(InternalKind::WatchpointScope) => "watchpoint scope",
            Some(InternalKind::StepResume) => "step resume",
            Some(InternalKind::ModuleEvent) => "module events",
            None => "internal",
        };
        format!("{} at {}", what, describe_locations(bp, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::BreakpointNumber;
    use crate::target::sim::SimInferior;
    use crate::target::SectionId;

    #[test]
    fn test_trap_insert_and_remove_restore_memory() {
        let mut sim = SimInferior::new();
        sim.write_bytes(0x1000, &[0x55, 0x48, 0x89]);
        let mut loc = Location::new(BreakpointNumber(1), LocationKind::Software, 0x1000);

        CODE_OPS
            .insert(&mut loc, &mut sim, &InsertContext::default())
            .unwrap();
        assert!(loc.inserted);
        assert_eq!(loc.shadow.as_deref(), Some(&[0x55][..]));
        assert_eq!(sim.bytes(0x1000, 3), vec![0xcc, 0x48, 0x89]);

        CODE_OPS.remove(&mut loc, &mut sim).unwrap();
        assert!(!loc.inserted);
        assert_eq!(sim.bytes(0x1000, 3), vec![0x55, 0x48, 0x89]);
    }

    #[test]
    fn test_trap_insert_fails_on_read_only_memory() {
        let mut sim = SimInferior::new();
        sim.write_bytes(0x2000, &[0x90]);
        sim.protect(0x2000);
        let mut loc = Location::new(BreakpointNumber(1), LocationKind::Software, 0x2000);

        let err = CODE_OPS
            .insert(&mut loc, &mut sim, &InsertContext::default())
            .unwrap_err();
        assert_eq!(err.code(), "TARGET_MEMORY_ERROR");
        assert!(!loc.inserted);
        assert_eq!(sim.bytes(0x2000, 1), vec![0x90]);
    }

    #[test]
    fn test_unmapped_overlay_places_trap_at_load_address() {
        let mut sim = SimInferior::new();
        sim.add_overlay_section(SectionId(7), 0x8000, 0x2_0000, 0x100);
        sim.write_bytes(0x2_0010, &[0x11]);
        let mut loc = Location::new(BreakpointNumber(1), LocationKind::Software, 0x8010);
        loc.section = Some(SectionId(7));

        let ctx = InsertContext { overlays: true };
        assert_eq!(placement_address(&loc, &sim, &ctx), 0x2_0010);
        assert!(in_unmapped_overlay(&loc, &sim));

        CODE_OPS.insert(&mut loc, &mut sim, &ctx).unwrap();
        assert_eq!(loc.placed_at, Some(0x2_0010));
        assert_eq!(sim.bytes(0x2_0010, 1), vec![0xcc]);

        CODE_OPS.remove(&mut loc, &mut sim).unwrap();
        assert_eq!(sim.bytes(0x2_0010, 1), vec![0x11]);
    }

    #[test]
    fn test_mapped_overlay_uses_run_address_when_instrumentable() {
        let mut sim = SimInferior::new();
        sim.add_overlay_section(SectionId(7), 0x8000, 0x2_0000, 0x100);
        sim.map_overlay(SectionId(7), true);
        sim.set_can_instrument_overlays(true);
        let mut loc = Location::new(BreakpointNumber(1), LocationKind::Software, 0x8010);
        loc.section = Some(SectionId(7));

        let ctx = InsertContext { overlays: true };
        assert_eq!(placement_address(&loc, &sim, &ctx), 0x8010);
        assert!(!in_unmapped_overlay(&loc, &sim));

        sim.set_can_instrument_overlays(false);
        assert_eq!(placement_address(&loc, &sim, &ctx), 0x2_0010);
        assert_eq!(
            placement_address(&loc, &sim, &InsertContext { overlays: false }),
            0x8010
        );
    }
}
