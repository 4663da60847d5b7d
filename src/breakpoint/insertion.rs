//! Insertion and removal of locations
//!
//! Turns the desired state of each location (owner active, resolved, not a
//! duplicate) into target mutations. Per-location failures never abort a
//! batch: they are logged against the owning breakpoint and reported.

use serde::Serialize;

use super::kind::ops_for;
use super::{
    BreakpointNumber, EnableState, LocationId, LocationKind, Placement,
};
use crate::common::{coalesce, Error, Result};
use crate::engine::Engine;
use crate::target::{HwResource, Inferior};

/// What `insert_location` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyInserted,
    /// Duplicate, or owner disabled/pending
    Skipped,
}

/// Result of a batch insertion before resuming
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    pub inserted: usize,
    /// Breakpoints with a location that could not be inserted
    pub failed: Vec<(BreakpointNumber, String)>,
    /// Breakpoints downgraded to disabled-until-library-reloads
    pub library_disabled: Vec<BreakpointNumber>,
}

impl InsertReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.library_disabled.is_empty()
    }
}

fn resource_of(kind: &LocationKind) -> Option<HwResource> {
    match kind {
        LocationKind::Hardware => Some(HwResource::Breakpoint),
        LocationKind::HardwareWatch { .. } => Some(HwResource::Watchpoint),
        _ => None,
    }
}

impl<I: Inferior> Engine<I> {
    /// Install one location; idempotent
    pub fn insert_location(&mut self, id: LocationId) -> Result<InsertOutcome> {
        let ctx = self.insert_context();
        let (kind, resource, permanent) = {
            let (loc, bp) = self
                .store
                .location_with_owner(id)
                .ok_or_else(|| Error::Internal("location without owner".to_string()))?;
            if loc.inserted {
                return Ok(InsertOutcome::AlreadyInserted);
            }
            if loc.duplicate || !bp.should_be_inserted() {
                return Ok(InsertOutcome::Skipped);
            }
            let permanent =
                bp.enable_state == EnableState::Permanent && loc.kind == LocationKind::Software;
            (bp.kind.clone(), resource_of(&loc.kind), permanent)
        };

        if let Some(resource) = resource {
            let used = self.hw_slots_in_use(resource);
            let capacity = self.inferior.hw_slot_capacity(resource);
            if used + 1 > capacity {
                return Err(Error::resource_exhausted(
                    &resource.to_string(),
                    used + 1,
                    capacity,
                ));
            }
        }

        let loc = self
            .store
            .location_mut(id)
            .ok_or_else(|| Error::Internal("location vanished".to_string()))?;
        if permanent {
            // The program's own trap; nothing to write and nothing to restore
            loc.inserted = true;
            loc.shadow = None;
            loc.placed_at = Some(loc.address);
            return Ok(InsertOutcome::Inserted);
        }
        ops_for(&kind).insert(loc, &mut self.inferior, &ctx)?;
        tracing::debug!(
            breakpoint = %loc.owner,
            address = format_args!("{:#x}", loc.address),
            placed_at = ?loc.placed_at,
            "Inserted location"
        );
        Ok(InsertOutcome::Inserted)
    }

    /// Lift one location; idempotent and independent of the owner's state
    pub fn remove_location(&mut self, id: LocationId) -> Result<()> {
        let kind = {
            let (loc, bp) = self
                .store
                .location_with_owner(id)
                .ok_or_else(|| Error::Internal("location without owner".to_string()))?;
            if !loc.inserted {
                return Ok(());
            }
            bp.kind.clone()
        };
        let loc = self
            .store
            .location_mut(id)
            .ok_or_else(|| Error::Internal("location vanished".to_string()))?;
        ops_for(&kind).remove(loc, &mut self.inferior)?;
        tracing::debug!(
            breakpoint = %loc.owner,
            address = format_args!("{:#x}", loc.address),
            "Removed location"
        );
        Ok(())
    }

    /// Hardware slots currently occupied in the target
    pub(crate) fn hw_slots_in_use(&self, resource: HwResource) -> usize {
        self.store
            .locations()
            .filter(|(_, loc)| loc.inserted && resource_of(&loc.kind) == Some(resource))
            .count()
    }

    /// Hardware slots that active breakpoints will need on the next resume
    pub(crate) fn hw_slots_committed(&self, resource: HwResource) -> usize {
        self.store
            .locations()
            .filter(|(_, loc)| resource_of(&loc.kind) == Some(resource) && !loc.duplicate)
            .filter(|(_, loc)| {
                self.store
                    .get(loc.owner)
                    .is_some_and(|bp| bp.should_be_inserted())
            })
            .count()
    }

    /// Fail fast if `additional` more slots would overflow the pool
    pub(crate) fn check_hw_capacity(&self, resource: HwResource, additional: usize) -> Result<()> {
        if additional == 0 {
            return Ok(());
        }
        let committed = self.hw_slots_committed(resource);
        let capacity = self.inferior.hw_slot_capacity(resource);
        if committed + additional > capacity {
            return Err(Error::resource_exhausted(
                &resource.to_string(),
                committed + additional,
                capacity,
            ));
        }
        Ok(())
    }

    /// Recompute duplicate flags for every placement of a breakpoint
    pub fn check_duplicates(&mut self, number: BreakpointNumber) {
        let placements: Vec<Placement> = self
            .store
            .locations_of(number)
            .into_iter()
            .filter_map(|id| self.store.location(id))
            .filter(|loc| loc.kind.is_address_meaningful())
            .map(|loc| loc.placement())
            .collect();
        for placement in placements {
            self.check_duplicates_at(placement);
        }
    }

    /// Recompute which location at one placement is primary
    ///
    /// Primary is the permanent breakpoint if there is one, otherwise the
    /// lowest breakpoint number among active owners. If a different location
    /// currently holds the trap, ownership of the trap moves to the primary
    /// without touching target memory.
    pub fn check_duplicates_at(&mut self, placement: Placement) {
        let ids = self.store.locations_at(placement).to_vec();

        let mut eligible: Vec<(LocationId, BreakpointNumber, bool)> = Vec::new();
        for id in &ids {
            if let Some((_, bp)) = self.store.location_with_owner(*id) {
                if bp.should_be_inserted() {
                    eligible.push((
                        *id,
                        bp.number,
                        bp.enable_state == EnableState::Permanent,
                    ));
                }
            }
        }

        let primary = eligible
            .iter()
            .find(|(_, _, permanent)| *permanent)
            .or_else(|| eligible.iter().min_by_key(|(_, number, _)| *number))
            .map(|(id, _, _)| *id);

        for id in &ids {
            let is_eligible = eligible.iter().any(|(e, _, _)| e == id);
            if let Some(loc) = self.store.location_mut(*id) {
                loc.duplicate = is_eligible && Some(*id) != primary;
            }
        }

        let Some(primary) = primary else {
            return;
        };
        let holder = ids.iter().copied().find(|id| {
            *id != primary && self.store.location(*id).is_some_and(|loc| loc.inserted)
        });
        let Some(holder) = holder else {
            return;
        };
        let primary_inserted = self.store.location(primary).is_some_and(|l| l.inserted);
        let same_kind = self.store.location(primary).map(|l| &l.kind)
            == self.store.location(holder).map(|l| &l.kind);

        if primary_inserted || !same_kind {
            // Two physical placements; the holder's one has to go
            if let Err(e) = self.remove_location(holder) {
                tracing::warn!(error = %e, "Failed to lift superseded location");
            }
            return;
        }

        let (shadow, placed_at) = match self.store.location_mut(holder) {
            Some(loc) => {
                loc.inserted = false;
                (loc.shadow.take(), loc.placed_at.take())
            }
            None => return,
        };
        if let Some(loc) = self.store.location_mut(primary) {
            loc.inserted = true;
            loc.shadow = shadow;
            loc.placed_at = placed_at;
        }
    }

    /// Take every location of a breakpoint out of the target
    ///
    /// The owner must already be in an inactive state so duplicate
    /// recomputation can hand its traps to another breakpoint first.
    pub(crate) fn lift_breakpoint(&mut self, number: BreakpointNumber) {
        self.check_duplicates(number);
        for id in self.store.locations_of(number) {
            if let Err(e) = self.remove_location(id) {
                tracing::warn!(breakpoint = %number, error = %e, "Failed to remove location");
            }
        }
    }

    /// Insert everything that should be in the target before it resumes
    pub fn insert_all(&mut self) -> InsertReport {
        let mut report = InsertReport::default();

        for number in self.store.numbers() {
            let Some(bp) = self.store.get(number) else {
                continue;
            };
            if !bp.should_be_inserted() {
                continue;
            }
            for id in self.store.locations_of(number) {
                match self.insert_location(id) {
                    Ok(InsertOutcome::Inserted) => report.inserted += 1,
                    Ok(_) => {}
                    Err(e) => {
                        let shared = self
                            .store
                            .location(id)
                            .and_then(|loc| loc.module)
                            .and_then(|m| self.inferior.module_info(m))
                            .is_some_and(|info| info.shared);
                        tracing::warn!(
                            breakpoint = %number,
                            error = %e,
                            shared,
                            "Cannot insert breakpoint location"
                        );
                        if shared {
                            if let Some(bp) = self.store.get_mut(number) {
                                bp.enable_state = EnableState::DisabledUnloadedLibrary;
                            }
                            self.lift_breakpoint(number);
                            report.library_disabled.push(number);
                            break;
                        }
                        // The other locations still go in
                        report.failed.push((number, e.to_string()));
                    }
                }
            }
        }

        if !report.library_disabled.is_empty() {
            self.warn(format!(
                "Temporarily disabling shared library breakpoints: {}",
                coalesce(&report.library_disabled)
            ));
        }
        if !report.failed.is_empty() {
            let mut numbers: Vec<BreakpointNumber> =
                report.failed.iter().map(|(n, _)| *n).collect();
            numbers.dedup();
            self.warn(format!("Cannot insert breakpoints: {}", coalesce(&numbers)));
        }
        report
    }

    /// Lift every inserted location, continuing past failures
    pub fn remove_all(&mut self) -> Vec<(BreakpointNumber, String)> {
        let inserted: Vec<(LocationId, BreakpointNumber)> = self
            .store
            .locations()
            .filter(|(_, loc)| loc.inserted)
            .map(|(id, loc)| (id, loc.owner))
            .collect();

        let mut failures = Vec::new();
        for (id, owner) in inserted {
            if let Err(e) = self.remove_location(id) {
                tracing::warn!(breakpoint = %owner, error = %e, "Failed to remove location");
                failures.push((owner, e.to_string()));
            }
        }
        failures
    }

    /// Best-effort cleanup, then let the target go
    pub fn detach(&mut self) -> Result<()> {
        let failures = self.remove_all();
        if !failures.is_empty() {
            let numbers: Vec<BreakpointNumber> = failures.iter().map(|(n, _)| *n).collect();
            self.warn(format!(
                "Could not remove breakpoints {} before detaching",
                coalesce(&numbers)
            ));
        }
        self.inferior.set_global_single_step(false);
        self.global_single_step = false;
        self.inferior.detach()?;
        Ok(())
    }
}
