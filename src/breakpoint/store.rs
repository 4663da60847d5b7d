//! Owning store for breakpoints and locations

use slotmap::SlotMap;
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use super::{Breakpoint, BreakpointNumber, Location, LocationId, Placement};

/// Breakpoints keyed by number, locations in a slot map, plus a
/// (address, section) index used for duplicate detection
#[derive(Debug)]
pub struct BreakpointStore {
    breakpoints: BTreeMap<BreakpointNumber, Breakpoint>,
    locations: SlotMap<LocationId, Location>,
    by_placement: HashMap<Placement, Vec<LocationId>>,
    next_user: i32,
    next_internal: i32,
}

impl Default for BreakpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            locations: SlotMap::with_key(),
            by_placement: HashMap::new(),
            next_user: 1,
            next_internal: -1,
        }
    }

    /// Hand out the next number in the user or internal namespace
    pub fn allocate_number(&mut self, internal: bool) -> BreakpointNumber {
        if internal {
            let n = self.next_internal;
            self.next_internal -= 1;
            BreakpointNumber(n)
        } else {
            let n = self.next_user;
            self.next_user += 1;
            BreakpointNumber(n)
        }
    }

    pub fn insert_breakpoint(&mut self, bp: Breakpoint) {
        self.breakpoints.insert(bp.number, bp);
    }

    pub fn get(&self, number: BreakpointNumber) -> Option<&Breakpoint> {
        self.breakpoints.get(&number)
    }

    pub fn get_mut(&mut self, number: BreakpointNumber) -> Option<&mut Breakpoint> {
        self.breakpoints.get_mut(&number)
    }

    pub fn contains(&self, number: BreakpointNumber) -> bool {
        self.breakpoints.contains_key(&number)
    }

    /// Breakpoints in number order (internal ones first)
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn numbers(&self) -> Vec<BreakpointNumber> {
        self.breakpoints.keys().copied().collect()
    }

    /// Existing numbers within `range`, in order
    pub fn numbers_in(&self, range: RangeInclusive<BreakpointNumber>) -> Vec<BreakpointNumber> {
        self.breakpoints.range(range).map(|(number, _)| *number).collect()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Detach a breakpoint and all of its locations from the store
    ///
    /// The caller is responsible for having lifted inserted locations first.
    pub fn remove_breakpoint(&mut self, number: BreakpointNumber) -> Option<(Breakpoint, Vec<Location>)> {
        let bp = self.breakpoints.remove(&number)?;
        let locations = bp
            .locations
            .iter()
            .filter_map(|id| self.unlink_location(*id))
            .collect();
        Some((bp, locations))
    }

    /// Attach a new location to its owner and index it
    pub fn add_location(&mut self, location: Location) -> Option<LocationId> {
        let owner = location.owner;
        if !self.breakpoints.contains_key(&owner) {
            return None;
        }
        let placement = location.placement();
        let meaningful = location.kind.is_address_meaningful();
        let id = self.locations.insert(location);
        if meaningful {
            self.by_placement.entry(placement).or_default().push(id);
        }
        if let Some(bp) = self.breakpoints.get_mut(&owner) {
            bp.locations.push(id);
        }
        Some(id)
    }

    /// Remove one location from its owner and the index
    pub fn remove_location(&mut self, id: LocationId) -> Option<Location> {
        let location = self.unlink_location(id)?;
        if let Some(bp) = self.breakpoints.get_mut(&location.owner) {
            bp.locations.retain(|l| *l != id);
        }
        Some(location)
    }

    fn unlink_location(&mut self, id: LocationId) -> Option<Location> {
        let location = self.locations.remove(id)?;
        let placement = location.placement();
        if let Some(ids) = self.by_placement.get_mut(&placement) {
            ids.retain(|l| *l != id);
            if ids.is_empty() {
                self.by_placement.remove(&placement);
            }
        }
        Some(location)
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn location_mut(&mut self, id: LocationId) -> Option<&mut Location> {
        self.locations.get_mut(id)
    }

    pub fn locations(&self) -> impl Iterator<Item = (LocationId, &Location)> {
        self.locations.iter()
    }

    /// Locations of one breakpoint, in creation order
    pub fn locations_of(&self, number: BreakpointNumber) -> Vec<LocationId> {
        self.breakpoints
            .get(&number)
            .map(|bp| bp.locations.clone())
            .unwrap_or_default()
    }

    /// Address-meaningful locations sharing a placement
    pub fn locations_at(&self, placement: Placement) -> &[LocationId] {
        self.by_placement
            .get(&placement)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Both halves of a location query at once
    pub fn location_with_owner(&self, id: LocationId) -> Option<(&Location, &Breakpoint)> {
        let location = self.locations.get(id)?;
        let owner = self.breakpoints.get(&location.owner)?;
        Some((location, owner))
    }
}
