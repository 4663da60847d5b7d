//! Physical breakpoint placements

use serde::{Deserialize, Serialize};

use super::BreakpointNumber;
use crate::target::{Address, CatchHook, MemoryRange, ModuleId, SectionId, WatchAccess};

slotmap::new_key_type! {
    /// Stable handle of a location inside the store
    pub struct LocationId;
}

/// How a location is realised in the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocationKind {
    /// Trap instruction written over code
    Software,
    /// Hardware execution breakpoint slot
    Hardware,
    /// Hardware watch slot over a data range
    HardwareWatch { range: MemoryRange, access: WatchAccess },
    /// Native notification hook (fork, exec, exceptions)
    Catch { hook: Option<CatchHook> },
}

impl LocationKind {
    /// Kinds that occupy a code address and can therefore be duplicates
    pub fn is_address_meaningful(&self) -> bool {
        matches!(self, Self::Software | Self::Hardware)
    }
}

/// Key of the duplicate index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Placement {
    pub address: Address,
    pub section: Option<SectionId>,
}

/// One physical placement backing a breakpoint
#[derive(Debug, Clone)]
pub struct Location {
    pub owner: BreakpointNumber,
    pub kind: LocationKind,
    /// Address the resolver returned
    pub requested_address: Address,
    /// Address after architecture adjustment; what stops are matched against
    pub address: Address,
    pub section: Option<SectionId>,
    pub module: Option<ModuleId>,
    pub inserted: bool,
    pub duplicate: bool,
    /// Original bytes under a software trap
    pub shadow: Option<Vec<u8>>,
    /// Where the trap actually lives (the load address for some overlays)
    pub placed_at: Option<Address>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
}

impl Location {
    pub fn new(owner: BreakpointNumber, kind: LocationKind, address: Address) -> Self {
        Self {
            owner,
            kind,
            requested_address: address,
            address,
            section: None,
            module: None,
            inserted: false,
            duplicate: false,
            shadow: None,
            placed_at: None,
            file: None,
            line: None,
            function: None,
        }
    }

    pub fn placement(&self) -> Placement {
        Placement {
            address: self.address,
            section: self.section,
        }
    }

    /// Human readable "in foo at main.c:12" style description
    pub fn describe(&self) -> String {
        let mut out = format!("{:#x}", self.address);
        if let Some(function) = &self.function {
            out.push_str(&format!(" in {}", function));
        }
        if let (Some(file), Some(line)) = (&self.file, self.line) {
            out.push_str(&format!(" at {}:{}", file, line));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_meaningful_kinds() {
        assert!(LocationKind::Software.is_address_meaningful());
        assert!(LocationKind::Hardware.is_address_meaningful());
        assert!(!LocationKind::Catch { hook: None }.is_address_meaningful());
        assert!(!LocationKind::HardwareWatch {
            range: MemoryRange::new(0x10, 4),
            access: WatchAccess::Write,
        }
        .is_address_meaningful());
    }

    #[test]
    fn test_describe() {
        let mut loc = Location::new(BreakpointNumber(1), LocationKind::Software, 0x401000);
        assert_eq!(loc.describe(), "0x401000");
        loc.function = Some("main".into());
        loc.file = Some("main.c".into());
        loc.line = Some(12);
        assert_eq!(loc.describe(), "0x401000 in main at main.c:12");
    }
}
