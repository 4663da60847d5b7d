//! Catchpoints
//!
//! Catchpoints stop on OS/runtime events instead of code addresses. They
//! share the location machinery: each catchpoint owns one location whose
//! insert/remove arms the target's native notification hook, and its
//! `matches_stop` looks at the native event of the stop.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Breakpoint, BreakpointKind, BreakpointNumber, Disposition, Location, LocationKind};
use crate::common::{Error, Result};
use crate::engine::Engine;
use crate::target::{CatchHook, Inferior, ModuleId, NativeEvent, TargetControl};

/// Module name filter, compiled once when the catchpoint is parsed
#[derive(Debug, Clone)]
pub struct ModuleFilter(Regex);

impl ModuleFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| Error::InvalidArgument(format!("invalid module filter: {}", e)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.0.is_match(name)
    }
}

impl PartialEq for ModuleFilter {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ModuleFilter {}

impl fmt::Display for ModuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ModuleFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ModuleFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Self::new(&pattern).map_err(serde::de::Error::custom)
    }
}

/// Event a catchpoint stops on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CatchKind {
    Fork,
    VFork,
    Exec,
    /// Module load, optionally filtered by a regex over the module name
    Load { filter: Option<ModuleFilter> },
    /// Module unload, optionally filtered by a regex over the module name
    Unload { filter: Option<ModuleFilter> },
    /// Exception thrown, optionally filtered by dynamic type name
    Throw { type_name: Option<String> },
    /// Exception caught, optionally filtered by dynamic type name
    Catch { type_name: Option<String> },
}

impl CatchKind {
    /// Parse the argument of a `catch` statement: `fork`, `load libfoo`, `throw MyError`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (event, arg) = match s.split_once(char::is_whitespace) {
            Some((event, arg)) => (event, Some(arg.trim().to_string()).filter(|a| !a.is_empty())),
            None => (s, None),
        };
        let has_arg = arg.is_some();
        let kind = match event {
            "fork" => Self::Fork,
            "vfork" => Self::VFork,
            "exec" => Self::Exec,
            "load" => Self::Load {
                filter: arg.as_deref().map(ModuleFilter::new).transpose()?,
            },
            "unload" => Self::Unload {
                filter: arg.as_deref().map(ModuleFilter::new).transpose()?,
            },
            "throw" => Self::Throw { type_name: arg },
            "catch" => Self::Catch { type_name: arg },
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown catchpoint event: {}",
                    other
                )))
            }
        };
        if matches!(kind, Self::Fork | Self::VFork | Self::Exec) && has_arg {
            return Err(Error::InvalidArgument(format!(
                "catch {} takes no argument",
                event
            )));
        }
        Ok(kind)
    }

    /// Native hook the target has to arm, if any
    ///
    /// Module load/unload events are always reported by the dynamic loader
    /// hook, so they need nothing extra.
    pub fn hook(&self) -> Option<CatchHook> {
        match self {
            Self::Fork => Some(CatchHook::Fork),
            Self::VFork => Some(CatchHook::VFork),
            Self::Exec => Some(CatchHook::Exec),
            Self::Throw { .. } => Some(CatchHook::ExceptionThrow),
            Self::Catch { .. } => Some(CatchHook::ExceptionCatch),
            Self::Load { .. } | Self::Unload { .. } => None,
        }
    }

    /// Cheap event match used during candidate selection
    pub fn matches_event(&self, event: &NativeEvent, target: &dyn TargetControl) -> bool {
        match (self, event) {
            (Self::Fork, NativeEvent::Forked { .. })
            | (Self::VFork, NativeEvent::VForked { .. })
            | (Self::Exec, NativeEvent::Execd { .. })
            | (Self::Throw { .. }, NativeEvent::ExceptionThrown)
            | (Self::Catch { .. }, NativeEvent::ExceptionCaught) => true,
            (Self::Load { filter }, NativeEvent::ModuleLoaded { module })
            | (Self::Unload { filter }, NativeEvent::ModuleUnloaded { module }) => {
                module_matches(filter.as_ref(), *module, target)
            }
            _ => false,
        }
    }

    /// Exception type filter
    pub fn type_filter(&self) -> Option<&str> {
        match self {
            Self::Throw { type_name } | Self::Catch { type_name } => type_name.as_deref(),
            _ => None,
        }
    }

    /// Check the exception type filter
    ///
    /// Only called once a throw/catch event has already matched, so the
    /// runtime type lookup is never paid on ordinary stops.
    pub fn exception_type_matches(&self, target: &mut dyn TargetControl) -> bool {
        match self.type_filter() {
            None => true,
            Some(wanted) => target
                .current_exception_type()
                .is_some_and(|actual| actual == wanted),
        }
    }

    /// Statement argument, inverse of `parse`
    pub fn describe(&self) -> String {
        let (event, arg) = match self {
            Self::Fork => ("fork", None),
            Self::VFork => ("vfork", None),
            Self::Exec => ("exec", None),
            Self::Load { filter } => ("load", filter.as_ref().map(ModuleFilter::as_str)),
            Self::Unload { filter } => ("unload", filter.as_ref().map(ModuleFilter::as_str)),
            Self::Throw { type_name } => ("throw", type_name.as_deref()),
            Self::Catch { type_name } => ("catch", type_name.as_deref()),
        };
        match arg {
            Some(arg) => format!("catch {} {}", event, arg),
            None => format!("catch {}", event),
        }
    }

    /// Stop report text for a matched event
    pub fn event_message(&self, number: BreakpointNumber, event: &NativeEvent) -> String {
        let detail = match event {
            NativeEvent::Forked { child } => format!("forked process {}", child),
            NativeEvent::VForked { child } => format!("vforked process {}", child),
            NativeEvent::Execd { path } => format!("exec'd {}", path),
            NativeEvent::ModuleLoaded { module } => format!("loaded module {}", module.0),
            NativeEvent::ModuleUnloaded { module } => format!("unloaded module {}", module.0),
            NativeEvent::ExceptionThrown => "exception thrown".to_string(),
            NativeEvent::ExceptionCaught => "exception caught".to_string(),
        };
        format!("Catchpoint {} ({})", number, detail)
    }
}

fn module_matches(
    filter: Option<&ModuleFilter>,
    module: ModuleId,
    target: &dyn TargetControl,
) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    target
        .module_info(module)
        .is_some_and(|info| filter.is_match(&info.name))
}

impl<I: Inferior> Engine<I> {
    /// Create a catchpoint
    pub fn create_catchpoint(&mut self, kind: CatchKind, temporary: bool) -> Result<BreakpointNumber> {
        let number = self.store.allocate_number(false);
        let hook = kind.hook();
        let mut bp = Breakpoint::new(number, BreakpointKind::Catchpoint { kind });
        if temporary {
            bp.disposition = Disposition::Delete;
        }
        self.store.insert_breakpoint(bp);
        self.store
            .add_location(Location::new(number, LocationKind::Catch { hook }, 0))
            .ok_or_else(|| Error::Internal(format!("catchpoint {} vanished", number)))?;
        tracing::debug!(number = %number, "Created catchpoint");
        Ok(number)
    }
}
