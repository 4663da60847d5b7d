//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    /// Breakpoint creation settings
    #[serde(default)]
    pub breakpoints: BreakpointSettings,

    /// Watchpoint settings
    #[serde(default)]
    pub watchpoints: WatchpointSettings,

    /// Overlay debugging settings
    #[serde(default)]
    pub overlays: OverlaySettings,

    /// Module event settings
    #[serde(default)]
    pub modules: ModuleSettings,
}

/// What to do when a location spec resolves to nothing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PendingPolicy {
    /// Create a pending breakpoint and warn
    #[default]
    Auto,
    /// Fail with `LocationNotFound`
    Off,
}

/// Breakpoint creation settings
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct BreakpointSettings {
    /// Pending breakpoint policy
    #[serde(default)]
    pub pending: PendingPolicy,
}

/// Watchpoint settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchpointSettings {
    /// Allow hardware watchpoints; when false every watchpoint is software
    #[serde(default = "default_true")]
    pub can_use_hardware: bool,
}

impl Default for WatchpointSettings {
    fn default() -> Self {
        Self {
            can_use_hardware: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Overlay debugging settings
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct OverlaySettings {
    /// Honour overlay sections when placing software traps
    #[serde(default)]
    pub enabled: bool,
}

/// Module event settings
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ModuleSettings {
    /// Stop (instead of silently re-resolving) when a module-event hook fires
    #[serde(default)]
    pub stop_on_event: bool,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Render as TOML, the same shape `parse` reads
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| super::Error::Internal(e.to_string()))
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.breakpoints.pending, PendingPolicy::Auto);
        assert!(config.watchpoints.can_use_hardware);
        assert!(!config.overlays.enabled);
        assert!(!config.modules.stop_on_event);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
            [breakpoints]
            pending = "off"

            [watchpoints]
            can_use_hardware = false
            "#,
        )
        .unwrap();
        assert_eq!(config.breakpoints.pending, PendingPolicy::Off);
        assert!(!config.watchpoints.can_use_hardware);
        assert!(!config.overlays.enabled);
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        let err = Config::parse("[breakpoints]\npending = \"sometimes\"\n").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.breakpoints.pending = PendingPolicy::Off;
        config.modules.stop_on_event = true;
        let text = config.to_toml().unwrap();
        assert!(text.contains("pending = \"off\""));

        let parsed = Config::parse(&text).unwrap();
        assert_eq!(parsed.breakpoints.pending, PendingPolicy::Off);
        assert!(parsed.modules.stop_on_event);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[overlays]\nenabled = true").unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert!(config.overlays.enabled);
    }
}
