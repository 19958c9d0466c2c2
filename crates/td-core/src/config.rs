//! Configuration structures for tooldetect.
//!
//! This module provides configuration types for the detection engine and its
//! watchers:
//!
//! - [`EngineSettings`] - Search locations, depth, arity, registry keys
//! - [`WatchConfig`] - Debounce window and redetect behaviour
//! - [`Config`] - Root configuration combining all settings
//! - [`EnvToggles`] - Process-environment switches that skip global paths
//!
//! All serializable types implement [`Default`] and deserialize with missing
//! fields filled in from those defaults.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default registry poll interval in milliseconds.
pub const DEFAULT_REGISTRY_POLL_INTERVAL_MS: u64 = 30_000;

/// Environment variable that skips the engine's static search paths.
pub const SKIP_GLOBAL_SEARCH_PATHS_VAR: &str = "TD_SKIP_GLOBAL_SEARCH_PATHS";

/// Environment variable that skips paths derived from the engine's `env` option.
pub const SKIP_GLOBAL_ENVIRONMENT_PATHS_VAR: &str = "TD_SKIP_GLOBAL_ENVIRONMENT_PATHS";

/// Environment variable that skips the executable-derived default path.
pub const SKIP_GLOBAL_EXECUTABLE_PATH_VAR: &str = "TD_SKIP_GLOBAL_EXECUTABLE_PATH";

/// A Windows registry hive.
///
/// Parses both the short (`HKLM`) and long (`HKEY_LOCAL_MACHINE`) spellings.
///
/// # Examples
///
/// ```
/// use td_core::Hive;
///
/// let hive: Hive = "HKEY_CURRENT_USER".parse().unwrap();
/// assert_eq!(hive, Hive::CurrentUser);
/// assert_eq!(hive.to_string(), "HKCU");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Hive {
    /// `HKEY_LOCAL_MACHINE`.
    #[default]
    LocalMachine,
    /// `HKEY_CURRENT_USER`.
    CurrentUser,
    /// `HKEY_CLASSES_ROOT`.
    ClassesRoot,
    /// `HKEY_USERS`.
    Users,
    /// `HKEY_CURRENT_CONFIG`.
    CurrentConfig,
}

impl Hive {
    /// Returns the short form used by `reg.exe` (e.g. `HKLM`).
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::LocalMachine => "HKLM",
            Self::CurrentUser => "HKCU",
            Self::ClassesRoot => "HKCR",
            Self::Users => "HKU",
            Self::CurrentConfig => "HKCC",
        }
    }
}

impl fmt::Display for Hive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Hive {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HKLM" | "HKEY_LOCAL_MACHINE" => Ok(Self::LocalMachine),
            "HKCU" | "HKEY_CURRENT_USER" => Ok(Self::CurrentUser),
            "HKCR" | "HKEY_CLASSES_ROOT" => Ok(Self::ClassesRoot),
            "HKU" | "HKEY_USERS" => Ok(Self::Users),
            "HKCC" | "HKEY_CURRENT_CONFIG" => Ok(Self::CurrentConfig),
            _ => Err(ConfigError::invalid_option(
                "registry_keys.root",
                format!("unknown registry hive '{s}'"),
            )),
        }
    }
}

impl TryFrom<String> for Hive {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Hive> for String {
    fn from(hive: Hive) -> Self {
        hive.short_name().to_owned()
    }
}

/// A registry value that names a search location.
///
/// `root` defaults to `HKLM` when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryKeySpec {
    /// The hive to query.
    #[serde(default)]
    pub root: Hive,
    /// The key path below the hive.
    pub key: String,
    /// The value name holding a directory path.
    pub name: String,
}

impl RegistryKeySpec {
    /// Creates a key reference under `HKLM`.
    #[must_use]
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            root: Hive::LocalMachine,
            key: key.into(),
            name: name.into(),
        }
    }

    /// Sets the hive.
    #[must_use]
    pub const fn with_root(mut self, root: Hive) -> Self {
        self.root = root;
        self
    }

    /// Checks that both the key and the value name are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for an empty key or name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.trim().is_empty() {
            return Err(ConfigError::invalid_option(
                "registry_keys.key",
                "must be a non-empty string",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid_option(
                "registry_keys.name",
                "must be a non-empty string",
            ));
        }
        Ok(())
    }
}

/// Serializable settings for a detection engine.
///
/// The predicate and post-processing hook are code, not data, so they are
/// supplied separately when the engine is built.
///
/// # Examples
///
/// ```
/// use td_core::EngineSettings;
///
/// let settings = EngineSettings::default();
/// assert_eq!(settings.depth, 0);
/// assert!(!settings.multiple);
/// assert_eq!(settings.registry_poll_interval_ms, 30_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How many directory levels below each search path to check.
    pub depth: u32,

    /// Environment variables holding search paths.
    pub env: Vec<String>,

    /// Executable whose location on `PATH` yields a default search path.
    pub exe: Option<String>,

    /// Collect every match instead of stopping at the first one.
    pub multiple: bool,

    /// Search paths merged into every detection.
    pub paths: Vec<Utf8PathBuf>,

    /// Registry values naming search paths (Windows only).
    pub registry_keys: Vec<RegistryKeySpec>,

    /// How often to re-query the registry while watching, in milliseconds.
    pub registry_poll_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            depth: 0,
            env: Vec::new(),
            exe: None,
            multiple: false,
            paths: Vec::new(),
            registry_keys: Vec::new(),
            registry_poll_interval_ms: DEFAULT_REGISTRY_POLL_INTERVAL_MS,
        }
    }
}

impl EngineSettings {
    /// Checks option values that the type system cannot rule out.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] naming the first bad option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(exe) = &self.exe {
            if exe.trim().is_empty() {
                return Err(ConfigError::invalid_option("exe", "must be a non-empty string"));
            }
        }
        if self.env.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::invalid_option(
                "env",
                "variable names must be non-empty strings",
            ));
        }
        if let Some(path) = self.paths.iter().find(|p| p.as_str().is_empty()) {
            return Err(ConfigError::invalid_path(path.clone(), "path is empty"));
        }
        if self.registry_poll_interval_ms == 0 {
            return Err(ConfigError::invalid_option(
                "registry_poll_interval_ms",
                "must be greater than zero",
            ));
        }
        for key in &self.registry_keys {
            key.validate()?;
        }
        Ok(())
    }
}

/// Configuration for live watching.
///
/// # Examples
///
/// ```
/// use td_core::WatchConfig;
///
/// let config = WatchConfig::default();
/// assert_eq!(config.debounce_ms, 250);
/// assert!(!config.redetect);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window in milliseconds.
    ///
    /// Filesystem events for one search path within this window collapse
    /// into a single rescan.
    pub debounce_ms: u64,

    /// Recursively watch directories where a match was found.
    pub redetect: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            redetect: false,
        }
    }
}

/// Root configuration for tooldetect.
///
/// # Examples
///
/// ```
/// use td_core::Config;
///
/// let config = Config::from_json_str(r#"{"engine": {"depth": 2}}"#).unwrap();
/// assert_eq!(config.engine.depth, 2);
/// assert_eq!(config.watch.debounce_ms, 250);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine settings.
    pub engine: EngineSettings,

    /// Watch settings.
    pub watch: WatchConfig,
}

impl Config {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON configuration file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path, "Loaded configuration file");
        Self::from_json_str(&contents)
    }
}

/// Process-environment switches that drop global sources from path lookup.
///
/// Each toggle is read fresh per lookup so tests and embedders can isolate a
/// detection from machine-wide locations.
///
/// # Examples
///
/// ```
/// use td_core::EnvToggles;
///
/// let toggles = EnvToggles::from_lookup(|name| {
///     (name == "TD_SKIP_GLOBAL_EXECUTABLE_PATH").then(|| "1".to_owned())
/// });
/// assert!(toggles.skip_executable_path);
/// assert!(!toggles.skip_search_paths);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EnvToggles {
    /// Skip the engine's static `paths`.
    pub skip_search_paths: bool,
    /// Skip paths read from the engine's `env` variables.
    pub skip_environment_paths: bool,
    /// Skip the executable-derived default path.
    pub skip_executable_path: bool,
}

impl EnvToggles {
    /// Reads the toggles from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the toggles through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            skip_search_paths: is_enabled(lookup(SKIP_GLOBAL_SEARCH_PATHS_VAR)),
            skip_environment_paths: is_enabled(lookup(SKIP_GLOBAL_ENVIRONMENT_PATHS_VAR)),
            skip_executable_path: is_enabled(lookup(SKIP_GLOBAL_EXECUTABLE_PATH_VAR)),
        }
    }

    /// Toggles that skip every global source.
    #[must_use]
    pub const fn skip_all() -> Self {
        Self {
            skip_search_paths: true,
            skip_environment_paths: true,
            skip_executable_path: true,
        }
    }
}

fn is_enabled(value: Option<String>) -> bool {
    value.is_some_and(|v| {
        let v = v.trim();
        !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_settings_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.depth, 0);
        assert!(settings.env.is_empty());
        assert!(settings.exe.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_watch_config_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.debounce_ms, 250);
        assert!(!config.redetect);
    }

    #[test]
    fn test_empty_exe_rejected() {
        let settings = EngineSettings {
            exe: Some("  ".to_owned()),
            ..EngineSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert_eq!(err.option(), Some("exe"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let settings = EngineSettings {
            registry_poll_interval_ms: 0,
            ..EngineSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_registry_key_requires_name() {
        let settings = EngineSettings {
            registry_keys: vec![RegistryKeySpec::new("SOFTWARE\\Vendor", "")],
            ..EngineSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert_eq!(err.option(), Some("registry_keys.name"));
    }

    #[test]
    fn test_config_deserialize_with_missing_fields() {
        let json = r#"{"engine": {"exe": "adb", "registry_keys": [{"key": "SOFTWARE\\Android", "name": "Path"}]}}"#;
        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.engine.exe.as_deref(), Some("adb"));
        assert_eq!(config.engine.registry_keys[0].root, Hive::LocalMachine);
        assert_eq!(config.watch.debounce_ms, 250);
    }

    #[test]
    fn test_config_negative_depth_rejected() {
        let result = Config::from_json_str(r#"{"engine": {"depth": -1}}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_unknown_hive_rejected() {
        let json = r#"{"engine": {"registry_keys": [{"root": "HKXX", "key": "a", "name": "b"}]}}"#;
        assert!(Config::from_json_str(json).is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_hive_serialization() {
        assert_eq!(
            serde_json::to_string(&Hive::CurrentUser).unwrap(),
            r#""HKCU""#
        );
        let hive: Hive = serde_json::from_str(r#""hkey_users""#).unwrap();
        assert_eq!(hive, Hive::Users);
    }

    #[test]
    fn test_env_toggles_values() {
        let toggles = EnvToggles::from_lookup(|name| match name {
            SKIP_GLOBAL_SEARCH_PATHS_VAR => Some("true".to_owned()),
            SKIP_GLOBAL_ENVIRONMENT_PATHS_VAR => Some("0".to_owned()),
            SKIP_GLOBAL_EXECUTABLE_PATH_VAR => Some("false".to_owned()),
            _ => None,
        });
        assert!(toggles.skip_search_paths);
        assert!(!toggles.skip_environment_paths);
        assert!(!toggles.skip_executable_path);
        assert_eq!(EnvToggles::from_lookup(|_| None), EnvToggles::default());
    }
}
