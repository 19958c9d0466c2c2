//! Engine and per-call options.
//!
//! [`EngineOptions`] is fixed for the lifetime of a
//! [`DetectEngine`](crate::DetectEngine) and validated once, at construction.
//! [`DetectOptions`] varies per [`detect`](crate::DetectEngine::detect) call
//! and is checked lazily; problems are reported through the returned handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::Value;
use td_core::config::DEFAULT_REGISTRY_POLL_INTERVAL_MS;
use td_core::{ConfigError, EngineSettings, EnvToggles, WatchConfig};
use td_watcher::WatcherTree;

use crate::check::DirCheck;
use crate::paths::{EnvLookup, SearchPath};
use crate::reactive::ReactiveValue;
use crate::registry::{self, RegistryBackend, RegistryKeys};

/// Default window for collapsing filesystem events into one rescan.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// What a results hook knows about the call it is post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    /// The scan id the results belong to.
    pub id: String,
    /// The engine's current preferred install location.
    pub default_path: Option<Utf8PathBuf>,
    /// Whether the engine collects every match.
    pub multiple: bool,
}

/// Post-processes raw scan results before they are merged.
///
/// Receives the normalized results and the existing container for the scan
/// id, if any. Returning `Ok(None)` keeps the results as they are.
pub type ProcessResults = Arc<
    dyn Fn(Value, Option<&ReactiveValue>, &HookContext) -> anyhow::Result<Option<Value>>
        + Send
        + Sync,
>;

/// Configuration for a [`DetectEngine`](crate::DetectEngine).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use serde_json::json;
/// use td_detect::{EngineOptions, SyncCheck};
///
/// let options = EngineOptions::new(SyncCheck::new(|dir: &camino::Utf8Path| {
///     Ok(dir.join("bin/adb").exists().then(|| json!({ "path": dir.as_str() })))
/// }))
/// .with_depth(1)
/// .with_env(["ANDROID_HOME", "ANDROID_SDK_ROOT"])
/// .with_exe("adb")
/// .with_path("/opt/android-sdk")
/// .with_debounce(Duration::from_millis(100));
///
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct EngineOptions {
    pub(crate) check: Arc<dyn DirCheck>,
    pub(crate) depth: u32,
    pub(crate) env: Vec<String>,
    pub(crate) exe: Option<String>,
    pub(crate) multiple: bool,
    pub(crate) paths: Vec<SearchPath>,
    pub(crate) process_results: Option<ProcessResults>,
    pub(crate) registry_keys: RegistryKeys,
    pub(crate) registry_poll_interval: Duration,
    pub(crate) debounce: Duration,
    pub(crate) registry: Arc<dyn RegistryBackend>,
    pub(crate) env_lookup: EnvLookup,
    pub(crate) toggles: Option<EnvToggles>,
    pub(crate) watcher: Option<WatcherTree>,
}

impl EngineOptions {
    /// Creates options with defaults and the given directory predicate.
    pub fn new(check: impl DirCheck + 'static) -> Self {
        Self {
            check: Arc::new(check),
            depth: 0,
            env: Vec::new(),
            exe: None,
            multiple: false,
            paths: Vec::new(),
            process_results: None,
            registry_keys: RegistryKeys::default(),
            registry_poll_interval: Duration::from_millis(DEFAULT_REGISTRY_POLL_INTERVAL_MS),
            debounce: DEFAULT_DEBOUNCE,
            registry: registry::default_backend(),
            env_lookup: Arc::new(|name| std::env::var(name).ok()),
            toggles: None,
            watcher: None,
        }
    }

    /// Creates options from deserialized settings.
    pub fn from_settings(settings: &EngineSettings, check: impl DirCheck + 'static) -> Self {
        Self::new(check)
            .with_depth(settings.depth)
            .with_env(settings.env.iter().cloned())
            .with_multiple(settings.multiple)
            .with_paths(settings.paths.iter().cloned())
            .with_registry_keys(settings.registry_keys.clone())
            .with_registry_poll_interval(Duration::from_millis(settings.registry_poll_interval_ms))
            .with_exe_opt(settings.exe.clone())
    }

    /// Sets how many directory levels below each search path are searched.
    #[must_use]
    pub const fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Adds environment variables that hold search paths.
    #[must_use]
    pub fn with_env<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(vars.into_iter().map(Into::into));
        self
    }

    /// Sets an executable whose directory on `PATH` is a search path.
    #[must_use]
    pub fn with_exe(mut self, exe: impl Into<String>) -> Self {
        self.exe = Some(exe.into());
        self
    }

    fn with_exe_opt(mut self, exe: Option<String>) -> Self {
        self.exe = exe;
        self
    }

    /// Collects every match instead of stopping at the first.
    #[must_use]
    pub const fn with_multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }

    /// Adds a search path used by every call.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<SearchPath>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Adds search paths used by every call.
    #[must_use]
    pub fn with_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<SearchPath>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Sets the hook run on raw results before they are merged.
    #[must_use]
    pub fn with_process_results<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value, Option<&ReactiveValue>, &HookContext) -> anyhow::Result<Option<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.process_results = Some(Arc::new(hook));
        self
    }

    /// Sets the registry values that hold search paths.
    #[must_use]
    pub fn with_registry_keys(mut self, keys: impl Into<RegistryKeys>) -> Self {
        self.registry_keys = keys.into();
        self
    }

    /// Sets how often watch mode re-reads the registry.
    #[must_use]
    pub const fn with_registry_poll_interval(mut self, interval: Duration) -> Self {
        self.registry_poll_interval = interval;
        self
    }

    /// Sets the window for collapsing filesystem events.
    #[must_use]
    pub const fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Applies the watch section of a configuration file.
    #[must_use]
    pub const fn with_watch_config(self, config: &WatchConfig) -> Self {
        self.with_debounce(Duration::from_millis(config.debounce_ms))
    }

    /// Replaces the registry backend.
    #[must_use]
    pub fn with_registry_backend(mut self, backend: Arc<dyn RegistryBackend>) -> Self {
        self.registry = backend;
        self
    }

    /// Replaces how environment variables are read.
    #[must_use]
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env_lookup = Arc::new(lookup);
        self
    }

    /// Fixes the skip toggles instead of reading them on every call.
    #[must_use]
    pub const fn with_toggles(mut self, toggles: EnvToggles) -> Self {
        self.toggles = Some(toggles);
        self
    }

    /// Shares an existing watcher tree instead of creating one.
    #[must_use]
    pub fn with_watcher(mut self, watcher: WatcherTree) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Returns `true` if every match is collected.
    #[must_use]
    pub const fn multiple(&self) -> bool {
        self.multiple
    }

    /// Checks option values that the type system cannot rule out.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] naming the first bad option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exe.as_deref().is_some_and(|exe| exe.trim().is_empty()) {
            return Err(ConfigError::invalid_option("exe", "must be a non-empty string"));
        }
        if self.env.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::invalid_option(
                "env",
                "variable names must be non-empty strings",
            ));
        }
        if self
            .paths
            .iter()
            .any(|path| matches!(path, SearchPath::Static(p) if p.as_str().is_empty()))
        {
            return Err(ConfigError::invalid_option(
                "paths",
                "search paths must be non-empty strings",
            ));
        }
        if self.registry_poll_interval.is_zero() {
            return Err(ConfigError::invalid_option(
                "registry_poll_interval",
                "must be greater than zero",
            ));
        }
        if let RegistryKeys::Keys(keys) = &self.registry_keys {
            for key in keys {
                key.validate()?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("depth", &self.depth)
            .field("env", &self.env)
            .field("exe", &self.exe)
            .field("multiple", &self.multiple)
            .field("paths", &self.paths)
            .field("process_results", &self.process_results.is_some())
            .field("registry_keys", &self.registry_keys)
            .field("registry_poll_interval", &self.registry_poll_interval)
            .field("debounce", &self.debounce)
            .field("toggles", &self.toggles)
            .finish_non_exhaustive()
    }
}

/// Options for one [`detect`](crate::DetectEngine::detect) call.
#[derive(Debug, Clone, Default)]
pub struct DetectOptions {
    /// Re-run the predicate even where a cached outcome exists.
    pub force: bool,
    /// Deliver the live container instead of a snapshot.
    pub live: bool,
    /// Search paths for this call only, after the engine's own.
    pub paths: Vec<SearchPath>,
    /// In watch mode, also watch every matched directory recursively.
    pub redetect: bool,
    /// Keep watching the search paths and report changes.
    pub watch: bool,
}

impl DetectOptions {
    /// Options for a watching call.
    #[must_use]
    pub fn watching() -> Self {
        Self {
            watch: true,
            ..Self::default()
        }
    }
}
