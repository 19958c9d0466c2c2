//! The detection engine.
//!
//! A [`DetectEngine`] owns everything one detector needs: the predicate and
//! options, a result cache and container map keyed by scan id, a keyed mutex
//! serializing scans, and a watcher tree. Cloning is cheap; clones share all
//! of it.

use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use parking_lot::Mutex;
use serde_json::Value;
use td_core::{EnvToggles, FxHashMap, KeyedMutex, NamespaceCache, scan_identity};
use td_watcher::{WatchError, WatcherTree};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::error::DetectError;
use crate::handle::{Detected, Handle};
use crate::options::{DetectOptions, EngineOptions, HookContext};
use crate::paths::{self, EnvPaths, SearchPath};
use crate::reactive::{self, ReactiveValue};
use crate::registry::{self, RegistryLookup};
use crate::session;
use crate::walk::{self, Walk};

const INITIALIZE_KEY: &str = "initialize";

/// A request to [`DetectEngine::scan`].
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Cache and container namespace.
    pub id: String,
    /// Search paths, visited in order.
    pub paths: Vec<Utf8PathBuf>,
    /// Ignore cached outcomes.
    pub force: bool,
    /// When forcing, only these paths are forced; the rest still come from
    /// the cache. Empty means every path.
    pub only_paths: Vec<Utf8PathBuf>,
    /// Stops the walk between directory visits.
    pub cancel: CancellationToken,
}

impl ScanRequest {
    /// Creates an unforced request over `paths`.
    pub fn new(id: impl Into<String>, paths: Vec<Utf8PathBuf>) -> Self {
        Self {
            id: id.into(),
            paths,
            force: false,
            only_paths: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets whether cached outcomes are ignored.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Restricts forcing to `paths`.
    #[must_use]
    pub fn with_only_paths(mut self, paths: Vec<Utf8PathBuf>) -> Self {
        self.only_paths = paths;
        self
    }

    /// Uses `cancel` to stop the scan early.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn forces(&self, path: &Utf8PathBuf) -> bool {
        self.force && (self.only_paths.is_empty() || self.only_paths.contains(path))
    }
}

/// What a scan found.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    /// The first match or `null` in single mode; every match in order in
    /// multiple mode.
    pub results: Value,
    /// Directories whose predicate matched.
    pub found: Vec<Utf8PathBuf>,
}

/// The resolved search paths for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    /// Canonical, deduplicated search paths in precedence order.
    pub paths: Vec<Utf8PathBuf>,
    /// Preferred install location: registry, then environment, then
    /// executable.
    pub default_path: Option<Utf8PathBuf>,
}

/// Paths gathered once by [`DetectEngine::initialize`].
#[derive(Debug, Default)]
struct Sources {
    paths: Vec<Utf8PathBuf>,
    env: EnvPaths,
    exe: Option<Utf8PathBuf>,
}

/// Finds tool installations and keeps the results current.
///
/// # Examples
///
/// ```no_run
/// use serde_json::json;
/// use td_detect::{DetectEngine, DetectEvent, DetectOptions, EngineOptions, SyncCheck};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), td_detect::DetectError> {
/// let engine = DetectEngine::new(
///     EngineOptions::new(SyncCheck::new(|dir: &camino::Utf8Path| {
///         Ok(dir.join("bin/adb").exists().then(|| json!({ "sdk": dir.as_str() })))
///     }))
///     .with_depth(1)
///     .with_env(["ANDROID_HOME"])
///     .with_path("/opt/android-sdk"),
/// )?;
///
/// let mut handle = engine.detect(DetectOptions::watching());
/// while let Some(event) = handle.recv().await {
///     match event {
///         DetectEvent::Results(results) => println!("{}", results.value()),
///         DetectEvent::Ready => println!("watching"),
///         DetectEvent::Error(err) => eprintln!("{err}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DetectEngine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) options: EngineOptions,
    mutex: KeyedMutex,
    cache: ResultCache,
    containers: Mutex<FxHashMap<String, ReactiveValue>>,
    sources: Mutex<Option<Arc<Sources>>>,
    default_path: Mutex<Option<Utf8PathBuf>>,
    exe_cache: NamespaceCache<Option<Utf8PathBuf>>,
    watcher: WatcherTree,
}

impl DetectEngine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Config`] if the options are malformed. No I/O
    /// happens before the first call.
    pub fn new(options: EngineOptions) -> Result<Self, DetectError> {
        options.validate()?;
        let watcher = options.watcher.clone().unwrap_or_default();
        Ok(Self {
            inner: Arc::new(EngineInner {
                options,
                mutex: KeyedMutex::new(),
                cache: ResultCache::new(),
                containers: Mutex::new(FxHashMap::default()),
                sources: Mutex::new(None),
                default_path: Mutex::new(None),
                exe_cache: NamespaceCache::new(),
                watcher,
            }),
        })
    }

    /// Returns the engine's options.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// Returns the result cache.
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    /// Returns the watcher tree used in watch mode.
    #[must_use]
    pub fn watcher(&self) -> &WatcherTree {
        &self.inner.watcher
    }

    /// Returns the container for scan `id`, if results were processed for it.
    #[must_use]
    pub fn container(&self, id: &str) -> Option<ReactiveValue> {
        self.inner.containers.lock().get(id).cloned()
    }

    /// Returns the preferred install location found by the last
    /// [`DetectEngine::get_paths`].
    #[must_use]
    pub fn default_path(&self) -> Option<Utf8PathBuf> {
        self.inner.default_path.lock().clone()
    }

    /// Resolves the engine's static, environment and executable paths.
    ///
    /// Runs once; later and concurrent calls wait for the first to finish
    /// and then return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::InvalidOption`] if a dynamic search path fails.
    /// A failed initialization is retried by the next call.
    pub async fn initialize(&self) -> Result<(), DetectError> {
        let inner = &self.inner;
        inner
            .mutex
            .run(INITIALIZE_KEY, || async {
                if inner.sources.lock().is_some() {
                    return Ok(());
                }
                let options = &inner.options;

                let static_paths = paths::expand_all(&options.paths).await?;
                let static_paths = paths::resolve_all(static_paths).await;
                let env = paths::env_paths(&options.env, &*options.env_lookup);
                let exe = match &options.exe {
                    Some(exe) => paths::exe_dir(exe, &options.env_lookup, &inner.exe_cache).await,
                    None => None,
                };

                debug!(
                    paths = static_paths.len(),
                    env = env.paths.len(),
                    exe = ?exe,
                    "Engine initialized"
                );
                *inner.sources.lock() = Some(Arc::new(Sources {
                    paths: static_paths,
                    env,
                    exe,
                }));
                Ok::<_, DetectError>(())
            })
            .await?
    }

    fn sources(&self) -> Arc<Sources> {
        self.inner.sources.lock().clone().unwrap_or_default()
    }

    fn toggles(&self) -> EnvToggles {
        let options = &self.inner.options;
        options
            .toggles
            .unwrap_or_else(|| EnvToggles::from_lookup(|name| (options.env_lookup)(name)))
    }

    /// Reads the configured registry values.
    ///
    /// Returns nothing when no keys are configured or the backend is not
    /// supported on this platform.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Registry`] if a dynamic registry function fails.
    pub async fn query_registry(&self) -> Result<RegistryLookup, DetectError> {
        let options = &self.inner.options;
        if options.registry_keys.is_empty() || !options.registry.is_supported() {
            return Ok(RegistryLookup::default());
        }
        registry::query_keys(&options.registry, &options.registry_keys).await
    }

    /// Returns every search path for a call with `extra` paths.
    ///
    /// Order: engine paths, registry, environment, executable, then `extra`.
    /// The first three engine sources can each be skipped through
    /// [`EnvToggles`].
    ///
    /// # Errors
    ///
    /// Fails if initialization, the registry or an `extra` source fails.
    pub async fn get_paths(&self, extra: &[SearchPath]) -> Result<PathSet, DetectError> {
        self.initialize().await?;
        let sources = self.sources();
        let toggles = self.toggles();
        let registry = self.query_registry().await?;

        let mut paths = Vec::new();
        if !toggles.skip_search_paths {
            paths.extend(sources.paths.iter().cloned());
        }
        paths.extend(registry.paths);
        if !toggles.skip_environment_paths {
            paths.extend(sources.env.paths.iter().cloned());
        }
        if !toggles.skip_executable_path {
            paths.extend(sources.exe.iter().cloned());
        }
        paths.extend(paths::expand_all(extra).await?);
        let paths = paths::resolve_all(paths).await;

        let env_default = sources
            .env
            .default_path
            .clone()
            .filter(|_| !toggles.skip_environment_paths);
        let exe_default = sources.exe.clone().filter(|_| !toggles.skip_executable_path);
        let default_path = match registry.default_path.or(env_default).or(exe_default) {
            Some(path) => Some(paths::resolve_dir(&path).await),
            None => None,
        };
        self.inner.default_path.lock().clone_from(&default_path);

        Ok(PathSet {
            paths,
            default_path,
        })
    }

    /// Searches `request.paths` for matches.
    ///
    /// Scans of one id run one at a time. A forced scan runs under its own
    /// key, so it neither waits for nor holds up unforced scans of that id.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Predicate`] if the predicate fails,
    /// [`DetectError::Io`] if a directory cannot be read, and
    /// [`DetectError::Cancelled`] if `request.cancel` fires first.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanOutcome, DetectError> {
        if request.id.trim().is_empty() {
            return Err(DetectError::invalid_option("id", "must be a non-empty string"));
        }
        let key = if request.force {
            format!("{}:{}", request.id, Uuid::new_v4())
        } else {
            request.id.clone()
        };
        self.inner
            .mutex
            .run(&key, || self.scan_locked(&request))
            .await?
    }

    async fn scan_locked(&self, request: &ScanRequest) -> Result<ScanOutcome, DetectError> {
        let options = &self.inner.options;
        let multiple = options.multiple;
        let mut values = Vec::new();
        let mut found = Vec::new();

        for path in &request.paths {
            if !multiple && !values.is_empty() {
                break;
            }
            let walk = Walk {
                check: &*options.check,
                cache: &self.inner.cache,
                id: &request.id,
                depth: options.depth,
                multiple,
                force: request.forces(path),
                cancel: &request.cancel,
            };
            let entry = walk.run(path).await?;
            found.extend(entry.matched);
            if let Some(value) = entry.value {
                walk::push_value(&mut values, value, multiple);
            }
        }

        debug!(
            id = %request.id,
            paths = request.paths.len(),
            found = found.len(),
            force = request.force,
            "Scan finished"
        );
        let results = if multiple {
            Value::Array(values)
        } else {
            values.into_iter().next().unwrap_or(Value::Null)
        };
        Ok(ScanOutcome { results, found })
    }

    /// Merges raw `results` into the container for `id`, creating it on
    /// first use.
    ///
    /// The results hook, if set, runs first with notifications on the
    /// existing container held back, so subscribers see at most one change
    /// for the whole call.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Predicate`] if the hook fails. The container is
    /// left as it was.
    pub fn process_results(&self, results: Value, id: &str) -> Result<ReactiveValue, DetectError> {
        let options = &self.inner.options;
        let multiple = options.multiple;
        let results = normalize(results, multiple);
        let existing = self.container(id);

        if let Some(container) = &existing {
            container.pause();
        }
        let processed = match &options.process_results {
            Some(hook) => {
                let cx = HookContext {
                    id: id.to_owned(),
                    default_path: self.default_path(),
                    multiple,
                };
                hook(results.clone(), existing.as_ref(), &cx)
                    .map(|replaced| replaced.map_or(results, |value| normalize(value, multiple)))
            }
            None => Ok(results),
        };

        let value = match processed {
            Ok(value) => value,
            Err(err) => {
                if let Some(container) = &existing {
                    container.resume();
                }
                return Err(DetectError::predicate("processResults", err));
            }
        };

        if let Some(container) = existing {
            container.merge(value);
            container.resume();
            return Ok(container);
        }

        let mut containers = self.inner.containers.lock();
        if let Some(container) = containers.get(id).cloned() {
            drop(containers);
            container.merge(value);
            return Ok(container);
        }
        let container = ReactiveValue::from_value(value, multiple);
        containers.insert(id.to_owned(), container.clone());
        Ok(container)
    }

    /// Drops the container and cached outcomes for `id`.
    pub fn forget(&self, id: &str) {
        self.inner.containers.lock().remove(id);
        let cleared = self.inner.cache.clear(id);
        debug!(id, cleared, "Forgot scan id");
    }

    /// Starts detection and returns its event stream.
    ///
    /// Returns immediately; all work happens on the current tokio runtime,
    /// and events are buffered until read. Without watching, the stream
    /// ends after the first results. Outside a runtime the handle carries a
    /// single error.
    pub fn detect(&self, opts: DetectOptions) -> Handle {
        let (handle, ctx) = Handle::new();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                info!(watch = opts.watch, force = opts.force, "Starting detection");
                let task = session::run(self.clone(), Arc::clone(&ctx), opts, runtime.clone());
                runtime.spawn(task);
            }
            Err(_) => ctx.fail(DetectError::Watch(WatchError::NoRuntime)),
        }
        handle
    }

    /// Runs one unwatched detection and returns its results.
    ///
    /// # Errors
    ///
    /// Returns the error a [`Handle`] would have reported.
    pub async fn detect_once(&self, opts: DetectOptions) -> Result<Detected, DetectError> {
        let set = self.get_paths(&opts.paths).await?;
        let id = scan_identity(&set.paths);
        let outcome = self
            .scan(ScanRequest::new(id.clone(), set.paths).with_force(opts.force))
            .await?;
        let container = self.process_results(outcome.results, &id)?;
        Ok(Detected::from_container(&container, opts.live))
    }
}

impl fmt::Debug for DetectEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectEngine")
            .field("options", &self.inner.options)
            .field("containers", &self.inner.containers.lock().len())
            .field("watcher", &self.inner.watcher)
            .finish_non_exhaustive()
    }
}

/// Shapes raw results for the container mode.
fn normalize(value: Value, multiple: bool) -> Value {
    if multiple {
        Value::Array(reactive::into_list(value))
    } else {
        value
    }
}
