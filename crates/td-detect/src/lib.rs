//! Tool installation detection with cached scans and live results.
//!
//! This crate is the engine behind the `tooldetect` CLI. A detector supplies
//! a [`DirCheck`] predicate that recognizes an installation directory; the
//! engine decides where to look, walks those places to a bounded depth,
//! caches what it found, and optionally keeps watching so results stay
//! current.
//!
//! # Overview
//!
//! The main entry point is [`DetectEngine`], which combines:
//!
//! - [`SearchPath`] sources: static paths, environment variables, the
//!   directory of an executable on `PATH`, and registry values
//! - [`ResultCache`]: per-scan-id predicate outcomes, misses included
//! - [`ReactiveValue`]: a mergeable result container with change
//!   notifications
//! - [`Handle`]: the per-call event stream, owning that call's watches
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use td_detect::{DetectEngine, DetectOptions, EngineOptions, SyncCheck};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), td_detect::DetectError> {
//! let engine = DetectEngine::new(
//!     EngineOptions::new(SyncCheck::new(|dir: &camino::Utf8Path| {
//!         let release = dir.join("release");
//!         Ok(release.exists().then(|| json!({ "id": dir.as_str(), "path": dir.as_str() })))
//!     }))
//!     .with_depth(1)
//!     .with_env(["JAVA_HOME"])
//!     .with_exe("javac")
//!     .with_multiple(true),
//! )?;
//!
//! let results = engine.detect_once(DetectOptions::default()).await?;
//! println!("{}", results.value());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! DetectEngine::detect(opts) ──► Handle (returned at once)
//!     │
//!     └── spawned task
//!             │
//!             ├── initialize()   static + env + exe paths, once (keyed mutex)
//!             ├── get_paths()    + registry + per-call paths, resolved, deduped
//!             ├── scan()         keyed mutex per scan id
//!             │      └── Walk    explicit stack, cache, predicate, cancel token
//!             ├── process_results()  hook, then merge into ReactiveValue
//!             │
//!             └── watch mode
//!                     ├── WatcherTree watches ──► Debouncer ──► forced rescan
//!                     ├── registry poller ──► full rescan / re-run hook
//!                     └── container changes ──► Results events
//! ```
//!
//! # Error Handling
//!
//! Construction errors are returned by [`DetectEngine::new`]. Everything
//! after that is reported once, as [`DetectEvent::Error`], and ends the
//! handle; other handles and the shared cache are unaffected.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod cache;
pub mod check;
pub mod engine;
pub mod error;
pub mod handle;
pub mod options;
pub mod paths;
pub mod reactive;
pub mod registry;
mod session;
mod walk;

pub use cache::{CacheEntry, ResultCache};
pub use check::{AsyncCheck, DirCheck, SyncCheck, is_truthy};
pub use engine::{DetectEngine, PathSet, ScanOutcome, ScanRequest};
pub use error::DetectError;
pub use handle::{DetectEvent, Detected, Handle};
pub use options::{DEFAULT_DEBOUNCE, DetectOptions, EngineOptions, HookContext, ProcessResults};
pub use paths::{EnvLookup, EnvPaths, SearchPath};
pub use reactive::{ChangeSet, Contents, ReactiveValue};
pub use registry::{NoRegistry, RegistryBackend, RegistryKeys, RegistryLookup};
