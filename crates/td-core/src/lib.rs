//! Core configuration, errors, and primitives for the tooldetect workspace.
//!
//! This crate provides the foundational pieces shared by the watcher and the
//! detection engine:
//!
//! - [`ConfigError`] for malformed configuration
//! - Configuration structures ([`Config`], [`EngineSettings`], [`WatchConfig`])
//!   and process-environment toggles ([`EnvToggles`])
//! - Type aliases for `FxHashMap`/`FxHashSet` and [`scan_identity`]
//! - [`KeyedMutex`], an async lock that serializes calls per key
//! - [`NamespaceCache`], a run-once-per-namespace memoizer
//!
//! # Crate Dependencies
//!
//! ```text
//! td-cli ──► td-detect ──► td-watcher ──► td-core
//!                    └───────────────────►
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;
pub mod memo;
pub mod mutex;

pub use config::{Config, EngineSettings, EnvToggles, Hive, RegistryKeySpec, WatchConfig};
pub use error::ConfigError;
pub use hash::{FxHashMap, FxHashSet, scan_identity};
pub use memo::NamespaceCache;
pub use mutex::{KeyedMutex, MutexError};
