//! Hierarchical filesystem watching with per-key debouncing.
//!
//! This crate provides the change-detection layer used by the detection
//! engine to keep results live:
//!
//! - [`WatcherTree`] shares OS watches between listeners through a tree of
//!   reference-counted directory nodes, arms watches on directories as they
//!   are created, and classifies raw notifications into add, change and
//!   delete events.
//! - [`Debouncer`] collapses bursts of triggers per key into a single
//!   trailing callback.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     notify backend thread                     │
//! │  RecommendedWatcher ──► callback ──► unbounded channel        │
//! └──────────────────────────────────────────┬────────────────────┘
//!                                            │
//!                                            ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      dispatcher thread                        │
//! │  lock tree ─► classify vs. snapshot ─► unlock ─► listeners     │
//! └──────────────────────────────────────────┬────────────────────┘
//!                                            │ Debouncer::trigger
//!                                            ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     async runtime (tokio)                     │
//! │  one sleep per pending key ─► callback (rescan)               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! td-cli ──► td-detect ──► td-watcher ──► td-core
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use td_watcher::{Debouncer, WatchOptions, WatcherTree};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), td_watcher::WatchError> {
//! let rescan = Debouncer::new(Duration::from_millis(250), |root: String| {
//!     println!("rescanning {root}");
//! })?;
//!
//! let tree = WatcherTree::new();
//! let trigger = rescan.clone();
//! let _unwatch = tree.watch_with("/opt/sdk", WatchOptions::recursive(), move |_event| {
//!     trigger.trigger("/opt/sdk".to_owned());
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Missing paths are not errors: they are watched once they appear. The
//! remaining failures are reported as [`WatchError`].

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod debounce;
pub mod error;
pub mod events;
pub mod tree;

pub use debounce::Debouncer;
pub use error::WatchError;
pub use events::{WatchEvent, WatchEventKind};
pub use tree::{Listener, Unwatch, WatchOptions, WatcherTree};
