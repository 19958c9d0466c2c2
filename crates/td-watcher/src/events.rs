//! Event types delivered to watcher listeners.
//!
//! # Event Flow
//!
//! ```text
//! OS notification (notify)
//!        │
//!        ▼
//!   dispatcher thread
//!        │  classify against the node's child snapshot
//!        ▼
//!   WatchEvent { Add | Change | Delete }
//!        │
//!        ▼
//!   listeners of the node + recursive listeners of its ancestors
//! ```

use std::fmt;
use std::time::Instant;

use camino::Utf8PathBuf;

/// How a directory entry changed relative to the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    /// The entry appeared.
    Add,
    /// The entry still exists but was modified.
    Change,
    /// The entry disappeared.
    Delete,
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
        })
    }
}

/// A classified change to one entry of a watched directory.
///
/// # Examples
///
/// ```
/// use td_watcher::{WatchEvent, WatchEventKind};
/// use camino::Utf8PathBuf;
///
/// let event = WatchEvent::new(WatchEventKind::Add, Utf8PathBuf::from("/sdk"), "tools");
/// assert_eq!(event.path.as_str(), "/sdk/tools");
/// assert_eq!(event.filename, "tools");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// The kind of change.
    pub kind: WatchEventKind,

    /// Full path of the entry that changed.
    pub path: Utf8PathBuf,

    /// The directory that holds the entry.
    pub dir: Utf8PathBuf,

    /// Name of the entry within `dir`.
    pub filename: String,

    /// When the change was classified.
    pub timestamp: Instant,
}

impl WatchEvent {
    /// Creates an event for `filename` inside `dir`, stamped now.
    #[must_use]
    pub fn new(kind: WatchEventKind, dir: Utf8PathBuf, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            kind,
            path: dir.join(&filename),
            dir,
            filename,
            timestamp: Instant::now(),
        }
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path)
    }
}
