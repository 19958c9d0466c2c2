//! Error types for the td-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while building or maintaining the watcher tree.

use camino::Utf8PathBuf;

/// Errors that can occur during file watching operations.
///
/// A missing path is never an error: the tree keeps an unarmed node and arms
/// it when the path appears. These errors cover everything else.
///
/// # Error Recovery Strategy
///
/// - **Notify errors** ([`WatchError::Notify`]): Fatal - the OS refused the watch
/// - **I/O errors** ([`WatchError::Io`]): Fatal - a stat or directory read failed
///   for a reason other than the path not existing
/// - **Non-UTF-8 path** ([`WatchError::NonUtf8Path`]): Recoverable - the entry is skipped
/// - **Dispatcher** ([`WatchError::Dispatcher`]): Fatal - no thread to deliver events
/// - **No runtime** ([`WatchError::NoRuntime`]): Fatal - debouncing needs tokio
///
/// # Examples
///
/// ```
/// use td_watcher::WatchError;
///
/// fn handle_error(err: WatchError) {
///     if err.is_fatal() {
///         eprintln!("Watch failed: {err}");
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize or operate the notify watcher.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// A stat or directory read failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being inspected.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// The thread that dispatches OS notifications could not be started.
    #[error("failed to start watcher dispatcher: {0}")]
    Dispatcher(#[source] std::io::Error),

    /// A debouncer was created outside a tokio runtime.
    #[error("debouncing requires a running tokio runtime")]
    NoRuntime,
}

impl WatchError {
    /// Creates a new [`WatchError::Io`] error.
    #[inline]
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Returns `true` if this error is recoverable (watching can continue).
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NonUtf8Path(_))
    }

    /// Returns `true` if this error is fatal (watching should stop).
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the file path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            Self::Notify(_) | Self::NonUtf8Path(_) | Self::Dispatcher(_) | Self::NoRuntime => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_watch_error_io() {
        let err = WatchError::io(
            "/sdk/platforms",
            io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        );
        assert!(err.is_fatal());
        assert_eq!(err.path().map(|p| p.as_str()), Some("/sdk/platforms"));
        assert!(err.to_string().contains("/sdk/platforms"));
    }

    #[test]
    fn test_watch_error_non_utf8() {
        let err = WatchError::non_utf8_path(PathBuf::from("test"));
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());
        assert!(err.path().is_none());
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_watch_error_no_runtime() {
        let err = WatchError::NoRuntime;
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "debouncing requires a running tokio runtime");
    }
}
