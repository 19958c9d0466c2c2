//! Error types for the td-detect crate.
//!
//! This module provides the [`DetectError`] type covering every failure a
//! detection run can report, from construction-time validation to predicate
//! failures in the middle of a scan.

use camino::Utf8PathBuf;
use td_core::{ConfigError, MutexError};
use td_watcher::WatchError;

/// Errors that can occur while configuring or running detection.
///
/// # Error Recovery Strategy
///
/// - **Config errors** ([`DetectError::Config`]): Fatal - returned by
///   [`DetectEngine::new`](crate::DetectEngine::new) before any I/O
/// - **Invalid options** ([`DetectError::InvalidOption`]): Fatal for the
///   `detect()` call that supplied them, delivered as an error event
/// - **I/O errors** ([`DetectError::Io`]): Fatal for the scan; a missing path
///   is never an error
/// - **Predicate errors** ([`DetectError::Predicate`]): Fatal for the scan;
///   other handles and the shared cache are unaffected
/// - **Registry errors** ([`DetectError::Registry`]): Recoverable - per-key
///   failures are already degraded to "not found" before reaching here
/// - **Cancelled** ([`DetectError::Cancelled`]): Recoverable - the handle was
///   stopped while a scan was in flight
///
/// # Examples
///
/// ```
/// use td_detect::DetectError;
///
/// fn report(err: &DetectError) {
///     if err.is_fatal() {
///         eprintln!("detection failed: {err}");
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// Engine options were malformed.
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    /// Per-call options were malformed.
    #[error("invalid option `{option}`: {reason}")]
    InvalidOption {
        /// The offending option.
        option: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A stat or directory read failed for a reason other than the path not
    /// existing.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being inspected.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The directory predicate or the results hook failed.
    #[error("{context} failed: {source}")]
    Predicate {
        /// Which callback failed.
        context: &'static str,
        /// The error it returned.
        #[source]
        source: anyhow::Error,
    },

    /// A registry lookup failed as a whole.
    #[error("registry query failed: {0}")]
    Registry(#[source] anyhow::Error),

    /// Setting up a filesystem watch failed.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// A serialization key was rejected.
    #[error(transparent)]
    Lock(#[from] MutexError),

    /// A blocking helper task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The scan was cancelled because its handle stopped.
    #[error("scan cancelled")]
    Cancelled,
}

impl DetectError {
    /// Creates a new [`DetectError::InvalidOption`] error.
    #[inline]
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new [`DetectError::Io`] error.
    #[inline]
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`DetectError::Predicate`] error.
    #[inline]
    pub fn predicate(context: &'static str, source: anyhow::Error) -> Self {
        Self::Predicate { context, source }
    }

    /// Creates a new [`DetectError::Registry`] error.
    #[inline]
    pub fn registry(source: impl Into<anyhow::Error>) -> Self {
        Self::Registry(source.into())
    }

    /// Returns `true` if this error is recoverable.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Registry(_) | Self::Cancelled)
    }

    /// Returns `true` if this error is fatal for the detection run.
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
            Self::Config(err) => err.path(),
            Self::Watch(err) => err.path(),
            Self::InvalidOption { .. }
            | Self::Predicate { .. }
            | Self::Registry(_)
            | Self::Lock(_)
            | Self::Task(_)
            | Self::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_predicate_error_display() {
        let err = DetectError::predicate("checkDir", anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "checkDir failed: boom");
        assert!(err.is_fatal());
        assert!(err.path().is_none());
    }

    #[test]
    fn test_io_error_path() {
        let err = DetectError::io(
            "/opt/sdk",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.path().map(|p| p.as_str()), Some("/opt/sdk"));
    }

    #[test]
    fn test_recoverable_variants() {
        assert!(DetectError::Cancelled.is_recoverable());
        assert!(DetectError::registry(anyhow::anyhow!("reg.exe missing")).is_recoverable());
        assert!(DetectError::invalid_option("paths", "empty").is_fatal());
    }

    #[test]
    fn test_config_error_converts() {
        let err: DetectError = ConfigError::invalid_option("exe", "must not be empty").into();
        assert!(matches!(err, DetectError::Config(_)));
        assert!(err.to_string().contains("exe"));
    }
}
