//! Keyed async serialization.
//!
//! [`KeyedMutex`] queues calls under a string key so that at most one call
//! per key runs at a time. Each caller receives the outcome of its own call,
//! unlike [`NamespaceCache`](crate::NamespaceCache) which shares a single
//! value between callers.
//!
//! Waiters are served in FIFO order (tokio's mutex is fair). The entry for a
//! key is dropped once nobody holds or waits on it, so the map only grows
//! with the number of keys currently in use.
//!
//! # Examples
//!
//! ```
//! use td_core::KeyedMutex;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), td_core::MutexError> {
//! let mutex = KeyedMutex::new();
//! let value = mutex.run("sdk-scan", || async { 42 }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hash::FxHashMap;

/// Errors returned by [`KeyedMutex::run`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutexError {
    /// The key was empty or whitespace.
    #[error("mutex name must be a non-empty string")]
    EmptyName,
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// An async mutex keyed by name.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    locks: Mutex<FxHashMap<String, KeyLock>>,
}

impl KeyedMutex {
    /// Creates an empty keyed mutex.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` once every earlier call queued under `name` has finished.
    ///
    /// # Errors
    ///
    /// Returns [`MutexError::EmptyName`] if `name` is empty; `f` is not
    /// invoked in that case.
    pub async fn run<F, Fut, T>(&self, name: &str, f: F) -> Result<T, MutexError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if name.trim().is_empty() {
            return Err(MutexError::EmptyName);
        }

        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(name.to_owned()).or_default())
        };
        let release = Release {
            owner: self,
            name,
            lock,
        };

        let _guard = release.lock.lock().await;
        tracing::trace!(name, "Acquired keyed mutex");
        Ok(f().await)
    }

    /// Returns `true` if a call under `name` is running or queued.
    #[must_use]
    pub fn is_busy(&self, name: &str) -> bool {
        self.locks.lock().contains_key(name)
    }

    /// Returns the number of keys with running or queued calls.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Removes the key entry when the last interested caller leaves, including
/// callers whose future was dropped while waiting.
struct Release<'a> {
    owner: &'a KeyedMutex,
    name: &'a str,
    lock: KeyLock,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock();
        // One reference lives in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(self.name);
        }
    }
}
