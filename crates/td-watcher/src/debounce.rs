//! Per-key trailing-edge debouncing.
//!
//! Watch events tend to arrive in bursts (an installer unpacking thousands
//! of files, an editor's write-rename-delete dance). [`Debouncer`] collapses
//! every trigger for a key within the window into a single callback that
//! fires when the window closes.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use td_core::FxHashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::WatchError;

type Callback<K> = Box<dyn Fn(K) + Send + Sync>;

/// Collapses bursts of triggers per key into one delayed callback.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use td_watcher::Debouncer;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), td_watcher::WatchError> {
/// let debouncer = Debouncer::new(Duration::from_millis(50), |key: String| {
///     println!("rescan {key}");
/// })?;
/// debouncer.trigger("sdk".to_owned());
/// debouncer.trigger("sdk".to_owned()); // collapsed into the first
/// assert!(debouncer.is_pending(&"sdk".to_owned()));
/// # Ok(())
/// # }
/// ```
pub struct Debouncer<K> {
    inner: Arc<Inner<K>>,
}

struct Inner<K> {
    window: Duration,
    pending: Mutex<FxHashMap<K, JoinHandle<()>>>,
    callback: Callback<K>,
    runtime: Handle,
}

impl<K> Debouncer<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Creates a debouncer on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoRuntime`] when called outside a runtime.
    pub fn new<F>(window: Duration, callback: F) -> Result<Self, WatchError>
    where
        F: Fn(K) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
        Ok(Self::with_runtime(runtime, window, callback))
    }

    /// Creates a debouncer whose timers run on `runtime`.
    pub fn with_runtime<F>(runtime: Handle, window: Duration, callback: F) -> Self
    where
        F: Fn(K) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                window,
                pending: Mutex::new(FxHashMap::default()),
                callback: Box::new(callback),
                runtime,
            }),
        }
    }

    /// Starts the window for `key`, or does nothing if one is already open.
    ///
    /// Safe to call from any thread, including the watcher's dispatcher.
    pub fn trigger(&self, key: K) {
        let mut pending = self.inner.pending.lock();
        if pending.contains_key(&key) {
            tracing::trace!("Collapsed trigger into pending window");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let fired = key.clone();
        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep(inner.window).await;
            // The marker is cleared first so triggers raised by the callback
            // open a fresh window.
            inner.pending.lock().remove(&fired);
            (inner.callback)(fired);
        });
        pending.insert(key, task);
    }

    /// Returns `true` if a window is open for `key`.
    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.inner.pending.lock().contains_key(key)
    }

    /// Cancels every open window without firing callbacks.
    pub fn cancel_all(&self) {
        let drained: Vec<JoinHandle<()>> = self
            .inner
            .pending
            .lock()
            .drain()
            .map(|(_, task)| task)
            .collect();
        for task in drained {
            task.abort();
        }
    }

    /// Returns the debounce window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.inner.window
    }
}

impl<K> Clone for Debouncer<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for Debouncer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.inner.window)
            .field("pending", &self.inner.pending.lock().len())
            .finish_non_exhaustive()
    }
}
