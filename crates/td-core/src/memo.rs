//! Run-once memoization per namespace.
//!
//! [`NamespaceCache`] wraps an expensive lookup (an executable search on
//! `PATH`, for instance) so that concurrent callers asking for the same
//! namespace trigger exactly one underlying call and all receive the same
//! value.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::hash::FxHashMap;

/// A map of namespaces to lazily computed, shared values.
///
/// # Examples
///
/// ```
/// use td_core::NamespaceCache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache: NamespaceCache<u32> = NamespaceCache::new();
/// let first = cache.get_or_init("answer", || async { 42 }).await;
/// let second = cache.get_or_init("answer", || async { 7 }).await;
/// assert_eq!((first, second), (42, 42));
/// # }
/// ```
#[derive(Debug)]
pub struct NamespaceCache<T> {
    cells: Mutex<FxHashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for NamespaceCache<T> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<T: Clone> NamespaceCache<T> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `namespace`, computing it with `f` on first use.
    ///
    /// Callers that arrive while the first computation is in flight wait for
    /// it instead of starting their own.
    pub async fn get_or_init<F, Fut>(&self, namespace: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(cells.entry(namespace.to_owned()).or_default())
        };
        cell.get_or_init(f).await.clone()
    }

    /// Returns the value for `namespace` if it has been computed.
    #[must_use]
    pub fn get(&self, namespace: &str) -> Option<T> {
        self.cells
            .lock()
            .get(namespace)
            .and_then(|cell| cell.get().cloned())
    }

    /// Forgets the value for `namespace`, returning `true` if one was stored.
    pub fn clear(&self, namespace: &str) -> bool {
        self.cells.lock().remove(namespace).is_some()
    }
}
