//! Per-scan-identity cache of predicate outcomes.
//!
//! The cache maps a scan id to the directories visited under it and what
//! was found there. A miss is cached as explicitly as a hit so an unforced
//! rescan never re-runs the predicate on a directory already known to be
//! empty. Entries never expire; they are only replaced by a forced walk or
//! removed with [`ResultCache::clear`].

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::RwLock;
use serde_json::Value;
use td_core::FxHashMap;

/// The outcome of visiting one directory (and, for a miss, its subtree).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// What was found, or `None` for "checked, absent".
    pub value: Option<Value>,
    /// Directories whose predicate matched to produce `value`.
    pub matched: Vec<Utf8PathBuf>,
}

impl CacheEntry {
    /// An explicit "nothing found" entry.
    #[must_use]
    pub const fn miss() -> Self {
        Self {
            value: None,
            matched: Vec::new(),
        }
    }

    /// A direct match on `dir`.
    #[must_use]
    pub fn hit(dir: &Utf8Path, value: Value) -> Self {
        Self {
            value: Some(value),
            matched: vec![dir.to_owned()],
        }
    }

    /// Returns `true` if something was found.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        self.value.is_some()
    }
}

/// Thread-safe store of [`CacheEntry`] values keyed by scan id and directory.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<FxHashMap<String, FxHashMap<Utf8PathBuf, CacheEntry>>>,
}

impl ResultCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached outcome for `dir` under scan `id`.
    #[must_use]
    pub fn get(&self, id: &str, dir: &Utf8Path) -> Option<CacheEntry> {
        self.entries.read().get(id)?.get(dir).cloned()
    }

    /// Stores the outcome for `dir` under scan `id`, replacing any previous one.
    pub fn insert(&self, id: &str, dir: &Utf8Path, entry: CacheEntry) {
        self.entries
            .write()
            .entry(id.to_owned())
            .or_default()
            .insert(dir.to_owned(), entry);
    }

    /// Returns the number of directories cached under `id`.
    #[must_use]
    pub fn len(&self, id: &str) -> usize {
        self.entries.read().get(id).map_or(0, FxHashMap::len)
    }

    /// Returns `true` if nothing is cached under any id.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().values().all(FxHashMap::is_empty)
    }

    /// Drops everything cached under `id`, returning how many entries went.
    pub fn clear(&self, id: &str) -> usize {
        self.entries.write().remove(id).map_or(0, |dirs| dirs.len())
    }

    /// Drops every cached entry.
    pub fn clear_all(&self) {
        self.entries.write().clear();
    }
}
