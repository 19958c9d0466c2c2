//! Fast hash map aliases and scan identity hashing.
//!
//! [`FxHashMap`] and [`FxHashSet`] use the Fx hash algorithm from the
//! `rustc-hash` crate, which is considerably faster than the standard
//! library's SipHash for the short string and path keys used throughout the
//! workspace. None of these maps hold attacker-controlled keys.
//!
//! [`scan_identity`] derives the stable key under which a set of search paths
//! shares cached results, result containers, and lock serialization.
//!
//! # Examples
//!
//! ```
//! use td_core::{FxHashMap, scan_identity};
//! use camino::Utf8PathBuf;
//!
//! let mut map: FxHashMap<String, i32> = FxHashMap::default();
//! map.insert("key".to_owned(), 42);
//!
//! let a = scan_identity(&[Utf8PathBuf::from("/b"), Utf8PathBuf::from("/a")]);
//! let b = scan_identity(&[Utf8PathBuf::from("/a"), Utf8PathBuf::from("/b")]);
//! assert_eq!(a, b);
//! ```

use std::hash::{Hash, Hasher};

use camino::Utf8PathBuf;
use rustc_hash::FxHasher;

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A [`HashSet`](std::collections::HashSet) using the Fx hash algorithm.
pub type FxHashSet<V> = rustc_hash::FxHashSet<V>;

/// Computes the identity of a set of search paths.
///
/// The paths are sorted before hashing so the identity does not depend on
/// the order callers listed them in. The result is a 16-digit lowercase hex
/// string suitable for use as a map or lock key.
#[must_use]
pub fn scan_identity(paths: &[Utf8PathBuf]) -> String {
    let mut sorted: Vec<&str> = paths.iter().map(|path| path.as_str()).collect();
    sorted.sort_unstable();

    let mut hasher = FxHasher::default();
    sorted.len().hash(&mut hasher);
    for path in sorted {
        path.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}
