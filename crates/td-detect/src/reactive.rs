//! Subscribable, mergeable result containers.
//!
//! A [`ReactiveValue`] holds the current results for one scan id. New
//! results are merged into it rather than replacing it, so subscribers keep
//! their subscription across rescans and only hear about what changed.
//!
//! - In single mode the value is a scalar, `null` or an object. Objects are
//!   deep-merged: new keys are added, changed leaves overwritten, keys the
//!   new value does not mention are kept.
//! - In multiple mode the value is always an ordered list. A merge swaps the
//!   list in one step.
//!
//! Each notification is a [`ChangeSet`] of JSON pointers (RFC 6901) naming
//! the parts that changed. A merge that changes nothing notifies nobody.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use td_detect::ReactiveValue;
//!
//! let value = ReactiveValue::single();
//! let mut changes = value.subscribe();
//!
//! value.merge(json!({ "sdk": { "version": "34" } }));
//! value.merge(json!({ "sdk": { "path": "/opt/sdk" } }));
//!
//! assert_eq!(
//!     value.snapshot(),
//!     json!({ "sdk": { "version": "34", "path": "/opt/sdk" } })
//! );
//! // Merging onto `null` reports each new key.
//! assert_eq!(changes.try_recv().unwrap().paths, vec!["/sdk".to_owned()]);
//! assert_eq!(changes.try_recv().unwrap().paths, vec!["/sdk/path".to_owned()]);
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// The parts of a [`ReactiveValue`] touched by one update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// JSON pointers of changed parts; `""` means the whole value.
    pub paths: Vec<String>,
}

impl ChangeSet {
    /// Returns `true` if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// The shape of a container's contents.
#[derive(Debug, Clone, PartialEq)]
pub enum Contents {
    /// Single mode: a scalar, `null` or an object.
    Single(Value),
    /// Multiple mode: an ordered list.
    List(Vec<Value>),
}

impl Contents {
    fn to_value(&self) -> Value {
        match self {
            Self::Single(value) => value.clone(),
            Self::List(items) => Value::Array(items.clone()),
        }
    }
}

/// A shared result container with change notifications.
///
/// Clones share the same contents and subscribers.
#[derive(Clone)]
pub struct ReactiveValue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    tx: broadcast::Sender<ChangeSet>,
}

struct State {
    contents: Contents,
    paused: usize,
    deferred: Vec<String>,
}

impl ReactiveValue {
    /// Creates a single-mode container holding `null`.
    #[must_use]
    pub fn single() -> Self {
        Self::with_contents(Contents::Single(Value::Null))
    }

    /// Creates an empty multiple-mode container.
    #[must_use]
    pub fn list() -> Self {
        Self::with_contents(Contents::List(Vec::new()))
    }

    /// Wraps a plain value, as a list when `multiple` is set.
    #[must_use]
    pub fn from_value(value: Value, multiple: bool) -> Self {
        if multiple {
            Self::with_contents(Contents::List(into_list(value)))
        } else {
            Self::with_contents(Contents::Single(value))
        }
    }

    fn with_contents(contents: Contents) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    contents,
                    paused: 0,
                    deferred: Vec::new(),
                }),
                tx,
            }),
        }
    }

    /// Returns `true` for a multiple-mode container.
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self.inner.state.lock().contents, Contents::List(_))
    }

    /// Returns a copy of the current contents.
    #[must_use]
    pub fn contents(&self) -> Contents {
        self.inner.state.lock().contents.clone()
    }

    /// Returns a copy of the current value; lists become JSON arrays.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.inner.state.lock().contents.to_value()
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.inner.tx.subscribe()
    }

    /// Returns `true` if both handles share the same container.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Merges `value` in and returns what changed.
    ///
    /// A list container always stays a list: `null` becomes an empty list
    /// and a non-array value a one-element list.
    pub fn merge(&self, value: Value) -> ChangeSet {
        self.apply(|contents| match contents {
            Contents::Single(current) => {
                let mut changed = Vec::new();
                merge_into(current, value, "", &mut changed);
                changed
            }
            Contents::List(items) => {
                let next = into_list(value);
                let mut changed = Vec::new();
                diff_lists(items, &next, "", &mut changed);
                if !changed.is_empty() {
                    *items = next;
                    changed = vec![String::new()];
                }
                changed
            }
        })
    }

    /// Appends `values` to a list container and returns what changed.
    ///
    /// On a single-mode container this behaves like [`ReactiveValue::merge`]
    /// with the values as an array.
    pub fn append(&self, values: Vec<Value>) -> ChangeSet {
        self.apply(|contents| match contents {
            Contents::Single(current) => {
                let mut changed = Vec::new();
                merge_into(current, Value::Array(values), "", &mut changed);
                changed
            }
            Contents::List(items) => {
                let start = items.len();
                items.extend(values);
                (start..items.len()).map(|index| format!("/{index}")).collect()
            }
        })
    }

    /// Edits the value in place and reports whatever the edit changed.
    pub fn update(&self, edit: impl FnOnce(&mut Value)) -> ChangeSet {
        self.apply(|contents| {
            let before = contents.to_value();
            let mut after = before.clone();
            edit(&mut after);
            let mut changed = Vec::new();
            diff(&before, &after, "", &mut changed);
            if !changed.is_empty() {
                *contents = match contents {
                    Contents::Single(_) => Contents::Single(after),
                    Contents::List(_) => Contents::List(into_list(after)),
                };
            }
            changed
        })
    }

    /// Holds back notifications until the matching [`ReactiveValue::resume`].
    ///
    /// Pauses nest.
    pub fn pause(&self) {
        self.inner.state.lock().paused += 1;
    }

    /// Ends one pause; when the last one ends, everything that changed while
    /// paused is published as a single notification.
    pub fn resume(&self) {
        let pending = {
            let mut state = self.inner.state.lock();
            state.paused = state.paused.saturating_sub(1);
            if state.paused > 0 || state.deferred.is_empty() {
                return;
            }
            let mut paths = std::mem::take(&mut state.deferred);
            paths.sort();
            paths.dedup();
            paths
        };
        self.publish(pending);
    }

    fn apply(&self, change: impl FnOnce(&mut Contents) -> Vec<String>) -> ChangeSet {
        let changed = {
            let mut state = self.inner.state.lock();
            let changed = change(&mut state.contents);
            if state.paused > 0 {
                state.deferred.extend(changed.iter().cloned());
                return ChangeSet { paths: changed };
            }
            changed
        };
        self.publish(changed.clone());
        ChangeSet { paths: changed }
    }

    fn publish(&self, paths: Vec<String>) {
        if paths.is_empty() {
            return;
        }
        // No receivers is not an error: nobody is listening yet.
        let _ = self.inner.tx.send(ChangeSet { paths });
    }
}

impl fmt::Debug for ReactiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveValue")
            .field("contents", &self.contents())
            .field("subscribers", &self.inner.tx.receiver_count())
            .finish()
    }
}

impl Serialize for ReactiveValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

/// Normalizes a value for a list container.
pub(crate) fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn child_pointer(parent: &str, key: &str) -> String {
    format!("{parent}/{}", key.replace('~', "~0").replace('/', "~1"))
}

fn merge_into(target: &mut Value, source: Value, pointer: &str, changed: &mut Vec<String>) {
    match (target, source) {
        (Value::Object(current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let path = child_pointer(pointer, &key);
                match current.get_mut(&key) {
                    Some(existing) => merge_into(existing, value, &path, changed),
                    None => {
                        current.insert(key, value);
                        changed.push(path);
                    }
                }
            }
        }
        (target, Value::Object(incoming)) => {
            // Only an object can hold keys, so `target` is replaced; report
            // the keys it gained.
            let keys: Vec<String> = incoming
                .keys()
                .map(|key| child_pointer(pointer, key))
                .collect();
            *target = Value::Object(incoming);
            if keys.is_empty() {
                changed.push(pointer.to_owned());
            } else {
                changed.extend(keys);
            }
        }
        (target, source) => {
            if *target != source {
                *target = source;
                changed.push(pointer.to_owned());
            }
        }
    }
}

fn diff(before: &Value, after: &Value, pointer: &str, changed: &mut Vec<String>) {
    match (before, after) {
        (Value::Object(a), Value::Object(b)) => diff_objects(a, b, pointer, changed),
        (Value::Array(a), Value::Array(b)) => diff_lists(a, b, pointer, changed),
        _ if before != after => changed.push(pointer.to_owned()),
        _ => {}
    }
}

fn diff_objects(
    a: &Map<String, Value>,
    b: &Map<String, Value>,
    pointer: &str,
    changed: &mut Vec<String>,
) {
    for (key, old) in a {
        let path = child_pointer(pointer, key);
        match b.get(key) {
            Some(new) => diff(old, new, &path, changed),
            None => changed.push(path),
        }
    }
    for key in b.keys().filter(|key| !a.contains_key(*key)) {
        changed.push(child_pointer(pointer, key));
    }
}

fn diff_lists(a: &[Value], b: &[Value], pointer: &str, changed: &mut Vec<String>) {
    if a.len() != b.len() {
        changed.push(pointer.to_owned());
        return;
    }
    for (index, (old, new)) in a.iter().zip(b).enumerate() {
        diff(old, new, &format!("{pointer}/{index}"), changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_merge_keeps_unrelated_keys() {
        let value = ReactiveValue::single();
        value.merge(json!({ "foo": "bar" }));
        let changes = value.merge(json!({ "baz": "wiz" }));

        assert_eq!(changes.paths, vec!["/baz".to_owned()]);
        assert_eq!(value.snapshot(), json!({ "foo": "bar", "baz": "wiz" }));
    }

    #[test]
    fn test_scalar_replaced() {
        let value = ReactiveValue::from_value(json!("/opt/a"), false);
        let changes = value.merge(json!("/opt/b"));
        assert_eq!(changes.paths, vec![String::new()]);
        assert_eq!(value.snapshot(), json!("/opt/b"));
    }

    #[test]
    fn test_unchanged_merge_notifies_nobody() {
        let value = ReactiveValue::single();
        value.merge(json!({ "foo": { "bar": 1 } }));
        let mut rx = value.subscribe();

        let changes = value.merge(json!({ "foo": { "bar": 1 } }));
        assert!(changes.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_list_never_degrades_to_scalar() {
        let value = ReactiveValue::list();
        value.merge(json!({ "id": "only" }));
        assert!(value.is_list());
        assert_eq!(value.snapshot(), json!([{ "id": "only" }]));

        value.merge(Value::Null);
        assert_eq!(value.snapshot(), json!([]));
    }

    #[test]
    fn test_list_swap_is_one_notification() {
        let value = ReactiveValue::list();
        let mut rx = value.subscribe();
        value.merge(json!([1, 2, 3]));

        assert_eq!(rx.try_recv().unwrap().paths, vec![String::new()]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_append_reports_new_indices() {
        let value = ReactiveValue::from_value(json!([1]), true);
        let changes = value.append(vec![json!(2), json!(3)]);
        assert_eq!(changes.paths, vec!["/1".to_owned(), "/2".to_owned()]);
        assert_eq!(value.snapshot(), json!([1, 2, 3]));
    }

    #[test]
    fn test_pause_coalesces_notifications() {
        let value = ReactiveValue::single();
        let mut rx = value.subscribe();

        value.pause();
        value.merge(json!({ "a": 1 }));
        value.merge(json!({ "b": 2 }));
        assert!(rx.try_recv().is_err());
        value.resume();

        assert_eq!(
            rx.try_recv().unwrap().paths,
            vec!["/a".to_owned(), "/b".to_owned()]
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_object_over_scalar_reports_each_key() {
        let value = ReactiveValue::from_value(json!("/opt/a"), false);
        let changes = value.merge(json!({ "x": 1, "y": 2 }));
        assert_eq!(changes.paths, vec!["/x".to_owned(), "/y".to_owned()]);

        let value = ReactiveValue::from_value(json!(1), false);
        let changes = value.merge(json!({}));
        assert_eq!(changes.paths, vec![String::new()]);
        assert_eq!(value.snapshot(), json!({}));
    }

    #[test]
    fn test_update_diffs_in_place_edits() {
        let value = ReactiveValue::from_value(json!({ "sdk": { "version": "33" } }), false);
        let changes = value.update(|v| v["sdk"]["version"] = json!("34"));
        assert_eq!(changes.paths, vec!["/sdk/version".to_owned()]);
    }

    #[test]
    fn test_pointer_escaping() {
        let value = ReactiveValue::single();
        let changes = value.merge(json!({ "/opt/sdk": true }));
        assert_eq!(changes.paths, vec!["/~1opt~1sdk".to_owned()]);
    }

    #[test]
    fn test_serializes_as_snapshot() {
        let value = ReactiveValue::from_value(json!({ "foo": "bar" }), false);
        insta::assert_json_snapshot!(value, @r###"
        {
          "foo": "bar"
        }
        "###);
    }
}
