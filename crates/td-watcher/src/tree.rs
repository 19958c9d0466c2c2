//! Hierarchical, reference-counted directory watching.
//!
//! A [`WatcherTree`] keeps one node per path segment of every watched
//! directory, rooted at a virtual node above the filesystem roots. Each node
//! that exists on disk holds a non-recursive OS watch on its directory, so
//! the tree notices when a missing directory along a watched path is created
//! and arms the nodes below it.
//!
//! ```text
//!             (virtual root)
//!                   │
//!                   /            armed
//!                   │
//!                  opt           armed
//!                ┌──┴──┐
//!              sdk     jdk       sdk armed, jdk missing (unarmed)
//!               │
//!             tools              armed, 2 listeners
//! ```
//!
//! Nodes are shared: two listeners on the same directory use one node and
//! one OS watch. A node is pruned once it has no listeners, no children and
//! is not covered by a recursive listener above it. The OS watcher itself is
//! dropped when the last node goes away.
//!
//! OS notifications are forwarded to a dispatcher thread which classifies
//! each one against the node's snapshot of its children. Listeners are
//! invoked on that thread after the tree lock is released, so a listener may
//! freely register or remove watches.

use std::collections::hash_map::Entry;
use std::fmt;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use smallvec::SmallVec;
use td_core::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::WatchError;
use crate::events::{WatchEvent, WatchEventKind};

/// Callback invoked for every event a registration receives.
pub type Listener = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

type Segments = SmallVec<[String; 8]>;

/// Options for [`WatcherTree::watch_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Deliver events from every directory below the watched one as well.
    ///
    /// Ignored when the watched path is a file.
    pub recursive: bool,
}

impl WatchOptions {
    /// Options for a recursive watch.
    #[must_use]
    pub const fn recursive() -> Self {
        Self { recursive: true }
    }
}

/// A shared tree of directory watches.
///
/// Cloning is cheap and yields a handle to the same tree.
///
/// # Examples
///
/// ```no_run
/// use td_watcher::WatcherTree;
///
/// # fn main() -> Result<(), td_watcher::WatchError> {
/// let tree = WatcherTree::new();
/// let unwatch = tree.watch("/opt/sdk", |event| {
///     println!("{event}");
/// })?;
///
/// // Later: stop listening. Dropping `unwatch` has the same effect.
/// unwatch.unwatch();
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct WatcherTree {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<TreeState>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct TreeState {
    root: Node,
    os: Option<RecommendedWatcher>,
}

impl WatcherTree {
    /// Creates an empty tree. No OS resources are held until the first watch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches `path` non-recursively.
    ///
    /// # Errors
    ///
    /// See [`WatcherTree::watch_with`].
    pub fn watch<F>(&self, path: impl AsRef<Utf8Path>, listener: F) -> Result<Unwatch, WatchError>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        self.watch_with(path, WatchOptions::default(), listener)
    }

    /// Registers `listener` for changes under `path`.
    ///
    /// If `path` is a directory, the listener receives events for its
    /// entries. If it is a file, the parent directory is watched and only
    /// events for that filename are delivered. A path that does not exist yet
    /// is watched as a directory and armed once it appears.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS watcher cannot be created, if a directory
    /// along the path cannot be read for a reason other than it not
    /// existing, or if the path is not valid UTF-8 once made absolute.
    pub fn watch_with<F>(
        &self,
        path: impl AsRef<Utf8Path>,
        options: WatchOptions,
        listener: F,
    ) -> Result<Unwatch, WatchError>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let target = absolute(path.as_ref())?;
        let (dir, filter) = match fs::metadata(&target) {
            Ok(meta) if !meta.is_dir() => match (target.parent(), target.file_name()) {
                (Some(parent), Some(name)) => (parent.to_owned(), Some(name.to_owned())),
                _ => (target.clone(), None),
            },
            _ => (target.clone(), None),
        };
        let recursive = options.recursive && filter.is_none();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let segments = segments(&dir);

        let registration = Registration {
            id,
            listener: Arc::new(listener),
            filter,
            recursive,
        };

        let mut state = self.shared.state.lock();
        ensure_backend(&self.shared, &mut state)?;
        let TreeState { root, os } = &mut *state;
        let mut cx = Cx::new(os);
        if let Err(err) = register(root, &segments, registration, &mut cx) {
            detach(root, &segments, id, &mut cx);
            if root.children.is_empty() {
                let os = state.os.take();
                drop(state);
                drop(os);
            }
            return Err(err);
        }
        drop(state);

        debug!(path = %dir, recursive, "Registered watch");
        Ok(Unwatch {
            shared: Arc::downgrade(&self.shared),
            segments,
            id,
            done: AtomicBool::new(false),
        })
    }

    /// Re-examines `path` against its directory's snapshot as if the OS had
    /// reported a change to it, delivering any resulting events.
    pub fn refresh(&self, path: impl AsRef<Utf8Path>) {
        match absolute(path.as_ref()) {
            Ok(path) => self.shared.process(std::slice::from_ref(&path), false),
            Err(err) => debug!(error = %err, "Ignoring refresh of unresolvable path"),
        }
    }

    /// Returns `true` if `path` has a node holding an OS watch.
    #[must_use]
    pub fn is_watching(&self, path: impl AsRef<Utf8Path>) -> bool {
        let Ok(path) = absolute(path.as_ref()) else {
            return false;
        };
        let state = self.shared.state.lock();
        find(&state.root, &segments(&path)).is_some_and(|node| node.armed)
    }

    /// Returns the number of nodes in the tree, excluding the virtual root.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.shared.state.lock().root.descendants()
    }

    /// Removes every node and listener and releases the OS watcher.
    ///
    /// Outstanding [`Unwatch`] handles become no-ops.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        let TreeState { root, os } = &mut *state;
        let mut cx = Cx::new(os);
        root.close(&mut cx);
        let os = state.os.take();
        drop(state);
        drop(os);
        debug!("Closed watcher tree");
    }
}

impl fmt::Debug for WatcherTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherTree")
            .field("nodes", &self.node_count())
            .finish_non_exhaustive()
    }
}

/// Removes one registration from a [`WatcherTree`].
///
/// Calling [`Unwatch::unwatch`] more than once is harmless. Dropping the
/// handle unwatches as well.
#[must_use = "dropping an Unwatch removes the listener immediately"]
pub struct Unwatch {
    shared: Weak<Shared>,
    segments: Segments,
    id: u64,
    done: AtomicBool,
}

impl Unwatch {
    /// Removes the listener and prunes nodes that are no longer needed.
    pub fn unwatch(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(&self.segments, self.id);
        }
    }

    /// Returns `true` until [`Unwatch::unwatch`] has been called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.done.load(Ordering::Acquire)
    }
}

impl Drop for Unwatch {
    fn drop(&mut self) {
        self.unwatch();
    }
}

impl fmt::Debug for Unwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unwatch")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn remove(&self, segments: &[String], id: u64) {
        let mut state = self.state.lock();
        let TreeState { root, os } = &mut *state;
        let mut cx = Cx::new(os);
        if !detach(root, segments, id, &mut cx) {
            trace!(id, "Listener already removed");
        }
        if root.children.is_empty() {
            let os = state.os.take();
            drop(state);
            drop(os);
        }
    }

    fn handle_event(&self, event: notify::Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        let content_modified = matches!(
            event.kind,
            EventKind::Any | EventKind::Modify(ModifyKind::Any | ModifyKind::Data(_))
        );
        let paths: Vec<Utf8PathBuf> = event
            .paths
            .into_iter()
            .filter_map(|path| match Utf8PathBuf::from_path_buf(path) {
                Ok(path) => Some(path),
                Err(path) => {
                    debug!(path = %path.display(), "Skipping non-UTF-8 path");
                    None
                }
            })
            .collect();
        self.process(&paths, content_modified);
    }

    fn process(&self, paths: &[Utf8PathBuf], content_modified: bool) {
        let deliveries = {
            let mut state = self.state.lock();
            let TreeState { root, os } = &mut *state;
            let mut cx = Cx::new(os);
            for path in paths {
                let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                    continue;
                };
                if let Some(node) = find_mut(root, &segments(dir)) {
                    if let Err(err) = node.on_change(name, content_modified, &mut cx) {
                        warn!(path = %path, error = %err, "Failed to refresh watched directory");
                    }
                }
            }
            deliveries(root, cx.emitted)
        };

        for (listener, event) in deliveries {
            listener(&event);
        }
    }
}

fn ensure_backend(shared: &Arc<Shared>, state: &mut TreeState) -> Result<(), WatchError> {
    if state.os.is_some() {
        return Ok(());
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        // The receiver only goes away when the tree is being torn down.
        let _ = tx.send(result);
    })?;

    let weak = Arc::downgrade(shared);
    std::thread::Builder::new()
        .name("td-watcher".to_owned())
        .spawn(move || dispatch(rx, &weak))
        .map_err(WatchError::Dispatcher)?;

    state.os = Some(watcher);
    debug!("Started OS watcher");
    Ok(())
}

fn dispatch(mut rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>, shared: &Weak<Shared>) {
    while let Some(result) = rx.blocking_recv() {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match result {
            Ok(event) => shared.handle_event(event),
            Err(err) => warn!(error = %err, "Watcher backend reported an error"),
        }
    }
    trace!("Watcher dispatcher stopped");
}

struct Registration {
    id: u64,
    listener: Listener,
    filter: Option<String>,
    recursive: bool,
}

impl Registration {
    fn matches(&self, filename: &str) -> bool {
        self.filter.as_deref().is_none_or(|name| name == filename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryStat {
    is_dir: bool,
    len: u64,
    modified: Option<SystemTime>,
}

impl EntryStat {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        Self {
            is_dir: meta.is_dir(),
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

struct Cx<'a> {
    os: &'a mut Option<RecommendedWatcher>,
    emitted: Vec<WatchEvent>,
}

impl<'a> Cx<'a> {
    fn new(os: &'a mut Option<RecommendedWatcher>) -> Self {
        Self {
            os,
            emitted: Vec::new(),
        }
    }

    fn emit(&mut self, dir: &Utf8Path, kind: WatchEventKind, filename: &str) {
        self.emitted.push(WatchEvent::new(kind, dir.to_owned(), filename));
    }
}

#[derive(Default)]
struct Node {
    path: Utf8PathBuf,
    armed: bool,
    entries: FxHashMap<String, EntryStat>,
    listeners: Vec<Registration>,
    children: FxHashMap<String, Node>,
    recursive_refs: usize,
}

impl Node {
    fn new(path: Utf8PathBuf, recursive_refs: usize) -> Self {
        Self {
            path,
            recursive_refs,
            ..Self::default()
        }
    }

    /// (Re)establishes the OS watch and child snapshot. With `is_add`, every
    /// existing entry is reported as added and registered children are
    /// re-initialized the same way.
    fn init(&mut self, is_add: bool, cx: &mut Cx<'_>) -> Result<(), WatchError> {
        if !stat(&self.path)?.is_some_and(|s| s.is_dir) {
            self.reset(cx);
            return Ok(());
        }
        if !self.arm(cx)? {
            self.reset(cx);
            return Ok(());
        }
        let Some(entries) = read_entries(&self.path)? else {
            self.reset(cx);
            return Ok(());
        };
        self.entries = entries;
        trace!(path = %self.path, entries = self.entries.len(), "Armed watch node");

        if is_add {
            let mut names: Vec<&String> = self.entries.keys().collect();
            names.sort();
            for name in names {
                cx.emit(&self.path, WatchEventKind::Add, name);
            }
            for child in self.children.values_mut() {
                child.init(true, cx)?;
            }
        }
        self.expand(is_add, cx)
    }

    /// Creates nodes for subdirectories not yet in the tree when covered by
    /// a recursive listener.
    fn expand(&mut self, is_add: bool, cx: &mut Cx<'_>) -> Result<(), WatchError> {
        if self.recursive_refs == 0 {
            return Ok(());
        }
        let mut dirs: Vec<String> = self
            .entries
            .iter()
            .filter(|(name, stat)| stat.is_dir && !self.children.contains_key(*name))
            .map(|(name, _)| name.clone())
            .collect();
        dirs.sort();

        for name in dirs {
            let mut child = Node::new(self.path.join(&name), self.recursive_refs);
            child.init(is_add, cx)?;
            self.children.insert(name, child);
        }
        Ok(())
    }

    fn expand_tree(&mut self, cx: &mut Cx<'_>) -> Result<(), WatchError> {
        for child in self.children.values_mut() {
            child.expand_tree(cx)?;
        }
        self.expand(false, cx)
    }

    fn add_recursive_ref(&mut self) {
        self.recursive_refs += 1;
        for child in self.children.values_mut() {
            child.add_recursive_ref();
        }
    }

    fn release_recursive_ref(&mut self, cx: &mut Cx<'_>) {
        self.recursive_refs = self.recursive_refs.saturating_sub(1);
        for child in self.children.values_mut() {
            child.release_recursive_ref(cx);
        }
        self.children.retain(|_, child| {
            if child.is_prunable() {
                child.close(cx);
                false
            } else {
                true
            }
        });
    }

    fn on_change(
        &mut self,
        filename: &str,
        content_modified: bool,
        cx: &mut Cx<'_>,
    ) -> Result<(), WatchError> {
        // Some platforms report spurious self-deletes; trust the filesystem.
        if !stat(&self.path)?.is_some_and(|s| s.is_dir) {
            if self.armed || !self.entries.is_empty() {
                self.deleted(cx);
            }
            return Ok(());
        }
        if !self.armed {
            return self.init(true, cx);
        }

        let previous = self.entries.get(filename).copied();
        let current = stat(&self.path.join(filename))?;
        let kind = match (previous, current) {
            (None, Some(_)) => WatchEventKind::Add,
            (Some(before), Some(after)) if before != after || content_modified => {
                WatchEventKind::Change
            }
            (Some(_), None) => WatchEventKind::Delete,
            _ => return Ok(()),
        };
        match current {
            Some(stat) => {
                self.entries.insert(filename.to_owned(), stat);
            }
            None => {
                self.entries.remove(filename);
            }
        }
        cx.emit(&self.path, kind, filename);

        let is_dir = current.is_some_and(|s| s.is_dir);
        let mut prune = false;
        if let Some(child) = self.children.get_mut(filename) {
            if is_dir {
                if !child.armed {
                    child.init(true, cx)?;
                }
            } else {
                if child.armed || !child.entries.is_empty() {
                    child.deleted(cx);
                }
                prune = !child.is_needed();
            }
        } else if is_dir && kind == WatchEventKind::Add {
            self.expand(true, cx)?;
        }

        if prune {
            if let Some(mut child) = self.children.remove(filename) {
                child.close(cx);
            }
        }
        Ok(())
    }

    /// Reports every known entry as deleted and drops the OS watch.
    fn deleted(&mut self, cx: &mut Cx<'_>) {
        self.disarm(cx);
        for child in self.children.values_mut() {
            child.deleted(cx);
        }
        self.children.retain(|_, child| {
            if child.is_needed() {
                true
            } else {
                child.close(cx);
                false
            }
        });

        let mut names: Vec<String> = self.entries.drain().map(|(name, _)| name).collect();
        names.sort();
        for name in names {
            cx.emit(&self.path, WatchEventKind::Delete, &name);
        }
    }

    fn reset(&mut self, cx: &mut Cx<'_>) {
        self.disarm(cx);
        self.entries.clear();
    }

    fn arm(&mut self, cx: &mut Cx<'_>) -> Result<bool, WatchError> {
        if self.armed {
            return Ok(true);
        }
        if let Some(os) = cx.os.as_mut() {
            match os.watch(self.path.as_std_path(), RecursiveMode::NonRecursive) {
                Ok(()) => {}
                Err(err) if is_missing_notify(&err) => return Ok(false),
                Err(err) => return Err(err.into()),
            }
        }
        self.armed = true;
        Ok(true)
    }

    fn disarm(&mut self, cx: &mut Cx<'_>) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Some(os) = cx.os.as_mut() {
            if let Err(err) = os.unwatch(self.path.as_std_path()) {
                trace!(path = %self.path, error = %err, "OS watch already gone");
            }
        }
    }

    fn close(&mut self, cx: &mut Cx<'_>) {
        self.disarm(cx);
        for child in self.children.values_mut() {
            child.close(cx);
        }
        self.children.clear();
        self.listeners.clear();
        self.entries.clear();
    }

    fn is_prunable(&self) -> bool {
        self.listeners.is_empty() && self.children.is_empty() && self.recursive_refs == 0
    }

    fn is_needed(&self) -> bool {
        !self.listeners.is_empty() || self.children.values().any(Node::is_needed)
    }

    fn descendants(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.descendants())
            .sum()
    }
}

fn register(
    root: &mut Node,
    segments: &[String],
    registration: Registration,
    cx: &mut Cx<'_>,
) -> Result<(), WatchError> {
    let mut node = root;
    for segment in segments {
        let inherited = node.recursive_refs;
        let path = node.path.join(segment);
        node = match node.children.entry(segment.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let child = entry.insert(Node::new(path, inherited));
                child.init(false, cx)?;
                child
            }
        };
    }

    let recursive = registration.recursive;
    if recursive {
        node.add_recursive_ref();
    }
    node.listeners.push(registration);
    if recursive {
        node.expand_tree(cx)?;
    }
    Ok(())
}

/// Removes registration `id` below `node`, pruning emptied nodes on the way
/// back up. Returns `true` if the registration was found.
fn detach(node: &mut Node, segments: &[String], id: u64, cx: &mut Cx<'_>) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        let Some(index) = node.listeners.iter().position(|r| r.id == id) else {
            return false;
        };
        let registration = node.listeners.remove(index);
        if registration.recursive {
            node.release_recursive_ref(cx);
        }
        return true;
    };

    let (found, prune) = match node.children.get_mut(segment.as_str()) {
        Some(child) => {
            let found = detach(child, rest, id, cx);
            (found, child.is_prunable())
        }
        None => return false,
    };
    if prune {
        if let Some(mut child) = node.children.remove(segment.as_str()) {
            child.close(cx);
        }
    }
    found
}

fn find<'n>(root: &'n Node, segments: &[String]) -> Option<&'n Node> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.children.get(segment.as_str()))
}

fn find_mut<'n>(root: &'n mut Node, segments: &[String]) -> Option<&'n mut Node> {
    let mut node = root;
    for segment in segments {
        node = node.children.get_mut(segment.as_str())?;
    }
    Some(node)
}

/// Pairs each emitted event with the listeners that should see it: every
/// matching listener on the event's directory plus recursive listeners on
/// its ancestors.
fn deliveries(root: &Node, events: Vec<WatchEvent>) -> Vec<(Listener, WatchEvent)> {
    let mut out = Vec::new();
    for event in events {
        let mut listeners: SmallVec<[Listener; 4]> = SmallVec::new();
        let mut node = Some(root);
        for segment in &segments(&event.dir) {
            let Some(current) = node else {
                break;
            };
            listeners.extend(
                current
                    .listeners
                    .iter()
                    .filter(|r| r.recursive)
                    .map(|r| Arc::clone(&r.listener)),
            );
            node = current.children.get(segment.as_str());
        }
        if let Some(target) = node {
            listeners.extend(
                target
                    .listeners
                    .iter()
                    .filter(|r| r.matches(&event.filename))
                    .map(|r| Arc::clone(&r.listener)),
            );
        }
        out.extend(listeners.into_iter().map(|listener| (listener, event.clone())));
    }
    out
}

/// Splits an absolute path into tree segments. The first segment is the
/// filesystem root (including any drive prefix).
fn segments(path: &Utf8Path) -> Segments {
    let mut out = Segments::new();
    for component in path.components() {
        match component {
            Utf8Component::Prefix(prefix) => out.push(prefix.as_str().to_owned()),
            Utf8Component::RootDir => {
                if out.len() == 1 {
                    out[0].push(std::path::MAIN_SEPARATOR);
                } else {
                    out.push(std::path::MAIN_SEPARATOR.to_string());
                }
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if out.len() > 1 {
                    out.pop();
                }
            }
            Utf8Component::Normal(name) => out.push(name.to_owned()),
        }
    }
    out
}

fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, WatchError> {
    let absolute = std::path::absolute(path).map_err(|err| WatchError::io(path, err))?;
    Utf8PathBuf::from_path_buf(absolute).map_err(WatchError::non_utf8_path)
}

fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

fn is_missing_notify(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => is_missing(io),
        _ => false,
    }
}

fn stat(path: &Utf8Path) -> Result<Option<EntryStat>, WatchError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(EntryStat::from_metadata(&meta))),
        Err(err) if is_missing(&err) => Ok(None),
        Err(err) => Err(WatchError::io(path, err)),
    }
}

fn read_entries(dir: &Utf8Path) -> Result<Option<FxHashMap<String, EntryStat>>, WatchError> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(err) if is_missing(&err) => return Ok(None),
        Err(err) => return Err(WatchError::io(dir, err)),
    };

    let mut entries = FxHashMap::default();
    for entry in read {
        let entry = entry.map_err(|err| WatchError::io(dir, err))?;
        let Ok(name) = entry.file_name().into_string() else {
            debug!(dir = %dir, "Skipping non-UTF-8 entry");
            continue;
        };
        // Follows symlinks so linked directories count as directories.
        if let Some(stat) = stat(&dir.join(&name))? {
            entries.insert(name, stat);
        }
    }
    Ok(Some(entries))
}
