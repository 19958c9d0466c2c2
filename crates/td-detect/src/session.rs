//! The work behind one `detect()` call.
//!
//! A one-shot call resolves paths, scans under the path set's identity,
//! emits the results and ends the stream. A watching call instead gets a
//! `Session`: its own random scan id, a filesystem watch per search path
//! (plus, with `redetect`, a recursive watch per matched directory), a
//! debouncer turning bursts of events into one forced rescan of the affected
//! search path, and, where the registry is readable, a poller that notices
//! when the path set itself changes.
//!
//! Rescans merge into the session's container; a task forwarding the
//! container's change notifications turns them into `Results` events.

use std::sync::{Arc, Weak};

use camino::Utf8PathBuf;
use parking_lot::Mutex;
use serde_json::Value;
use td_core::scan_identity;
use td_watcher::{Debouncer, WatchError, WatchOptions};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::engine::{DetectEngine, PathSet, ScanOutcome, ScanRequest};
use crate::error::DetectError;
use crate::handle::{DetectEvent, Detected, HandleContext};
use crate::options::DetectOptions;
use crate::reactive::{ChangeSet, ReactiveValue};
use crate::registry;

/// Runs a `detect()` call to completion or failure.
pub(crate) async fn run(
    engine: DetectEngine,
    ctx: Arc<HandleContext>,
    opts: DetectOptions,
    runtime: tokio::runtime::Handle,
) {
    if let Err(err) = start(engine, Arc::clone(&ctx), opts, runtime).await {
        ctx.fail(err);
    }
}

async fn start(
    engine: DetectEngine,
    ctx: Arc<HandleContext>,
    opts: DetectOptions,
    runtime: tokio::runtime::Handle,
) -> Result<(), DetectError> {
    let set = engine.get_paths(&opts.paths).await?;
    let identity = scan_identity(&set.paths);
    debug!(identity = %identity, paths = set.paths.len(), "Resolved search paths");

    if opts.watch {
        return Session::new(engine, ctx, opts, runtime, set, identity)
            .start()
            .await;
    }

    let request = ScanRequest::new(identity.clone(), set.paths)
        .with_force(opts.force)
        .with_cancel(ctx.token().clone());
    let outcome = engine.scan(request).await?;
    let container = engine.process_results(outcome.results, &identity)?;
    ctx.emit(DetectEvent::Results(Detected::from_container(&container, opts.live)));
    ctx.stop();
    Ok(())
}

struct Session {
    engine: DetectEngine,
    ctx: Arc<HandleContext>,
    opts: DetectOptions,
    id: String,
    debouncer: Debouncer<Utf8PathBuf>,
    /// Keeps rescans of this session from overlapping.
    serial: tokio::sync::Mutex<()>,
    state: Mutex<SessionState>,
}

struct SessionState {
    paths: Vec<Utf8PathBuf>,
    identity: String,
    default_path: Option<Utf8PathBuf>,
    raw: Value,
    found: Vec<Utf8PathBuf>,
}

impl Session {
    fn new(
        engine: DetectEngine,
        ctx: Arc<HandleContext>,
        opts: DetectOptions,
        runtime: tokio::runtime::Handle,
        set: PathSet,
        identity: String,
    ) -> Arc<Self> {
        let window = engine.inner.options.debounce;
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = Weak::clone(weak);
            let debouncer = Debouncer::with_runtime(runtime, window, move |path: Utf8PathBuf| {
                if let Some(session) = weak.upgrade() {
                    tokio::spawn(session.rescan(vec![path]));
                }
            });
            ctx.set_debouncer(debouncer.clone());
            Self {
                engine,
                ctx,
                opts,
                id: Uuid::new_v4().to_string(),
                debouncer,
                serial: tokio::sync::Mutex::new(()),
                state: Mutex::new(SessionState {
                    paths: set.paths,
                    identity,
                    default_path: set.default_path,
                    raw: Value::Null,
                    found: Vec::new(),
                }),
            }
        })
    }

    async fn start(self: Arc<Self>) -> Result<(), DetectError> {
        // Watch first so changes made during the first scan are not missed.
        self.rewire().await?;

        let paths = self.state.lock().paths.clone();
        let request = ScanRequest::new(self.id.clone(), paths)
            .with_force(self.opts.force)
            .with_cancel(self.ctx.token().clone());
        let outcome = self.engine.scan(request).await?;
        let container = self.engine.process_results(outcome.results.clone(), &self.id)?;
        let changes = container.subscribe();
        self.remember(outcome).await?;

        self.ctx
            .emit(DetectEvent::Results(Detected::from_container(&container, self.opts.live)));
        self.ctx.emit(DetectEvent::Ready);
        info!(id = %self.id, "Watching for changes");

        let options = &self.engine.inner.options;
        if options.registry.is_supported() && !options.registry_keys.is_empty() {
            let session = Arc::clone(&self);
            registry::spawn_poller(
                options.registry_poll_interval,
                self.ctx.token().clone(),
                move || Arc::clone(&session).poll(),
            );
        }

        tokio::spawn(self.forward(container, changes));
        Ok(())
    }

    /// Re-emits results whenever the container changes, until stopped.
    async fn forward(
        self: Arc<Self>,
        container: ReactiveValue,
        mut changes: broadcast::Receiver<ChangeSet>,
    ) {
        let token = self.ctx.token().clone();
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(change) => trace!(id = %self.id, paths = ?change.paths, "Results changed"),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(id = %self.id, skipped, "Coalesced lagging change notifications");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
            let results = Detected::from_container(&container, self.opts.live);
            if !self.ctx.emit(DetectEvent::Results(results)) {
                break;
            }
        }
        trace!(id = %self.id, "Stopped forwarding results");
    }

    /// Replaces every watch with one per search path and, with `redetect`,
    /// one per matched directory.
    ///
    /// Arming a watch stats and lists directories (a recursive watch lists
    /// the whole matched tree), so the watches are built on the blocking
    /// pool.
    async fn rewire(&self) -> Result<(), DetectError> {
        let (paths, found) = {
            let state = self.state.lock();
            (state.paths.clone(), state.found.clone())
        };
        let tree = self.engine.watcher().clone();
        let debouncer = self.debouncer.clone();
        let redetect = self.opts.redetect;

        let watches = tokio::task::spawn_blocking(move || {
            let mut watches = Vec::with_capacity(paths.len() + found.len());
            for path in &paths {
                let debouncer = debouncer.clone();
                let key = path.clone();
                watches.push(tree.watch(path, move |event| {
                    trace!(event = %event, "Search path changed");
                    debouncer.trigger(key.clone());
                })?);
            }

            if redetect {
                for dir in &found {
                    let key = paths
                        .iter()
                        .find(|path| dir.starts_with(path))
                        .unwrap_or(dir)
                        .clone();
                    let debouncer = debouncer.clone();
                    watches.push(tree.watch_with(dir, WatchOptions::recursive(), move |event| {
                        trace!(event = %event, "Matched directory changed");
                        debouncer.trigger(key.clone());
                    })?);
                }
            }
            Ok::<_, WatchError>(watches)
        })
        .await??;

        debug!(id = %self.id, watches = watches.len(), "Wired watches");
        self.ctx.replace_watches(watches);
        Ok(())
    }

    async fn remember(&self, outcome: ScanOutcome) -> Result<(), DetectError> {
        let found_changed = {
            let mut state = self.state.lock();
            state.raw = outcome.results;
            let changed = state.found != outcome.found;
            state.found = outcome.found;
            changed
        };
        if found_changed && self.opts.redetect {
            self.rewire().await?;
        }
        Ok(())
    }

    /// Forces a rescan of `only_paths` (every path when empty) and merges
    /// the results.
    async fn rescan(self: Arc<Self>, only_paths: Vec<Utf8PathBuf>) {
        if self.ctx.is_stopped() {
            return;
        }
        let _serial = self.serial.lock().await;
        if let Err(err) = self.rescan_locked(only_paths).await {
            self.ctx.fail(err);
        }
    }

    async fn rescan_locked(&self, only_paths: Vec<Utf8PathBuf>) -> Result<(), DetectError> {
        let paths = self.state.lock().paths.clone();
        debug!(id = %self.id, only = ?only_paths, "Rescanning");
        let request = ScanRequest::new(self.id.clone(), paths)
            .with_force(true)
            .with_only_paths(only_paths)
            .with_cancel(self.ctx.token().clone());
        let outcome = self.engine.scan(request).await?;
        self.engine.process_results(outcome.results.clone(), &self.id)?;
        self.remember(outcome).await
    }

    /// Re-resolves the path set: a different set means a full rescan, a
    /// different default path means the hook runs again on the last raw
    /// results.
    async fn poll(self: Arc<Self>) {
        let set = match self.engine.get_paths(&self.opts.paths).await {
            Ok(set) => set,
            Err(err) => {
                self.ctx.fail(err);
                return;
            }
        };
        let identity = scan_identity(&set.paths);

        let action = {
            let mut state = self.state.lock();
            if identity != state.identity {
                info!(id = %self.id, paths = set.paths.len(), "Search paths changed");
                state.paths = set.paths;
                state.identity = identity;
                state.default_path = set.default_path;
                PollAction::Rescan
            } else if set.default_path != state.default_path {
                debug!(id = %self.id, default_path = ?set.default_path, "Default path changed");
                state.default_path = set.default_path;
                PollAction::Reprocess(state.raw.clone())
            } else {
                PollAction::Unchanged
            }
        };

        match action {
            PollAction::Rescan => {
                if let Err(err) = self.rewire().await {
                    self.ctx.fail(err);
                    return;
                }
                self.rescan(Vec::new()).await;
            }
            PollAction::Reprocess(raw) => {
                let _serial = self.serial.lock().await;
                if let Err(err) = self.engine.process_results(raw, &self.id) {
                    self.ctx.fail(err);
                }
            }
            PollAction::Unchanged => trace!(id = %self.id, "Search paths unchanged"),
        }
    }
}

enum PollAction {
    Rescan,
    Reprocess(Value),
    Unchanged,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.debouncer.cancel_all();
        self.engine.forget(&self.id);
    }
}
