//! End-to-end behavior of `DetectEngine` against real directories.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use td_core::{EnvToggles, Hive};
use td_detect::{
    DetectEngine, DetectError, DetectEvent, DetectOptions, Detected, DirCheck, EngineOptions,
    Handle, NoRegistry, RegistryBackend, RegistryKeys, RegistryLookup, ScanRequest, SearchPath,
    SyncCheck,
};
use tokio::sync::Notify;

const TIMEOUT: Duration = Duration::from_secs(10);

fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
    (dir, path)
}

/// Options that ignore the process environment, `PATH` and the registry.
fn isolated(options: EngineOptions) -> EngineOptions {
    options
        .with_env_lookup(|_| None)
        .with_toggles(EnvToggles::default())
        .with_registry_backend(Arc::new(NoRegistry))
        .with_debounce(Duration::from_millis(50))
}

/// Turns `{ id, value }` results (or a list of them) into an `id -> value`
/// object.
fn keyed(results: &Value) -> Value {
    let mut out = Map::new();
    let items = match results {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    };
    for item in items {
        if let (Some(id), Some(value)) = (item["id"].as_str(), item.get("value")) {
            out.insert(id.to_owned(), value.clone());
        }
    }
    Value::Object(out)
}

fn keyed_engine(options: EngineOptions) -> DetectEngine {
    DetectEngine::new(
        isolated(options).with_process_results(|results, _, _| Ok(Some(keyed(&results)))),
    )
    .unwrap()
}

/// A predicate whose answer for one directory can be changed, counting calls.
#[derive(Clone)]
struct Marker {
    target: Utf8PathBuf,
    answer: Arc<Mutex<Value>>,
    calls: Arc<AtomicUsize>,
}

impl Marker {
    fn new(target: &Utf8Path, answer: Value) -> Self {
        Self {
            target: target.to_owned(),
            answer: Arc::new(Mutex::new(answer)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DirCheck for Marker {
    fn check<'a>(&'a self, dir: &'a Utf8Path) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = (dir == self.target).then(|| self.answer.lock().clone());
        future::ready(Ok(answer)).boxed()
    }
}

/// Reads events until the live results satisfy `done`.
async fn wait_for(handle: &mut Handle, live: &Detected, done: impl Fn(&Value) -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !done(&live.value()) {
            let event = tokio::time::timeout(Duration::from_millis(50), handle.recv()).await;
            if let Ok(Some(DetectEvent::Error(err))) = event {
                unreachable!("detection failed: {err}");
            }
        }
    })
    .await
    .unwrap();
}

/// Blocks its first predicate call until released.
#[derive(Clone)]
struct Gate {
    calls: Arc<AtomicUsize>,
    release: Arc<Notify>,
}

impl DirCheck for Gate {
    fn check<'a>(&'a self, _dir: &'a Utf8Path) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
        async move {
            if first {
                self.release.notified().await;
            }
            Ok(Some(json!("hit")))
        }
        .boxed()
    }
}

/// A registry that always answers; lookups come from `RegistryKeys::dynamic`.
struct OpenRegistry;

impl RegistryBackend for OpenRegistry {
    fn is_supported(&self) -> bool {
        true
    }

    fn query<'a>(
        &'a self,
        _hive: Hive,
        _key: &'a str,
        _name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DetectError>> {
        future::ready(Ok(None)).boxed()
    }

    fn list_keys<'a>(
        &'a self,
        _hive: Hive,
        _key: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, DetectError>> {
        future::ready(Ok(Vec::new())).boxed()
    }
}

#[test]
fn test_malformed_options_rejected_at_construction() {
    let check = || SyncCheck::new(|_: &Utf8Path| Ok(None));
    for options in [
        EngineOptions::new(check()).with_exe(""),
        EngineOptions::new(check()).with_env([""]),
        EngineOptions::new(check()).with_path(""),
        EngineOptions::new(check()).with_registry_poll_interval(Duration::ZERO),
    ] {
        let err = DetectEngine::new(options).unwrap_err();
        assert!(matches!(err, DetectError::Config(_)), "unexpected error: {err}");
    }
}

#[tokio::test]
async fn test_cached_and_forced_scans() {
    let (_guard, root) = temp_dir();
    let marker = Marker::new(&root, json!({ "id": "foo", "value": "bar" }));
    let engine = keyed_engine(EngineOptions::new(marker.clone()));
    let paths = vec![root.clone()];

    let first = engine
        .scan(ScanRequest::new("scan", paths.clone()).with_force(true))
        .await
        .unwrap();
    assert_eq!(marker.calls(), 1);
    assert_eq!(first.found, vec![root.clone()]);
    let container = engine.process_results(first.results.clone(), "first").unwrap();
    assert_eq!(container.snapshot(), json!({ "foo": "bar" }));

    let cached = engine.scan(ScanRequest::new("scan", paths.clone())).await.unwrap();
    assert_eq!(marker.calls(), 1);
    assert_eq!(cached.results, first.results);

    *marker.answer.lock() = json!({ "id": "baz", "value": "wiz" });
    let forced = engine
        .scan(ScanRequest::new("scan", paths).with_force(true))
        .await
        .unwrap();
    assert_eq!(marker.calls(), 2);
    let container = engine.process_results(forced.results, "forced").unwrap();
    assert_eq!(container.snapshot(), json!({ "baz": "wiz" }));
}

#[tokio::test]
async fn test_missing_path_yields_empty() {
    let (_guard, root) = temp_dir();
    let marker = Marker::new(&root, json!({ "id": "foo", "value": "bar" }));
    let engine = keyed_engine(EngineOptions::new(marker.clone()).with_depth(2));

    let outcome = engine
        .scan(ScanRequest::new("scan", vec![root.join("missing")]))
        .await
        .unwrap();
    assert_eq!(outcome.results, Value::Null);
    assert_eq!(marker.calls(), 0);

    let container = engine.process_results(outcome.results, "scan").unwrap();
    assert_eq!(container.snapshot(), json!({}));
}

#[tokio::test]
async fn test_match_below_search_path() {
    let (_guard, root) = temp_dir();
    let child = root.join("child");
    std::fs::create_dir(&child).unwrap();
    let marker = Marker::new(&child, json!({ "id": "foo", "value": "bar" }));
    let engine = keyed_engine(EngineOptions::new(marker.clone()).with_depth(1));

    let outcome = engine
        .scan(ScanRequest::new("scan", vec![root.clone()]))
        .await
        .unwrap();
    assert_eq!(outcome.results, json!({ "id": "foo", "value": "bar" }));
    assert_eq!(outcome.found, vec![child]);
}

#[tokio::test]
async fn test_multiple_mode_flattens_lists() {
    let (_guard, root) = temp_dir();
    let marker = Marker::new(
        &root,
        json!([{ "id": "foo", "value": "bar" }, { "id": "baz", "value": "wiz" }]),
    );
    let engine =
        DetectEngine::new(isolated(EngineOptions::new(marker.clone()).with_multiple(true)))
            .unwrap();

    let outcome = engine
        .scan(ScanRequest::new("scan", vec![root]))
        .await
        .unwrap();
    assert_eq!(
        outcome.results,
        json!([{ "id": "foo", "value": "bar" }, { "id": "baz", "value": "wiz" }])
    );
    let container = engine.process_results(outcome.results, "scan").unwrap();
    assert!(container.is_list());
    assert_eq!(keyed(&container.snapshot()), json!({ "foo": "bar", "baz": "wiz" }));
}

#[tokio::test]
async fn test_multiple_mode_visits_every_search_path() {
    let (_guard, root) = temp_dir();
    let (a, b) = (root.join("a"), root.join("b"));
    std::fs::create_dir(&a).unwrap();
    std::fs::create_dir(&b).unwrap();
    let check = SyncCheck::new(|dir: &Utf8Path| Ok(Some(json!(dir.file_name()))));

    let single = DetectEngine::new(isolated(EngineOptions::new(check))).unwrap();
    let outcome = single
        .scan(ScanRequest::new("scan", vec![b.clone(), a.clone()]))
        .await
        .unwrap();
    assert_eq!(outcome.results, json!("b"));

    let check = SyncCheck::new(|dir: &Utf8Path| Ok(Some(json!(dir.file_name()))));
    let multiple =
        DetectEngine::new(isolated(EngineOptions::new(check).with_multiple(true))).unwrap();
    let outcome = multiple
        .scan(ScanRequest::new("scan", vec![b, a]))
        .await
        .unwrap();
    assert_eq!(outcome.results, json!(["b", "a"]));
}

#[tokio::test]
async fn test_concurrent_scans_of_one_id_share_the_cache() {
    let (_guard, root) = temp_dir();
    let marker = Marker::new(&root, json!({ "id": "foo", "value": "bar" }));
    let engine = keyed_engine(EngineOptions::new(marker.clone()));
    let request = ScanRequest::new("scan", vec![root]);

    let (a, b, c) = tokio::join!(
        engine.scan(request.clone()),
        engine.scan(request.clone()),
        engine.scan(request)
    );
    assert_eq!(marker.calls(), 1);
    assert_eq!(a.unwrap().results, b.unwrap().results);
    assert!(c.is_ok());
}

#[tokio::test]
async fn test_predicate_failure_is_reported_once() {
    let (_guard, root) = temp_dir();
    let check = SyncCheck::new(|_: &Utf8Path| Err(anyhow::anyhow!("check crashed")));
    let engine = DetectEngine::new(isolated(EngineOptions::new(check).with_path(root))).unwrap();

    let mut handle = engine.detect(DetectOptions::default());
    let event = tokio::time::timeout(TIMEOUT, handle.recv()).await.unwrap();
    assert!(
        matches!(&event, Some(DetectEvent::Error(err)) if err.to_string().contains("check crashed")),
        "unexpected event: {event:?}"
    );
    assert!(handle.recv().await.is_none());
    assert!(handle.is_stopped());
}

#[tokio::test]
async fn test_detect_emits_results_then_ends() {
    let (_guard, root) = temp_dir();
    let marker = Marker::new(&root, json!({ "id": "foo", "value": "bar" }));
    let engine = keyed_engine(EngineOptions::new(marker.clone()).with_path(root.clone()));

    let mut handle = engine.detect(DetectOptions::default());
    let event = tokio::time::timeout(TIMEOUT, handle.recv()).await.unwrap();
    let Some(DetectEvent::Results(results)) = event else {
        unreachable!("expected results, got {event:?}");
    };
    assert_eq!(results.value(), json!({ "foo": "bar" }));
    assert!(handle.recv().await.is_none());

    // Same paths, same identity: the second call is served from the cache.
    let again = engine.detect_once(DetectOptions::default()).await.unwrap();
    assert_eq!(again.value(), json!({ "foo": "bar" }));
    assert_eq!(marker.calls(), 1);
}

#[tokio::test]
async fn test_invalid_call_paths_reported_as_error() {
    let check = SyncCheck::new(|_: &Utf8Path| Ok(None));
    let engine = DetectEngine::new(isolated(EngineOptions::new(check))).unwrap();

    let mut handle = engine.detect(DetectOptions {
        paths: vec![SearchPath::from("")],
        ..DetectOptions::default()
    });
    let event = tokio::time::timeout(TIMEOUT, handle.recv()).await.unwrap();
    assert!(
        matches!(&event, Some(DetectEvent::Error(err)) if matches!(**err, DetectError::InvalidOption { .. })),
        "unexpected event: {event:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_reports_new_installation() {
    let (_guard, root) = temp_dir();
    let check = SyncCheck::new(|dir: &Utf8Path| {
        Ok(dir
            .join("marker")
            .exists()
            .then(|| json!({ "id": "sdk", "value": dir.as_str() })))
    });
    let engine = keyed_engine(EngineOptions::new(check).with_path(root.clone()));

    let mut handle = engine.detect(DetectOptions {
        live: true,
        ..DetectOptions::watching()
    });
    let first = tokio::time::timeout(TIMEOUT, handle.recv()).await.unwrap();
    let Some(DetectEvent::Results(results)) = first else {
        unreachable!("expected results, got {first:?}");
    };
    assert_eq!(results.value(), json!({}));
    let ready = tokio::time::timeout(TIMEOUT, handle.recv()).await.unwrap();
    assert!(matches!(ready, Some(DetectEvent::Ready)));
    assert!(engine.watcher().is_watching(&root));

    std::fs::write(root.join("marker"), "").unwrap();
    let update = tokio::time::timeout(TIMEOUT, handle.recv()).await.unwrap();
    assert!(matches!(update, Some(DetectEvent::Results(_))));
    assert_eq!(results.value(), json!({ "sdk": root.as_str() }));

    handle.stop();
    assert!(!engine.watcher().is_watching(&root));
    while handle.recv().await.is_some() {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forced_scan_does_not_wait_for_unforced() {
    let (_guard, root) = temp_dir();
    let gate = Gate {
        calls: Arc::new(AtomicUsize::new(0)),
        release: Arc::new(Notify::new()),
    };
    let engine = DetectEngine::new(isolated(EngineOptions::new(gate.clone()))).unwrap();
    let request = ScanRequest::new("scan", vec![root]);

    let slow = engine.scan(request.clone());
    tokio::pin!(slow);
    tokio::time::timeout(TIMEOUT, async {
        while gate.calls.load(Ordering::SeqCst) == 0 {
            let _ = tokio::time::timeout(Duration::from_millis(10), &mut slow).await;
        }
    })
    .await
    .unwrap();

    // The unforced scan now holds the id's lock inside the predicate.
    let forced = tokio::time::timeout(TIMEOUT, engine.scan(request.with_force(true)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forced.results, json!("hit"));

    gate.release.notify_one();
    let unforced = tokio::time::timeout(TIMEOUT, slow).await.unwrap().unwrap();
    assert_eq!(unforced.results, json!("hit"));
    assert_eq!(gate.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_only_paths_limits_forcing() {
    let (_guard, root) = temp_dir();
    let (a, b) = (root.join("a"), root.join("b"));
    std::fs::create_dir(&a).unwrap();
    std::fs::create_dir(&b).unwrap();
    let visited = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&visited);
    let check = SyncCheck::new(move |dir: &Utf8Path| {
        log.lock().push(dir.to_owned());
        Ok(Some(json!(dir.file_name())))
    });
    let engine =
        DetectEngine::new(isolated(EngineOptions::new(check).with_multiple(true))).unwrap();
    let paths = vec![a.clone(), b.clone()];

    engine.scan(ScanRequest::new("scan", paths.clone())).await.unwrap();
    let outcome = engine
        .scan(
            ScanRequest::new("scan", paths)
                .with_force(true)
                .with_only_paths(vec![a.clone()]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.results, json!(["a", "b"]));
    assert_eq!(*visited.lock(), vec![a.clone(), b, a]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_redetect_sees_changes_inside_match() {
    let (_guard, root) = temp_dir();
    let sdk = root.join("sdk");
    std::fs::create_dir_all(sdk.join("lib")).unwrap();
    std::fs::write(sdk.join("marker"), "").unwrap();
    std::fs::write(sdk.join("lib").join("version"), "1").unwrap();

    let check = SyncCheck::new(|dir: &Utf8Path| {
        if !dir.join("marker").exists() {
            return Ok(None);
        }
        let version = std::fs::read_to_string(dir.join("lib").join("version"))?;
        Ok(Some(json!({ "id": "sdk", "value": version.trim() })))
    });
    let engine = keyed_engine(EngineOptions::new(check).with_path(root.clone()).with_depth(1));

    let mut handle = engine.detect(DetectOptions {
        live: true,
        redetect: true,
        ..DetectOptions::watching()
    });
    let first = tokio::time::timeout(TIMEOUT, handle.recv()).await.unwrap();
    let Some(DetectEvent::Results(results)) = first else {
        unreachable!("expected results, got {first:?}");
    };
    assert_eq!(results.value(), json!({ "sdk": "1" }));
    let ready = tokio::time::timeout(TIMEOUT, handle.recv()).await.unwrap();
    assert!(matches!(ready, Some(DetectEvent::Ready)));
    assert!(engine.watcher().is_watching(&sdk));

    // Two levels below the search path: only the recursive watch sees it.
    std::fs::write(sdk.join("lib").join("version"), "2").unwrap();
    wait_for(&mut handle, &results, |value| value == &json!({ "sdk": "2" })).await;
    handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registry_poll_reacts_to_changes() {
    let (_guard, root) = temp_dir();
    let (a, b) = (root.join("a"), root.join("b"));
    std::fs::create_dir(&a).unwrap();
    std::fs::create_dir(&b).unwrap();

    let lookup = Arc::new(Mutex::new(RegistryLookup {
        default_path: None,
        paths: vec![a.clone()],
    }));
    let source = Arc::clone(&lookup);
    let keys = RegistryKeys::dynamic(move |_| {
        let current = source.lock().clone();
        async move { Ok(current) }
    });
    let check = SyncCheck::new(|dir: &Utf8Path| {
        Ok(Some(json!({ "id": dir.file_name(), "value": dir.as_str() })))
    });
    let options = isolated(EngineOptions::new(check))
        .with_registry_backend(Arc::new(OpenRegistry))
        .with_registry_keys(keys)
        .with_registry_poll_interval(Duration::from_millis(50))
        .with_process_results(|results, _, cx| {
            Ok(Some(json!({
                "found": keyed(&results),
                "default": cx.default_path.as_ref().map(|path| path.as_str()),
            })))
        });
    let engine = DetectEngine::new(options).unwrap();

    let mut handle = engine.detect(DetectOptions {
        live: true,
        ..DetectOptions::watching()
    });
    let first = tokio::time::timeout(TIMEOUT, handle.recv()).await.unwrap();
    let Some(DetectEvent::Results(results)) = first else {
        unreachable!("expected results, got {first:?}");
    };
    assert_eq!(
        results.value(),
        json!({ "found": { "a": a.as_str() }, "default": null })
    );

    // Same paths, new default: the hook runs again without a rescan.
    lookup.lock().default_path = Some(a.clone());
    wait_for(&mut handle, &results, |value| value["default"] == json!(a.as_str())).await;

    // New path set: a full rescan picks up `b`.
    lookup.lock().paths = vec![b.clone()];
    wait_for(&mut handle, &results, |value| value["found"]["b"] == json!(b.as_str())).await;

    // Nothing changes any more, so several polls emit nothing.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(handle.try_recv().is_none());
    handle.stop();
}
