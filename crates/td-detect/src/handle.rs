//! Per-call event stream and watcher lifetime owner.
//!
//! Every [`DetectEngine::detect`](crate::DetectEngine::detect) call returns
//! a [`Handle`]. Events are buffered, so nothing is lost between the call
//! returning and the caller starting to read.
//!
//! ```text
//! Created ──► Results* ──► Ready? ──► Results* ──► (stop | Error)
//! ```
//!
//! `Ready` is only sent in watch mode, once, after the first results. The
//! stream ends after [`Handle::stop`] or after a single `Error`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;
use parking_lot::Mutex;
use serde_json::Value;
use td_watcher::{Debouncer, Unwatch};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::DetectError;
use crate::reactive::ReactiveValue;

/// Results as delivered to the caller.
#[derive(Debug, Clone)]
pub enum Detected {
    /// A copy taken when the event was sent.
    Snapshot(Value),
    /// The live container; later merges show through it.
    Live(ReactiveValue),
}

impl Detected {
    /// Returns the current value.
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::Snapshot(value) => value.clone(),
            Self::Live(container) => container.snapshot(),
        }
    }

    pub(crate) fn from_container(container: &ReactiveValue, live: bool) -> Self {
        if live {
            Self::Live(container.clone())
        } else {
            Self::Snapshot(container.snapshot())
        }
    }
}

/// An event on a [`Handle`].
#[derive(Debug, Clone)]
pub enum DetectEvent {
    /// New or updated results.
    Results(Detected),
    /// Watch mode: the first pass finished and watches are in place.
    Ready,
    /// Detection failed; no further events follow.
    Error(Arc<DetectError>),
}

/// The receiving end of one `detect()` call.
///
/// Dropping the handle stops it.
#[derive(Debug)]
pub struct Handle {
    rx: mpsc::UnboundedReceiver<DetectEvent>,
    ctx: Arc<HandleContext>,
}

impl Handle {
    pub(crate) fn new() -> (Self, Arc<HandleContext>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(HandleContext {
            tx: Mutex::new(Some(tx)),
            token: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            watches: Mutex::new(Vec::new()),
            debouncer: Mutex::new(None),
        });
        (
            Self {
                rx,
                ctx: Arc::clone(&ctx),
            },
            ctx,
        )
    }

    /// Waits for the next event. Returns `None` once the handle has stopped
    /// and every buffered event has been read.
    pub async fn recv(&mut self) -> Option<DetectEvent> {
        self.rx.recv().await
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<DetectEvent> {
        self.rx.try_recv().ok()
    }

    /// Stops watching and ends the event stream. Idempotent.
    ///
    /// Events already buffered can still be read.
    pub fn stop(&self) {
        self.ctx.stop();
    }

    /// Returns `true` once stopped or failed.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.ctx.is_stopped()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.ctx.stop();
    }
}

/// State shared between a [`Handle`] and the tasks working for it.
#[derive(Debug)]
pub(crate) struct HandleContext {
    tx: Mutex<Option<mpsc::UnboundedSender<DetectEvent>>>,
    token: CancellationToken,
    stopped: AtomicBool,
    watches: Mutex<Vec<Unwatch>>,
    debouncer: Mutex<Option<Debouncer<Utf8PathBuf>>>,
}

impl HandleContext {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Sends `event` unless the handle has stopped.
    pub(crate) fn emit(&self, event: DetectEvent) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Sends the terminal error event and stops. Does nothing once stopped.
    pub(crate) fn fail(&self, err: DetectError) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!(error = %err, "Dropping error for stopped handle");
            return;
        }
        debug!(error = %err, "Detection failed");
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(DetectEvent::Error(Arc::new(err)));
        }
        self.teardown();
    }

    pub(crate) fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Stopping detection handle");
        self.teardown();
    }

    /// Registers watches to be removed when the handle stops. If it already
    /// has, they are removed right away.
    pub(crate) fn add_watches(&self, watches: impl IntoIterator<Item = Unwatch>) {
        let mut held = self.watches.lock();
        held.extend(watches);
        if self.is_stopped() {
            let released: Vec<Unwatch> = held.drain(..).collect();
            drop(held);
            drop(released);
        }
    }

    /// Replaces every registered watch.
    pub(crate) fn replace_watches(&self, watches: Vec<Unwatch>) {
        let previous = std::mem::take(&mut *self.watches.lock());
        drop(previous);
        self.add_watches(watches);
    }

    pub(crate) fn set_debouncer(&self, debouncer: Debouncer<Utf8PathBuf>) {
        if self.is_stopped() {
            debouncer.cancel_all();
            return;
        }
        *self.debouncer.lock() = Some(debouncer);
    }

    fn teardown(&self) {
        self.token.cancel();
        let watches: Vec<Unwatch> = self.watches.lock().drain(..).collect();
        drop(watches);
        if let Some(debouncer) = self.debouncer.lock().take() {
            debouncer.cancel_all();
        }
        // Closing the sender lets `recv` return `None` after the buffer drains.
        self.tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_buffered_until_read() {
        let (mut handle, ctx) = Handle::new();
        assert!(ctx.emit(DetectEvent::Results(Detected::Snapshot(json!({ "a": 1 })))));
        assert!(ctx.emit(DetectEvent::Ready));

        assert!(matches!(handle.recv().await, Some(DetectEvent::Results(_))));
        assert!(matches!(handle.try_recv(), Some(DetectEvent::Ready)));
        assert!(handle.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_stop_ends_stream_and_is_idempotent() {
        let (mut handle, ctx) = Handle::new();
        ctx.emit(DetectEvent::Ready);
        handle.stop();
        handle.stop();

        assert!(handle.is_stopped());
        assert!(ctx.token().is_cancelled());
        assert!(!ctx.emit(DetectEvent::Ready));
        assert!(matches!(handle.recv().await, Some(DetectEvent::Ready)));
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_error_is_terminal_and_single() {
        let (mut handle, ctx) = Handle::new();
        ctx.fail(DetectError::invalid_option("paths", "empty"));
        ctx.fail(DetectError::invalid_option("paths", "again"));
        assert!(!ctx.emit(DetectEvent::Ready));

        let event = handle.recv().await;
        assert!(
            matches!(&event, Some(DetectEvent::Error(err)) if err.to_string().contains("empty")),
            "unexpected event: {event:?}"
        );
        assert!(handle.recv().await.is_none());
    }

    #[test]
    fn test_detected_value() {
        let container = ReactiveValue::from_value(json!({ "foo": "bar" }), false);
        let live = Detected::from_container(&container, true);
        let snapshot = Detected::from_container(&container, false);
        container.merge(json!({ "baz": "wiz" }));

        assert_eq!(live.value(), json!({ "foo": "bar", "baz": "wiz" }));
        assert_eq!(snapshot.value(), json!({ "foo": "bar" }));
    }
}
