//! Depth-bounded directory search driven by the predicate.
//!
//! A search starts at one search path and runs depth-first over an explicit
//! stack of frames, so deep trees never grow the call stack and the
//! cancellation token is checked between every directory visit.
//!
//! ```text
//! visit(dir) ─► cached? ──yes──────────────────────────► outcome
//!                 │ no
//!                 ▼
//!            predicate(dir) ─► truthy ───────────────────► hit
//!                 │ falsy
//!                 ▼
//!            depth left? ──no──────────────────────────► miss
//!                 │ yes
//!                 ▼
//!            push frame(subdirs, sorted) ─► visit each ─► combine
//! ```
//!
//! Every finished directory, hit or miss, is written to the cache so a later
//! unforced search can reuse it. Frames abandoned by cancellation are not.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::cache::{CacheEntry, ResultCache};
use crate::check::{DirCheck, is_truthy};
use crate::error::DetectError;

/// One search over a single search path.
pub(crate) struct Walk<'a> {
    pub(crate) check: &'a dyn DirCheck,
    pub(crate) cache: &'a ResultCache,
    pub(crate) id: &'a str,
    pub(crate) depth: u32,
    pub(crate) multiple: bool,
    pub(crate) force: bool,
    pub(crate) cancel: &'a CancellationToken,
}

/// A directory whose subdirectories are still being searched.
struct Frame {
    dir: Utf8PathBuf,
    depth: u32,
    /// Remaining subdirectories, last one visited first.
    pending: Vec<Utf8PathBuf>,
    values: Vec<Value>,
    matched: Vec<Utf8PathBuf>,
}

impl Frame {
    fn is_done(&self, multiple: bool) -> bool {
        self.pending.is_empty() || (!multiple && !self.values.is_empty())
    }

    fn absorb(&mut self, entry: CacheEntry, multiple: bool) {
        if let Some(value) = entry.value {
            push_value(&mut self.values, value, multiple);
        }
        self.matched.extend(entry.matched);
    }

    fn finish(mut self, multiple: bool) -> (Utf8PathBuf, CacheEntry) {
        let value = if self.values.is_empty() {
            None
        } else if multiple {
            Some(Value::Array(self.values))
        } else {
            Some(self.values.swap_remove(0))
        };
        (
            self.dir,
            CacheEntry {
                value,
                matched: self.matched,
            },
        )
    }
}

enum Visit {
    Done(CacheEntry),
    Descend(Frame),
}

/// Adds `value` to `values`, spreading arrays in multiple mode.
pub(crate) fn push_value(values: &mut Vec<Value>, value: Value, multiple: bool) {
    match value {
        Value::Array(items) if multiple => values.extend(items),
        value => values.push(value),
    }
}

impl Walk<'_> {
    /// Searches `root` and returns what was found below it.
    pub(crate) async fn run(&self, root: &Utf8Path) -> Result<CacheEntry, DetectError> {
        let mut stack = match self.visit(root, self.depth).await? {
            Visit::Done(entry) => return Ok(entry),
            Visit::Descend(frame) => vec![frame],
        };

        loop {
            if self.cancel.is_cancelled() {
                return Err(DetectError::Cancelled);
            }

            let Some(top) = stack.last_mut() else {
                return Ok(CacheEntry::miss());
            };

            if top.is_done(self.multiple) {
                let Some(frame) = stack.pop() else {
                    return Ok(CacheEntry::miss());
                };
                let (dir, entry) = frame.finish(self.multiple);
                self.cache.insert(self.id, &dir, entry.clone());
                match stack.last_mut() {
                    Some(parent) => parent.absorb(entry, self.multiple),
                    None => return Ok(entry),
                }
                continue;
            }

            let depth = top.depth.saturating_sub(1);
            let Some(child) = top.pending.pop() else {
                continue;
            };
            match self.visit(&child, depth).await? {
                Visit::Done(entry) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.absorb(entry, self.multiple);
                    }
                }
                Visit::Descend(frame) => stack.push(frame),
            }
        }
    }

    async fn visit(&self, dir: &Utf8Path, depth: u32) -> Result<Visit, DetectError> {
        let cached = if self.force {
            None
        } else {
            self.cache.get(self.id, dir)
        };
        if let Some(entry) = cached {
            trace!(dir = %dir, hit = entry.is_hit(), "Using cached outcome");
            return Ok(Visit::Done(entry));
        }

        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(Visit::Done(self.record(dir, CacheEntry::miss()))),
            Err(err) if is_absent(&err) => {
                trace!(dir = %dir, "Search path does not exist");
                return Ok(Visit::Done(self.record(dir, CacheEntry::miss())));
            }
            Err(err) => return Err(DetectError::io(dir, err)),
        }

        let value = self
            .check
            .check(dir)
            .await
            .map_err(|err| DetectError::predicate("checkDir", err))?;
        if is_truthy(value.as_ref()) {
            trace!(dir = %dir, "Predicate matched");
            let entry = value.map_or_else(CacheEntry::miss, |v| CacheEntry::hit(dir, v));
            return Ok(Visit::Done(self.record(dir, entry)));
        }

        if depth == 0 {
            return Ok(Visit::Done(self.record(dir, CacheEntry::miss())));
        }

        let mut pending = subdirectories(dir).await?;
        if pending.is_empty() {
            return Ok(Visit::Done(self.record(dir, CacheEntry::miss())));
        }
        pending.reverse();
        Ok(Visit::Descend(Frame {
            dir: dir.to_owned(),
            depth,
            pending,
            values: Vec::new(),
            matched: Vec::new(),
        }))
    }

    fn record(&self, dir: &Utf8Path, entry: CacheEntry) -> CacheEntry {
        self.cache.insert(self.id, dir, entry.clone());
        entry
    }
}

fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Lists the directories directly inside `dir`, following symlinks, in name
/// order. Entries with non-UTF-8 names are skipped.
async fn subdirectories(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, DetectError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if is_absent(&err) => return Ok(Vec::new()),
        Err(err) => return Err(DetectError::io(dir, err)),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| DetectError::io(dir, err))?
    {
        let Ok(name) = entry.file_name().into_string() else {
            trace!(dir = %dir, "Skipping non-UTF-8 entry");
            continue;
        };
        let path = dir.join(name);
        // `metadata` follows symlinks, so linked directories are searched too.
        if tokio::fs::metadata(&path).await.is_ok_and(|meta| meta.is_dir()) {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
