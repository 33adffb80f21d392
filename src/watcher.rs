//! Directory watching for incremental re-runs.
//!
//! The watcher blocks the calling thread. Debounced batches are delivered to
//! the callback on that same thread, so a batch arriving while the callback
//! runs simply waits for the next turn of the loop; runs never overlap.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub debounce_duration: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
        }
    }
}

/// Watches a set of directories recursively.
pub struct ChangeWatcher {
    dirs: Vec<PathBuf>,
    options: WatcherOptions,
}

impl ChangeWatcher {
    pub fn new(dirs: Vec<PathBuf>, options: WatcherOptions) -> Self {
        Self { dirs, options }
    }

    /// Block until `on_change` breaks, handing it each batch of changed files.
    ///
    /// Missing directories are skipped with a warning.
    pub fn run(&self, mut on_change: impl FnMut(&[PathBuf]) -> ControlFlow<()>) -> Result<()> {
        let (tx, rx) = mpsc::channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(self.options.debounce_duration, None, tx)
            .context("creating file watcher")?;

        for dir in &self.dirs {
            let Ok(dir) = dir.canonicalize() else {
                warn!(path = ?dir, "Not watching missing directory");
                continue;
            };
            debouncer
                .watch(&dir, RecursiveMode::Recursive)
                .with_context(|| format!("watching {}", dir.display()))?;
            info!(path = ?dir, "Started watching");
        }

        for result in rx {
            match result {
                Ok(events) => {
                    let changed = changed_paths(events.iter().map(|event| &event.event));
                    if changed.is_empty() {
                        continue;
                    }
                    if on_change(&changed).is_break() {
                        break;
                    }
                }
                Err(errors) => {
                    for err in errors {
                        warn!(error = %err, "Watcher error");
                    }
                }
            }
        }
        Ok(())
    }
}

fn convert_event(event: &Event) -> Option<ChangeKind> {
    match &event.kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Any | EventKind::Access(_) | EventKind::Other => None,
    }
}

/// Distinct file paths touched by a batch, sorted. Directories are dropped.
pub fn changed_paths<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<PathBuf> {
    let mut paths = BTreeSet::new();
    for event in events {
        let Some(kind) = convert_event(event) else {
            continue;
        };
        for path in &event.paths {
            if path.is_dir() {
                continue;
            }
            debug!(path = ?path, kind = ?kind, "File change detected");
            paths.insert(path.clone());
        }
    }
    paths.into_iter().collect()
}
