//! Keeps a cache entry warm while its source is being edited.
//!
//! `preload --watch` blocks on [`SourceWatcher::next_change`] and re-runs the
//! recipe once per burst of writes. Editors that save by renaming a temp file
//! over the source drop an inotify watch on the file itself, so the watch sits
//! on the parent directory and events are filtered down to the source path.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

pub struct SourceWatcher {
    source: PathBuf,
    changes: mpsc::Receiver<()>,
    settle: Duration,
    _watcher: RecommendedWatcher,
}

impl SourceWatcher {
    /// Watch `source`. A change is reported once no further event has
    /// arrived for `settle`.
    pub fn new(source: &Path, settle: Duration) -> Result<Self> {
        let source = source
            .canonicalize()
            .with_context(|| format!("cannot resolve {}", source.display()))?;
        let parent = source
            .parent()
            .with_context(|| format!("{} has no parent directory", source.display()))?
            .to_path_buf();

        let (tx, changes) = mpsc::channel();
        let filter_path = source.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &filter_path) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => debug!("watch: notify error: {e}"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;
        debug!("watch: {} via {}", source.display(), parent.display());

        Ok(Self {
            source,
            changes,
            settle,
            _watcher: watcher,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Consume queued notifications without blocking. True if there were any.
    pub fn drain(&self) -> bool {
        self.changes.try_iter().count() > 0
    }

    /// Block until the source changes or `timeout` passes, then keep
    /// absorbing events until the source has been quiet for the settle time.
    pub fn next_change(&self, timeout: Duration) -> bool {
        if self.changes.recv_timeout(timeout).is_err() {
            return false;
        }
        while self.changes.recv_timeout(self.settle).is_ok() {}
        true
    }
}

/// Whether `event` rewrites or recreates `source`.
fn touches(event: &Event, source: &Path) -> bool {
    (event.kind.is_modify() || event.kind.is_create()) && event.paths.iter().any(|p| p == source)
}
