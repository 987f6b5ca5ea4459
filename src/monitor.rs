//! File-change notifier
//!
//! Watches the files consumed during configure by installing
//! non-recursive watches on their parent directories. The notify backend
//! delivers events on its own thread; they are filtered against the
//! monitored file set and marshalled onto the event loop through a tokio
//! channel, where they surface as protocol `signal` frames.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEventKind {
    /// Contents changed in place.
    Change,
    /// Created, removed, or renamed.
    Rename,
}

impl PathEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Change => "change",
            Self::Rename => "rename",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathEvent {
    pub path: PathBuf,
    pub kind: PathEventKind,
}

pub struct FileMonitor {
    watcher: RecommendedWatcher,
    /// Shared with the notify callback thread for filtering.
    files: Arc<Mutex<BTreeSet<PathBuf>>>,
    directories: BTreeSet<PathBuf>,
}

impl FileMonitor {
    /// Create a monitor that posts events for watched files into `events`.
    pub fn new(events: mpsc::UnboundedSender<PathEvent>) -> Result<Self, MonitorError> {
        let files: Arc<Mutex<BTreeSet<PathBuf>>> = Arc::new(Mutex::new(BTreeSet::new()));
        let filter = Arc::clone(&files);

        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!("File watch error: {}", e);
                    return;
                }
            };
            let kind = match event.kind {
                EventKind::Modify(_) => PathEventKind::Change,
                EventKind::Create(_) | EventKind::Remove(_) => PathEventKind::Rename,
                _ => return,
            };
            let watched = filter.lock().unwrap();
            for path in event.paths {
                if watched.contains(&path) {
                    let _ = events.send(PathEvent {
                        path: path.clone(),
                        kind,
                    });
                }
            }
        })?;

        Ok(Self {
            watcher,
            files,
            directories: BTreeSet::new(),
        })
    }

    /// Replace the monitored set with `paths`, watching the parent
    /// directory of each file.
    pub fn monitor(&mut self, paths: Vec<PathBuf>) -> Result<(), MonitorError> {
        self.stop();

        let mut directories = BTreeSet::new();
        for path in &paths {
            if let Some(parent) = path.parent() {
                directories.insert(parent.to_path_buf());
            }
        }
        for directory in &directories {
            debug!("Watching {:?}", directory);
            self.watcher
                .watch(directory, RecursiveMode::NonRecursive)?;
        }

        *self.files.lock().unwrap() = paths.into_iter().collect();
        self.directories = directories;
        Ok(())
    }

    /// Release all watches.
    pub fn stop(&mut self) {
        for directory in &self.directories {
            let _ = self.watcher.unwatch(directory);
        }
        self.directories.clear();
        self.files.lock().unwrap().clear();
    }

    pub fn watched_files(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.display().to_string())
            .collect()
    }

    pub fn watched_directories(&self) -> Vec<String> {
        self.directories
            .iter()
            .map(|p| p.display().to_string())
            .collect()
    }
}
