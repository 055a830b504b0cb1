//! Per-directory watcher emitting stable-file add events.
//!
//! Each watched directory gets its own `notify` watcher. Raw create
//! events are marshalled onto the tokio runtime, gated through the
//! stability probe, deduplicated by a per-path in-flight guard, and then
//! emitted exactly once as a [`WatchEvent`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::fs_safe;

/// Produced once per stable new file.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub birthtime_ms: u64,
    pub mtime_ms: u64,
    pub size: u64,
}

impl WatchEvent {
    /// Build an event from a stat result. Platforms without a birth time
    /// fall back to the modification time.
    pub fn from_metadata(path: PathBuf, meta: &std::fs::Metadata) -> Self {
        Self {
            birthtime_ms: meta
                .created()
                .or_else(|_| meta.modified())
                .map(system_time_ms)
                .unwrap_or(0),
            mtime_ms: meta.modified().map(system_time_ms).unwrap_or(0),
            size: meta.len(),
            path,
        }
    }
}

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// One directory's watcher, health signal, and error channel.
pub struct DirWatcher {
    dir: PathBuf,
    alive: Arc<AtomicBool>,
    errors: broadcast::Sender<String>,
    forward: JoinHandle<()>,
    // Dropping the notify handle releases the OS watch.
    _watcher: RecommendedWatcher,
}

impl DirWatcher {
    /// Start watching `dir` (non-recursive). Every stable new regular
    /// file whose basename is not a dotfile produces one [`WatchEvent`]
    /// on `on_add`.
    pub fn start(dir: PathBuf, on_add: mpsc::Sender<WatchEvent>) -> Result<Self, WatchError> {
        let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<Event>>(128);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.blocking_send(res);
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        let alive = Arc::new(AtomicBool::new(true));
        let (errors, _) = broadcast::channel(16);
        let forward = tokio::spawn(forward_loop(
            raw_rx,
            on_add,
            alive.clone(),
            errors.clone(),
        ));

        crate::log_event!("watcher", "watching", "{}", dir.display());
        Ok(Self {
            dir,
            alive,
            errors,
            forward,
            _watcher: watcher,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True while the event stream from the OS handle is still open.
    pub fn is_healthy(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.forward.is_finished()
    }

    /// Subscribe to asynchronous watcher errors.
    pub fn on_error(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    /// Release OS resources. Also happens on drop.
    pub fn stop(self) {
        self.alive.store(false, Ordering::SeqCst);
        self.forward.abort();
        crate::log_event!("watcher", "stopped", "{}", self.dir.display());
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        self.forward.abort();
    }
}

async fn forward_loop(
    mut raw_rx: mpsc::Receiver<notify::Result<Event>>,
    on_add: mpsc::Sender<WatchEvent>,
    alive: Arc<AtomicBool>,
    errors: broadcast::Sender<String>,
) {
    // Guards against overlapping pipelines for the same path when the OS
    // delivers several create events in quick succession.
    let in_flight: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));

    while let Some(res) = raw_rx.recv().await {
        match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_)) {
                    continue;
                }
                for path in event.paths {
                    let is_dotfile = path
                        .file_name()
                        .map(|n| n.to_string_lossy().starts_with('.'))
                        .unwrap_or(true);
                    if is_dotfile {
                        continue;
                    }
                    if !crate::utils::lock(&in_flight).insert(path.clone()) {
                        crate::debug_event!("watcher", "already in flight", "{}", path.display());
                        continue;
                    }
                    tokio::spawn(process_candidate(
                        path,
                        on_add.clone(),
                        in_flight.clone(),
                    ));
                }
            }
            Err(e) => {
                let _ = errors.send(e.to_string());
            }
        }
    }
    // The notify handle is gone; report unhealthy.
    alive.store(false, Ordering::SeqCst);
}

async fn process_candidate(
    path: PathBuf,
    on_add: mpsc::Sender<WatchEvent>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
) {
    let stable = fs_safe::is_stable(&path).await;
    match stable {
        Ok(true) => {
            // ENOENT here is expected: another actor may have moved the
            // file between stability and stat.
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                if meta.is_file() {
                    let event = WatchEvent::from_metadata(path.clone(), &meta);
                    let _ = on_add.send(event).await;
                }
            }
        }
        Ok(false) => {
            crate::debug_event!("watcher", "vanished before stable", "{}", path.display());
        }
        Err(e) => {
            tracing::warn!("[watcher] stat failed for {}: {e}", path.display());
        }
    }
    crate::utils::lock(&in_flight).remove(&path);
}

fn system_time_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_emits_event_for_new_stable_file() {
        let dir = tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = DirWatcher::start(dir.path().to_path_buf(), tx).unwrap();

        let path = dir.path().join("Screenshot 1.png");
        tokio::fs::write(&path, b"pixels").await.unwrap();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watch event within timeout")
            .expect("channel open");
        assert_eq!(event.path, path);
        assert_eq!(event.size, 6);
        assert!(event.birthtime_ms > 0);

        watcher.stop();
    }

    #[tokio::test]
    async fn test_ignores_dotfiles() {
        let dir = tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = DirWatcher::start(dir.path().to_path_buf(), tx).unwrap();

        tokio::fs::write(dir.path().join(".DS_Store"), b"junk")
            .await
            .unwrap();

        assert!(
            timeout(Duration::from_millis(1500), rx.recv()).await.is_err(),
            "dotfile must not produce an event"
        );
        watcher.stop();
    }

    #[tokio::test]
    async fn test_healthy_after_start() {
        let dir = tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let watcher = DirWatcher::start(dir.path().to_path_buf(), tx).unwrap();
        assert!(watcher.is_healthy());
        watcher.stop();
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_dir() {
        let (tx, _rx) = mpsc::channel(16);
        let result = DirWatcher::start(PathBuf::from("/no/such/dir/namefix"), tx);
        assert!(result.is_err());
    }
}
