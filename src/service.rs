//! The orchestrator: lifecycle, watcher supervision, profile routing, and
//! pipeline execution.
//!
//! All mutable state (watcher map, journal, reservation set) lives behind
//! one [`NamefixService`]; watcher callbacks marshal into the service's
//! pump task via a channel, so pipelines never race each other outside of
//! their declared suspension points. Watcher set changes are serialized
//! through a FIFO mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::{
    Action, Config, ConfigError, ConfigPatch, ConfigStore, Profile,
};
use crate::convert::{ConvertOptions, Converter, MissingConverter, SipsConverter};
use crate::events::{
    EventBus, FileEvent, FileEventKind, ServiceEvent, StatusPayload, Subscription, Toast,
};
use crate::journal::{JournalError, JournalStore, UndoOutcome};
use crate::matcher::ProfileMatcher;
use crate::rename::RenameService;
use crate::template::{self, TemplateContext};
use crate::trash::{PlatformTrash, Trash};
use crate::watcher::{DirWatcher, WatchError, WatchEvent};
use crate::{fs_safe, paths, utils};

/// Health-check cadence while running.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Restart attempts per directory before the permanent-failure toast.
pub const MAX_RESTART_ATTEMPTS: u32 = 3;

// Source liveness poll before a rename: 150 ms steps up to ~900 ms.
const SOURCE_WAIT_STEPS: u32 = 6;
const SOURCE_WAIT_STEP_MS: u64 = 150;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("service I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builder for a [`NamefixService`].
///
/// Construction is initialization: a built service has loaded (and, when
/// missing, created) its config, so the uninitialized state is
/// unrepresentable.
pub struct NamefixServiceBuilder {
    config_path: Option<PathBuf>,
    journal_path: Option<PathBuf>,
    overrides: Option<ConfigPatch>,
    converter: Option<Arc<dyn Converter>>,
    trash: Option<Arc<dyn Trash>>,
}

impl Default for NamefixServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NamefixServiceBuilder {
    pub fn new() -> Self {
        Self {
            config_path: None,
            journal_path: None,
            overrides: None,
            converter: None,
            trash: None,
        }
    }

    /// Back the config store with an explicit file.
    pub fn config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Back the journal with an explicit file.
    pub fn journal_path(mut self, path: PathBuf) -> Self {
        self.journal_path = Some(path);
        self
    }

    /// Partial config applied (and persisted) during init.
    pub fn overrides(mut self, patch: ConfigPatch) -> Self {
        self.overrides = Some(patch);
        self
    }

    /// Plug in a conversion backend.
    pub fn converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Plug in a trash backend.
    pub fn trash(mut self, trash: Arc<dyn Trash>) -> Self {
        self.trash = Some(trash);
        self
    }

    /// Load config, wire up the pump task, and return a stopped service.
    pub async fn build(self) -> Result<NamefixService, ServiceError> {
        let config = match self.config_path {
            Some(path) => ConfigStore::new(path),
            None => ConfigStore::at_default_location(),
        };
        match self.overrides {
            Some(patch) => {
                config.set(patch).await?;
            }
            None => {
                config.get().await?;
            }
        }

        let journal = match self.journal_path {
            Some(path) => JournalStore::new(path),
            None => JournalStore::at_default_location(),
        };
        let converter = self.converter.unwrap_or_else(default_converter);
        let trash = self
            .trash
            .unwrap_or_else(|| Arc::new(PlatformTrash::new()) as Arc<dyn Trash>);

        let (event_tx, mut event_rx) = mpsc::channel::<WatchEvent>(256);
        let inner = Arc::new(ServiceInner {
            config,
            journal: AsyncMutex::new(journal),
            rename: RenameService::new(),
            converter,
            trash,
            bus: EventBus::new(),
            watchers: AsyncMutex::new(HashMap::new()),
            sync_lock: AsyncMutex::new(()),
            running: AtomicBool::new(false),
            restart_attempts: StdMutex::new(HashMap::new()),
            event_tx,
            pump: StdMutex::new(None),
            health: StdMutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let pump = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_watch_event(event).await;
            }
        });
        *utils::lock(&inner.pump) = Some(pump);

        Ok(NamefixService { inner })
    }
}

fn default_converter() -> Arc<dyn Converter> {
    match SipsConverter::discover() {
        Ok(converter) => Arc::new(converter),
        Err(e) => {
            tracing::warn!("[service] {e}; conversions will fail until a tool is installed");
            Arc::new(MissingConverter)
        }
    }
}

struct WatcherEntry {
    watcher: DirWatcher,
    error_task: JoinHandle<()>,
}

struct ServiceInner {
    config: ConfigStore,
    journal: AsyncMutex<JournalStore>,
    rename: RenameService,
    converter: Arc<dyn Converter>,
    trash: Arc<dyn Trash>,
    bus: EventBus,
    watchers: AsyncMutex<HashMap<PathBuf, WatcherEntry>>,
    /// FIFO lock so overlapping watcher-set changes apply sequentially.
    sync_lock: AsyncMutex<()>,
    running: AtomicBool,
    restart_attempts: StdMutex<HashMap<PathBuf, u32>>,
    event_tx: mpsc::Sender<WatchEvent>,
    pump: StdMutex<Option<JoinHandle<()>>>,
    health: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if let Some(task) = utils::lock(&self.pump).take() {
            task.abort();
        }
        if let Some(task) = utils::lock(&self.health).take() {
            task.abort();
        }
    }
}

/// Handle to the engine. Cheap to clone.
#[derive(Clone)]
pub struct NamefixService {
    inner: Arc<ServiceInner>,
}

impl NamefixService {
    pub fn builder() -> NamefixServiceBuilder {
        NamefixServiceBuilder::new()
    }

    /// Initialize with optional config overrides at the default locations.
    pub async fn init(overrides: Option<ConfigPatch>) -> Result<Self, ServiceError> {
        let mut builder = Self::builder();
        if let Some(patch) = overrides {
            builder = builder.overrides(patch);
        }
        builder.build().await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Begin watching the configured directories.
    pub async fn start(&self) -> Result<StatusPayload, ServiceError> {
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.sync_watchers().await?;
        self.inner.spawn_health_monitor();
        crate::log_event!("service", "started");
        Ok(self.inner.emit_status().await)
    }

    /// Stop watching and tear everything down.
    pub async fn stop(&self) -> Result<StatusPayload, ServiceError> {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(task) = utils::lock(&self.inner.health).take() {
            task.abort();
        }
        self.inner.sync_watchers().await?;
        crate::log_event!("service", "stopped");
        Ok(self.inner.emit_status().await)
    }

    /// Flip (or force, when `desired` is given) the running state.
    pub async fn toggle_running(
        &self,
        desired: Option<bool>,
    ) -> Result<StatusPayload, ServiceError> {
        let target = desired.unwrap_or(!self.is_running());
        if target { self.start().await } else { self.stop().await }
    }

    pub async fn get_config(&self) -> Result<Config, ServiceError> {
        Ok(self.inner.config.get().await?)
    }

    /// Merge a partial config, persist, rewire watchers, and broadcast.
    pub async fn set_config(&self, patch: ConfigPatch) -> Result<Config, ServiceError> {
        let config = self.inner.config.set(patch).await?;
        self.inner.bus.emit(ServiceEvent::Config(config.clone()));
        self.inner.sync_watchers().await?;
        self.inner.emit_status().await;
        Ok(config)
    }

    pub async fn set_dry_run(&self, enabled: bool) -> Result<StatusPayload, ServiceError> {
        self.set_config(ConfigPatch {
            dry_run: Some(enabled),
            ..ConfigPatch::default()
        })
        .await?;
        Ok(self.get_status().await)
    }

    pub async fn set_launch_on_login(&self, enabled: bool) -> Result<bool, ServiceError> {
        let config = self
            .set_config(ConfigPatch {
                launch_on_login: Some(enabled),
                ..ConfigPatch::default()
            })
            .await?;
        Ok(config.launch_on_login)
    }

    pub async fn get_profiles(&self) -> Result<Vec<Profile>, ServiceError> {
        Ok(self.get_config().await?.profiles)
    }

    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>, ServiceError> {
        Ok(self
            .get_profiles()
            .await?
            .into_iter()
            .find(|p| p.id == id))
    }

    /// Insert or replace a profile by id.
    pub async fn set_profile(&self, profile: Profile) -> Result<Vec<Profile>, ServiceError> {
        let mut profiles = self.get_profiles().await?;
        match profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(slot) => *slot = profile,
            None => profiles.push(profile),
        }
        let config = self.replace_profiles(profiles).await?;
        Ok(config.profiles)
    }

    /// Remove a profile by id. Built-in defaults are re-injected by
    /// validation, so deleting one resets it instead.
    pub async fn delete_profile(&self, id: &str) -> Result<Vec<Profile>, ServiceError> {
        let mut profiles = self.get_profiles().await?;
        profiles.retain(|p| p.id != id);
        let config = self.replace_profiles(profiles).await?;
        Ok(config.profiles)
    }

    pub async fn toggle_profile(
        &self,
        id: &str,
        desired: Option<bool>,
    ) -> Result<Vec<Profile>, ServiceError> {
        let mut profiles = self.get_profiles().await?;
        if let Some(profile) = profiles.iter_mut().find(|p| p.id == id) {
            profile.enabled = desired.unwrap_or(!profile.enabled);
        }
        let config = self.replace_profiles(profiles).await?;
        Ok(config.profiles)
    }

    /// Reassign priorities so the listed ids come first, in order; any
    /// profile not listed keeps its relative position after them.
    pub async fn reorder_profiles(
        &self,
        ordered_ids: &[String],
    ) -> Result<Vec<Profile>, ServiceError> {
        let mut remaining = self.get_profiles().await?;
        let mut reordered = Vec::with_capacity(remaining.len());
        for id in ordered_ids {
            if let Some(pos) = remaining.iter().position(|p| &p.id == id) {
                reordered.push(remaining.remove(pos));
            }
        }
        reordered.extend(remaining);
        for (index, profile) in reordered.iter_mut().enumerate() {
            profile.priority = index as i32;
        }
        let config = self.replace_profiles(reordered).await?;
        Ok(config.profiles)
    }

    async fn replace_profiles(&self, profiles: Vec<Profile>) -> Result<Config, ServiceError> {
        self.set_config(ConfigPatch {
            profiles: Some(profiles),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn list_directories(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.get_config().await?.watch_dirs)
    }

    pub async fn add_watch_dir(&self, dir: &str) -> Result<Vec<String>, ServiceError> {
        let mut dirs = self.list_directories().await?;
        dirs.push(dir.to_string());
        self.replace_watch_dirs(dirs).await
    }

    pub async fn remove_watch_dir(&self, dir: &str) -> Result<Vec<String>, ServiceError> {
        let removed = paths::normalize_dir(dir)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.to_string());
        let dirs = self
            .list_directories()
            .await?
            .into_iter()
            .filter(|existing| existing != &removed)
            .collect();
        self.replace_watch_dirs(dirs).await
    }

    /// Move (or insert) a directory to the front of the watch list.
    pub async fn set_primary_watch_dir(&self, dir: &str) -> Result<Vec<String>, ServiceError> {
        let mut dirs = vec![dir.to_string()];
        dirs.extend(self.list_directories().await?);
        self.replace_watch_dirs(dirs).await
    }

    pub async fn set_watch_dirs(&self, dirs: Vec<String>) -> Result<Vec<String>, ServiceError> {
        self.replace_watch_dirs(dirs).await
    }

    async fn replace_watch_dirs(&self, dirs: Vec<String>) -> Result<Vec<String>, ServiceError> {
        let config = self
            .set_config(ConfigPatch {
                watch_dirs: Some(dirs),
                ..ConfigPatch::default()
            })
            .await?;
        Ok(config.watch_dirs)
    }

    pub async fn get_status(&self) -> StatusPayload {
        self.inner.status_snapshot().await
    }

    /// Undo the most recent journaled operation.
    pub async fn undo_last(&self) -> UndoOutcome {
        self.inner.journal.lock().await.undo().await
    }

    /// Subscribe to service events. Dropping the handle unsubscribes.
    pub fn on(&self, handler: impl Fn(&ServiceEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.bus.on(handler)
    }

    /// Run the pipeline for one existing file, as if its watcher had just
    /// reported it stable.
    pub async fn process_file(&self, path: &Path) -> Result<(), ServiceError> {
        let meta = tokio::fs::metadata(path).await?;
        let event = WatchEvent::from_metadata(path.to_path_buf(), &meta);
        self.inner.handle_watch_event(event).await;
        Ok(())
    }
}

impl ServiceInner {
    /// Reconcile the running watcher map with the desired directory set.
    ///
    /// Serialized by `sync_lock` (FIFO), so overlapping config changes
    /// apply in order and never interleave.
    async fn sync_watchers(self: &Arc<Self>) -> Result<(), ServiceError> {
        let _guard = self.sync_lock.lock().await;

        let desired: Vec<PathBuf> = if self.running.load(Ordering::SeqCst) {
            self.config
                .get()
                .await?
                .watch_dirs
                .iter()
                .map(PathBuf::from)
                .collect()
        } else {
            Vec::new()
        };

        let mut watchers = self.watchers.lock().await;

        let removed: Vec<PathBuf> = watchers
            .keys()
            .filter(|dir| !desired.contains(dir))
            .cloned()
            .collect();
        for dir in removed {
            if let Some(entry) = watchers.remove(&dir) {
                entry.error_task.abort();
                entry.watcher.stop();
            }
        }

        for dir in desired {
            if watchers.contains_key(&dir) {
                continue;
            }
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                tracing::warn!("[service] cannot create watch dir {}: {e}", dir.display());
                self.bus.emit(ServiceEvent::Toast(Toast::warn(format!(
                    "Cannot watch {}: {e}",
                    dir.display()
                ))));
                continue;
            }
            match self.start_watcher(dir.clone()) {
                Ok(entry) => {
                    watchers.insert(dir.clone(), entry);
                    utils::lock(&self.restart_attempts).remove(&dir);
                }
                Err(e) => {
                    tracing::warn!("[service] failed to watch {}: {e}", dir.display());
                    self.bus.emit(ServiceEvent::Toast(Toast::warn(format!(
                        "Cannot watch {}: {e}",
                        dir.display()
                    ))));
                }
            }
        }
        Ok(())
    }

    fn start_watcher(self: &Arc<Self>, dir: PathBuf) -> Result<WatcherEntry, WatchError> {
        let watcher = DirWatcher::start(dir.clone(), self.event_tx.clone())?;
        let mut error_rx = watcher.on_error();
        let weak = Arc::downgrade(self);
        let error_task = tokio::spawn(async move {
            loop {
                match error_rx.recv().await {
                    Ok(message) => {
                        tracing::warn!("[watcher] {}: {message}", dir.display());
                        match weak.upgrade() {
                            Some(inner) => inner.bus.emit(ServiceEvent::Toast(Toast::warn(
                                format!("Watcher error in {}: {message}", dir.display()),
                            ))),
                            None => break,
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("[watcher] error channel lagged by {n}");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(WatcherEntry {
            watcher,
            error_task,
        })
    }

    fn spawn_health_monitor(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                inner.check_watcher_health().await;
            }
        });
        if let Some(previous) = utils::lock(&self.health).replace(handle) {
            previous.abort();
        }
    }

    /// Restart unhealthy, inaccessible, or never-started watchers, up to
    /// the attempt cap.
    async fn check_watcher_health(self: &Arc<Self>) {
        let mut dirs: Vec<PathBuf> = self.watchers.lock().await.keys().cloned().collect();
        // Directories that should be watched but have no live watcher
        // (e.g. their initial start failed) go through the same path.
        if let Ok(config) = self.config.get().await {
            for dir in config.watch_dirs.iter().map(PathBuf::from) {
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        for dir in dirs {
            let handle_alive = self
                .watchers
                .lock()
                .await
                .get(&dir)
                .map(|entry| entry.watcher.is_healthy())
                .unwrap_or(false);
            let dir_accessible = tokio::fs::metadata(&dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);

            if handle_alive && dir_accessible {
                utils::lock(&self.restart_attempts).remove(&dir);
                continue;
            }

            let attempts = {
                let mut map = utils::lock(&self.restart_attempts);
                let count = map.entry(dir.clone()).or_insert(0);
                if *count > MAX_RESTART_ATTEMPTS {
                    // Already gave up on this directory.
                    continue;
                }
                *count += 1;
                *count
            };

            if let Some(entry) = self.watchers.lock().await.remove(&dir) {
                entry.error_task.abort();
                entry.watcher.stop();
            }

            if attempts > MAX_RESTART_ATTEMPTS {
                tracing::error!(
                    "[service] watcher for {} failed {attempts} times; giving up",
                    dir.display()
                );
                self.bus.emit(ServiceEvent::Toast(Toast::error(format!(
                    "Watching {} failed repeatedly; that folder is no longer monitored",
                    dir.display()
                ))));
                self.emit_status().await;
                continue;
            }

            crate::log_event!("service", "restarting watcher", "{}", dir.display());
            let _ = tokio::fs::create_dir_all(&dir).await;
            match self.start_watcher(dir.clone()) {
                Ok(entry) => {
                    self.watchers.lock().await.insert(dir, entry);
                }
                Err(e) => {
                    tracing::warn!("[service] restart failed for {}: {e}", dir.display());
                }
            }
        }
    }

    /// Route one stable-file event to its pipeline.
    async fn handle_watch_event(&self, event: WatchEvent) {
        let config = match self.config.get().await {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("[service] cannot load config: {e}");
                return;
            }
        };
        let Some(basename) = event
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
        else {
            return;
        };

        let matcher = ProfileMatcher::new(&config.profiles);
        let Some(profile) = matcher.match_basename(&basename).cloned() else {
            crate::debug_event!("service", "no profile match", "{basename}");
            return;
        };
        crate::log_event!("service", "matched", "{basename} -> {}", profile.id);

        match profile.action() {
            Action::Rename => {
                self.run_rename(&config, &event.path, event.birthtime_ms, &profile)
                    .await;
            }
            Action::Convert => self.run_convert(&config, &event, &profile, false).await,
            Action::RenameConvert => self.run_convert(&config, &event, &profile, true).await,
        }
    }

    /// The rename pipeline. Returns false when a later step must not run.
    async fn run_rename(
        &self,
        config: &Config,
        src: &Path,
        birthtime_ms: u64,
        profile: &Profile,
    ) -> bool {
        let basename = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !self.rename.needs_rename_for_profile(&basename, profile) {
            self.emit_file(
                src,
                FileEventKind::Skipped {
                    message: "idempotent".into(),
                },
            );
            return true;
        }

        let ext = utils::ext_with_dot(src);
        let ctx = TemplateContext {
            birthtime: local_time(birthtime_ms),
            original_path: src,
            ext: &ext,
            prefix: &profile.prefix,
            counter: None,
        };
        let reservation = self.rename.target_for_profile(src, &ctx, profile).await;
        let target = reservation.filename();

        if config.dry_run {
            self.emit_file(src, FileEventKind::Preview { target });
            return true;
        }

        if !wait_for_source(src).await {
            tracing::warn!(
                "[service] source disappeared before rename: {}",
                src.display()
            );
            return false;
        }

        match fs_safe::atomic_rename(src, reservation.path()).await {
            Ok(()) => {
                if let Err(e) = self
                    .journal
                    .lock()
                    .await
                    .record(src, reservation.path())
                    .await
                {
                    tracing::warn!("[service] journal record failed: {e}");
                }
                self.emit_file(src, FileEventKind::Applied { target });
                true
            }
            Err(e) => {
                self.emit_file(
                    src,
                    FileEventKind::Error {
                        message: e.to_string(),
                    },
                );
                false
            }
        }
    }

    /// The convert (and optionally convert-then-rename) pipeline.
    async fn run_convert(
        &self,
        config: &Config,
        event: &WatchEvent,
        profile: &Profile,
        then_rename: bool,
    ) {
        let src = &event.path;
        let ext = utils::ext_with_dot(src);
        if !self.converter.can_convert(&ext) {
            self.emit_file(
                src,
                FileEventKind::Skipped {
                    message: "unsupported format".into(),
                },
            );
            return;
        }

        if config.dry_run {
            let target = if then_rename {
                let ctx = TemplateContext {
                    birthtime: local_time(event.birthtime_ms),
                    original_path: src,
                    ext: ".jpeg",
                    prefix: &profile.prefix,
                    counter: None,
                };
                let tpl = if profile.template.trim().is_empty() {
                    template::DEFAULT_TEMPLATE
                } else {
                    profile.template.as_str()
                };
                template::expand_name(tpl, &ctx)
            } else {
                let stem = src
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{stem}.jpeg")
            };
            self.emit_file(src, FileEventKind::Preview { target });
            return;
        }

        let conversion = match self.converter.convert(src, &ConvertOptions::jpeg()).await {
            Ok(conversion) => conversion,
            Err(e) => {
                self.emit_file(
                    src,
                    FileEventKind::ConvertError {
                        message: e.to_string(),
                    },
                );
                return;
            }
        };
        self.emit_file(
            src,
            FileEventKind::Converted {
                format: conversion.format.clone(),
            },
        );
        if let Err(e) = self
            .journal
            .lock()
            .await
            .record(src, &conversion.dest_path)
            .await
        {
            tracing::warn!("[service] journal record failed: {e}");
        }

        if then_rename
            && !self
                .run_rename(config, &conversion.dest_path, event.birthtime_ms, profile)
                .await
        {
            return;
        }

        // Best-effort: the conversion outcome stands even when this fails.
        let basename = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.trash.move_to_trash(src).await {
            Ok(outcome) if outcome.success => self.emit_file(src, FileEventKind::Trashed),
            Ok(outcome) => self.bus.emit(ServiceEvent::Toast(Toast::warn(format!(
                "Could not trash original {basename}: {}",
                outcome.error.unwrap_or_else(|| "unknown error".into())
            )))),
            Err(e) => self.bus.emit(ServiceEvent::Toast(Toast::warn(format!(
                "Could not trash original {basename}: {e}"
            )))),
        }
    }

    fn emit_file(&self, path: &Path, kind: FileEventKind) {
        self.bus
            .emit(ServiceEvent::File(FileEvent::for_path(path, kind)));
    }

    async fn emit_status(&self) -> StatusPayload {
        let status = self.status_snapshot().await;
        self.bus.emit(ServiceEvent::Status(status.clone()));
        status
    }

    async fn status_snapshot(&self) -> StatusPayload {
        let config = self.config.get().await.unwrap_or_default();
        let watcher_count = self.watchers.lock().await.len();
        StatusPayload {
            running: self.running.load(Ordering::SeqCst) && watcher_count > 0,
            directories: config.watch_dirs,
            dry_run: config.dry_run,
            launch_on_login: config.launch_on_login,
        }
    }
}

fn local_time(ms: u64) -> DateTime<Local> {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms as i64)
        .unwrap_or_else(chrono::Utc::now)
        .with_timezone(&Local)
}

async fn wait_for_source(path: &Path) -> bool {
    for _ in 0..SOURCE_WAIT_STEPS {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(SOURCE_WAIT_STEP_MS)).await;
    }
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
