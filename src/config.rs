//! Configuration model and persisted store.
//!
//! The config is a single JSON document at `<config_dir>/config.json`,
//! camelCase on the wire. Loading is forgiving: a missing or unparsable
//! file is replaced with defaults, while a structurally invalid one falls
//! back to defaults in memory only, so the user can repair it by hand.
//!
//! Writes are atomic (temp file + fsync + rename) and chmod 600, and every
//! successful [`ConfigStore::set`] broadcasts the new snapshot to
//! subscribers.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::Subscription;
use crate::template::DEFAULT_TEMPLATE;
use crate::{paths, utils};

/// Filename under the config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// The three valid `action` tags.
pub const VALID_ACTIONS: &[&str] = &["rename", "convert", "rename+convert"];

/// Errors from loading or persisting the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Processing pipeline selected by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Rename,
    Convert,
    RenameConvert,
}

/// A rule binding a filename pattern to a processing action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub pattern: String,
    pub is_regex: bool,
    pub template: String,
    pub prefix: String,
    /// Lower values match first.
    pub priority: i32,
    /// One of `rename`, `convert`, `rename+convert`. Absent means rename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            enabled: true,
            pattern: String::new(),
            is_regex: false,
            template: DEFAULT_TEMPLATE.to_string(),
            prefix: String::new(),
            priority: 100,
            action: None,
        }
    }
}

impl Profile {
    /// The resolved action; validation guarantees the tag is one of the
    /// three valid values, so anything else reads as the default.
    pub fn action(&self) -> Action {
        match self.action.as_deref() {
            Some("convert") => Action::Convert,
            Some("rename+convert") => Action::RenameConvert,
            _ => Action::Rename,
        }
    }

    fn has_valid_action(&self) -> bool {
        match self.action.as_deref() {
            None => true,
            Some(tag) => VALID_ACTIONS.contains(&tag),
        }
    }
}

/// Built-in profiles that every valid config carries. Re-injected by id
/// at validation time if the user deleted them.
pub fn default_profiles() -> Vec<Profile> {
    vec![
        Profile {
            id: "heic-convert".into(),
            name: "HEIC to JPEG".into(),
            pattern: "*.heic".into(),
            prefix: "Photo".into(),
            priority: 0,
            action: Some("convert".into()),
            ..Profile::default()
        },
        Profile {
            id: "screenshots".into(),
            name: "Screenshots".into(),
            pattern: "Screenshot*".into(),
            prefix: "Screenshot".into(),
            priority: 1,
            action: Some("rename".into()),
            ..Profile::default()
        },
        Profile {
            id: "screen-recordings".into(),
            name: "Screen Recordings".into(),
            pattern: "Screen Recording*".into(),
            prefix: "Screen Recording".into(),
            priority: 2,
            action: Some("rename".into()),
            ..Profile::default()
        },
    ]
}

/// Process-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Primary directory; always `watchDirs[0]` after validation.
    pub watch_dir: String,
    pub watch_dirs: Vec<String>,
    /// Legacy field, kept as migration input.
    pub prefix: String,
    /// Legacy field, kept as migration input.
    pub include: Vec<String>,
    /// Legacy field, kept as migration input.
    pub exclude: Vec<String>,
    pub dry_run: bool,
    pub theme: String,
    pub launch_on_login: bool,
    pub profiles: Vec<Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_dir: String::new(),
            watch_dirs: Vec::new(),
            prefix: String::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            dry_run: true,
            theme: "system".into(),
            launch_on_login: false,
            profiles: default_profiles(),
        }
    }
}

/// Partial config for [`ConfigStore::set`]; `None` fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub watch_dir: Option<String>,
    pub watch_dirs: Option<Vec<String>>,
    pub prefix: Option<String>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub dry_run: Option<bool>,
    pub theme: Option<String>,
    pub launch_on_login: Option<bool>,
    pub profiles: Option<Vec<Profile>>,
}

impl ConfigPatch {
    fn apply(self, base: &mut Config) {
        if let Some(v) = self.watch_dir {
            base.watch_dir = v;
        }
        if let Some(v) = self.watch_dirs {
            base.watch_dirs = v;
        }
        if let Some(v) = self.prefix {
            base.prefix = v;
        }
        if let Some(v) = self.include {
            base.include = v;
        }
        if let Some(v) = self.exclude {
            base.exclude = v;
        }
        if let Some(v) = self.dry_run {
            base.dry_run = v;
        }
        if let Some(v) = self.theme {
            base.theme = v;
        }
        if let Some(v) = self.launch_on_login {
            base.launch_on_login = v;
        }
        if let Some(v) = self.profiles {
            base.profiles = v;
        }
    }
}

impl From<Config> for ConfigPatch {
    fn from(config: Config) -> Self {
        Self {
            watch_dir: Some(config.watch_dir),
            watch_dirs: Some(config.watch_dirs),
            prefix: Some(config.prefix),
            include: Some(config.include),
            exclude: Some(config.exclude),
            dry_run: Some(config.dry_run),
            theme: Some(config.theme),
            launch_on_login: Some(config.launch_on_login),
            profiles: Some(config.profiles),
        }
    }
}

/// Normalize a raw config into a valid one.
///
/// - `watchDirs` entries are trimmed, tilde-expanded, absolutized, and
///   deduped preserving insertion order; `watchDir` becomes the first entry.
/// - A legacy config (no profiles, non-empty prefix/include) synthesizes
///   one rename profile per include pattern.
/// - Profiles with an unknown `action` tag are rejected outright.
/// - Missing built-in default profiles are re-added by id.
pub fn validate(mut config: Config) -> Config {
    let mut raw_dirs = config.watch_dirs.clone();
    if raw_dirs.is_empty() && !config.watch_dir.trim().is_empty() {
        raw_dirs.push(config.watch_dir.clone());
    }

    let mut seen = HashSet::new();
    let mut dirs = Vec::new();
    for raw in &raw_dirs {
        if let Some(normalized) = paths::normalize_dir(raw) {
            let display = normalized.to_string_lossy().into_owned();
            if seen.insert(display.clone()) {
                dirs.push(display);
            }
        }
    }
    config.watch_dir = dirs.first().cloned().unwrap_or_default();
    config.watch_dirs = dirs;

    if config.profiles.is_empty()
        && !config.prefix.trim().is_empty()
        && !config.include.is_empty()
    {
        config.profiles = migrate_legacy_profiles(&config.prefix, &config.include);
    }

    config.profiles.retain(|p| {
        if p.has_valid_action() {
            true
        } else {
            tracing::warn!(
                "rejecting profile '{}' with invalid action {:?}",
                p.id,
                p.action
            );
            false
        }
    });

    let present: HashSet<String> = config.profiles.iter().map(|p| p.id.clone()).collect();
    for default in default_profiles() {
        if !present.contains(&default.id) {
            config.profiles.push(default);
        }
    }

    if config.theme.trim().is_empty() {
        config.theme = "system".into();
    }

    config
}

/// Synthesize rename profiles from the legacy `prefix`/`include` fields.
fn migrate_legacy_profiles(prefix: &str, include: &[String]) -> Vec<Profile> {
    include
        .iter()
        .enumerate()
        .filter(|(_, pattern)| !pattern.trim().is_empty())
        .map(|(i, pattern)| Profile {
            id: format!("legacy-{}", i + 1),
            name: format!("Legacy: {}", pattern.trim()),
            pattern: pattern.trim().to_string(),
            prefix: prefix.trim().to_string(),
            priority: 10 + i as i32,
            action: Some("rename".into()),
            ..Profile::default()
        })
        .collect()
}

struct StoreInner {
    path: PathBuf,
    cache: Mutex<Option<Config>>,
    subscribers: Mutex<Vec<(u64, Arc<dyn Fn(&Config) + Send + Sync>)>>,
    next_id: AtomicU64,
}

/// Validated, persisted configuration with change subscription.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

impl ConfigStore {
    /// Store backed by an explicit file path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                path,
                cache: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Store backed by the platform config directory.
    pub fn at_default_location() -> Self {
        Self::new(paths::config_dir().join(CONFIG_FILE_NAME))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &std::path::Path {
        &self.inner.path
    }

    /// Current config, loading from disk on first call.
    pub async fn get(&self) -> Result<Config, ConfigError> {
        let cached = utils::lock(&self.inner.cache).clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        let loaded = self.load_from_disk().await?;
        let mut cache = utils::lock(&self.inner.cache);
        if let Some(raced) = cache.clone() {
            return Ok(raced);
        }
        *cache = Some(loaded.clone());
        Ok(loaded)
    }

    /// Merge a patch, validate, persist atomically, and broadcast.
    pub async fn set(&self, patch: ConfigPatch) -> Result<Config, ConfigError> {
        let mut merged = self.get().await?;
        patch.apply(&mut merged);
        let validated = validate(merged);
        self.persist(&validated).await?;
        *utils::lock(&self.inner.cache) = Some(validated.clone());

        let handlers: Vec<Arc<dyn Fn(&Config) + Send + Sync>> =
            utils::lock(&self.inner.subscribers)
                .iter()
                .map(|(_, h)| h.clone())
                .collect();
        for handler in handlers {
            handler(&validated);
        }
        Ok(validated)
    }

    /// Subscribe to config changes. The current value is delivered eagerly
    /// when already loaded. Dropping the subscription unsubscribes.
    pub fn on_change(
        &self,
        handler: impl Fn(&Config) + Send + Sync + 'static,
    ) -> Subscription {
        let handler: Arc<dyn Fn(&Config) + Send + Sync> = Arc::new(handler);
        let current = utils::lock(&self.inner.cache).clone();
        if let Some(current) = current {
            handler(&current);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        utils::lock(&self.inner.subscribers).push((id, handler));

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                utils::lock(&inner.subscribers).retain(|(sid, _)| *sid != id);
            }
        })
    }

    async fn load_from_disk(&self) -> Result<Config, ConfigError> {
        let path = &self.inner.path;
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) => match serde_json::from_value::<Config>(value) {
                    Ok(raw) => Ok(validate(raw)),
                    Err(e) => {
                        // Leave the file for manual repair.
                        tracing::warn!(
                            "config at {} has unexpected shape ({e}); using defaults",
                            path.display()
                        );
                        Ok(validate(Config::default()))
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "config at {} is not valid JSON ({e}); rewriting defaults",
                        path.display()
                    );
                    let defaults = validate(Config::default());
                    self.persist(&defaults).await?;
                    Ok(defaults)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = validate(Config::default());
                self.persist(&defaults).await?;
                Ok(defaults)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, config: &Config) -> Result<(), ConfigError> {
        let path = &self.inner.path;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(config)?;

        let tmp = path.with_extension("json.tmp");
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            tokio::io::AsyncWriteExt::write_all(&mut file, &bytes).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }
}
