//! OS-aware resolution of the config, state, and log directories.
//!
//! Resolution order for every directory:
//! 1. `NAMEFIX_HOME` environment variable (everything lives in one place)
//! 2. The matching XDG variable (`XDG_CONFIG_HOME`, `XDG_STATE_HOME`)
//! 3. The platform default (`~/Library/Application Support/namefix` on
//!    macOS, `~/.config/namefix` and `~/.local/state/namefix` elsewhere)

use std::path::{Component, Path, PathBuf};

/// Directory name used under XDG bases and platform app-support roots.
pub const APP_DIR_NAME: &str = "namefix";

/// Environment variable that overrides every directory at once.
pub const HOME_ENV: &str = "NAMEFIX_HOME";

fn override_home() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Directory holding `config.json`.
pub fn config_dir() -> PathBuf {
    if let Some(home) = override_home() {
        return home;
    }
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join(APP_DIR_NAME);
    }
    platform_support_dir()
}

/// Directory holding mutable state such as the undo journal.
pub fn state_dir() -> PathBuf {
    if let Some(home) = override_home() {
        return home;
    }
    if let Some(xdg) = std::env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join(APP_DIR_NAME);
    }
    if cfg!(target_os = "macos") {
        return platform_support_dir();
    }
    match dirs::home_dir() {
        Some(home) => home.join(".local").join("state").join(APP_DIR_NAME),
        None => PathBuf::from(".").join(APP_DIR_NAME),
    }
}

/// Directory for log files.
pub fn logs_dir() -> PathBuf {
    if let Some(home) = override_home() {
        return home.join("logs");
    }
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs::home_dir() {
            return home.join("Library").join("Logs").join(APP_DIR_NAME);
        }
    }
    state_dir().join("logs")
}

fn platform_support_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs::home_dir() {
            return home
                .join("Library")
                .join("Application Support")
                .join(APP_DIR_NAME);
        }
    }
    match dirs::config_dir() {
        Some(config) => config.join(APP_DIR_NAME),
        None => PathBuf::from(".").join(APP_DIR_NAME),
    }
}

/// Expand a leading `~` or `~/` to the user's home directory.
pub fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Normalize a user-supplied directory string into an absolute, cleaned path.
///
/// Returns `None` for empty (or whitespace-only) input.
pub fn normalize_dir(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_tilde(trimmed);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir().ok()?.join(expanded)
    };
    Some(clean_path(&absolute))
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(component.as_os_str());
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
