//! Reversible delete behind a pluggable trait.
//!
//! Contract: attempting to trash a file that does not exist is an error;
//! every other failure is reported in-band via
//! [`TrashOutcome::success`] = false so the caller can degrade gracefully
//! (a failed trash never invalidates a finished conversion).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::utils;

#[derive(Debug, Error)]
pub enum TrashError {
    #[error("cannot trash missing file: {0}")]
    MissingSource(PathBuf),
}

/// Result of a trash attempt.
#[derive(Debug, Clone)]
pub struct TrashOutcome {
    pub src_path: PathBuf,
    pub success: bool,
    pub error: Option<String>,
}

impl TrashOutcome {
    fn ok(src: &Path) -> Self {
        Self {
            src_path: src.to_path_buf(),
            success: true,
            error: None,
        }
    }

    fn failed(src: &Path, error: impl Into<String>) -> Self {
        Self {
            src_path: src.to_path_buf(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Moves files into a user-recoverable location.
#[async_trait]
pub trait Trash: Send + Sync {
    async fn move_to_trash(&self, path: &Path) -> Result<TrashOutcome, TrashError>;
}

/// Moves files into the user's trash directory.
///
/// `~/.Trash` on macOS, `~/.local/share/Trash/files` elsewhere.
/// Cross-volume moves fall back to copy + unlink on EXDEV.
pub struct PlatformTrash {
    trash_dir: PathBuf,
}

impl Default for PlatformTrash {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformTrash {
    pub fn new() -> Self {
        Self {
            trash_dir: default_trash_dir(),
        }
    }

    /// Use an explicit trash directory (tests).
    pub fn with_dir(trash_dir: PathBuf) -> Self {
        Self { trash_dir }
    }
}

fn default_trash_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if cfg!(target_os = "macos") {
        home.join(".Trash")
    } else {
        home.join(".local").join("share").join("Trash").join("files")
    }
}

fn is_cross_device(e: &std::io::Error) -> bool {
    // EXDEV is 18 on both Linux and macOS.
    e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18)
}

#[async_trait]
impl Trash for PlatformTrash {
    async fn move_to_trash(&self, path: &Path) -> Result<TrashOutcome, TrashError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(TrashError::MissingSource(path.to_path_buf()));
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.trash_dir).await {
            return Ok(TrashOutcome::failed(
                path,
                format!("could not create trash dir: {e}"),
            ));
        }

        let dest = free_slot(&self.trash_dir, path).await;
        match tokio::fs::rename(path, &dest).await {
            Ok(()) => Ok(TrashOutcome::ok(path)),
            Err(e) if is_cross_device(&e) => {
                if let Err(e) = tokio::fs::copy(path, &dest).await {
                    return Ok(TrashOutcome::failed(path, format!("copy failed: {e}")));
                }
                if let Err(e) = tokio::fs::remove_file(path).await {
                    return Ok(TrashOutcome::failed(
                        path,
                        format!("copied to trash but unlink failed: {e}"),
                    ));
                }
                Ok(TrashOutcome::ok(path))
            }
            Err(e) => Ok(TrashOutcome::failed(path, e.to_string())),
        }
    }
}

/// First free `basename`, `stem_2.ext`, `stem_3.ext`, ... slot in `dir`.
async fn free_slot(dir: &Path, src: &Path) -> PathBuf {
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = utils::ext_with_dot(src);

    let mut n = 1u32;
    loop {
        let candidate = if n == 1 {
            format!("{stem}{ext}")
        } else {
            format!("{stem}_{n}{ext}")
        };
        let full = dir.join(candidate);
        if !tokio::fs::try_exists(&full).await.unwrap_or(false) {
            return full;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_moves_file_into_trash_dir() {
        let work = tempdir().unwrap();
        let bin = tempdir().unwrap();
        let trash = PlatformTrash::with_dir(bin.path().to_path_buf());

        let victim = work.path().join("IMG_1234.heic");
        tokio::fs::write(&victim, b"img").await.unwrap();

        let outcome = trash.move_to_trash(&victim).await.unwrap();
        assert!(outcome.success);
        assert!(!victim.exists());
        assert!(bin.path().join("IMG_1234.heic").exists());
    }

    #[tokio::test]
    async fn test_collision_in_trash_gets_suffix() {
        let work = tempdir().unwrap();
        let bin = tempdir().unwrap();
        let trash = PlatformTrash::with_dir(bin.path().to_path_buf());

        tokio::fs::write(bin.path().join("a.png"), b"old").await.unwrap();
        let victim = work.path().join("a.png");
        tokio::fs::write(&victim, b"new").await.unwrap();

        let outcome = trash.move_to_trash(&victim).await.unwrap();
        assert!(outcome.success);
        assert!(bin.path().join("a_2.png").exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_an_error() {
        let bin = tempdir().unwrap();
        let trash = PlatformTrash::with_dir(bin.path().to_path_buf());

        let result = trash.move_to_trash(Path::new("/no/such/file.png")).await;
        assert!(matches!(result, Err(TrashError::MissingSource(_))));
    }
}
