//! The single choke point for disk mutation.
//!
//! Every rename in the pipeline funnels through [`atomic_rename`] so the
//! retry discipline for transient filesystem errors lives in one place.
//! [`is_stable`] gates watcher candidates until their size stops moving.

use std::io;
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

/// Interval between size probes while waiting for a file to settle.
pub const STABILITY_POLL_MS: u64 = 250;

/// Total time after which a still-changing file is treated as stable anyway.
pub const STABILITY_IDLE_BUDGET_MS: u64 = 750;

const RENAME_MAX_ATTEMPTS: u32 = 10;

/// Wait until `path` has the same size across two consecutive probes, or
/// until the idle budget elapses.
///
/// Returns `Ok(false)` when the file disappears mid-probe (another actor
/// moved or deleted it); that is not an error. Other stat failures
/// propagate.
pub async fn is_stable(path: &Path) -> io::Result<bool> {
    let mut last_size: Option<u64> = None;
    let mut waited_ms = 0u64;
    loop {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if last_size == Some(size) {
            return Ok(true);
        }
        if waited_ms >= STABILITY_IDLE_BUDGET_MS {
            return Ok(true);
        }
        last_size = Some(size);
        sleep(Duration::from_millis(STABILITY_POLL_MS)).await;
        waited_ms += STABILITY_POLL_MS;
    }
}

/// Rename `from` to `to`, creating the target's parent directory first.
///
/// EBUSY retries with a 50-150 ms jittered backoff and short-lived ENOENT
/// with 150-400 ms, up to 10 attempts. All other errors surface
/// immediately.
pub async fn atomic_rename(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < RENAME_MAX_ATTEMPTS && is_busy(&e) => {
                sleep(jitter_ms(50, 150)).await;
            }
            Err(e) if attempt < RENAME_MAX_ATTEMPTS && e.kind() == io::ErrorKind::NotFound => {
                sleep(jitter_ms(150, 400)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_busy(e: &io::Error) -> bool {
    // EBUSY is 16 on both Linux and macOS.
    e.kind() == io::ErrorKind::ResourceBusy || e.raw_os_error() == Some(16)
}

fn jitter_ms(lo: u64, hi: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_is_stable_settled_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settled.png");
        tokio::fs::write(&path, b"content").await.unwrap();

        assert!(is_stable(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_stable_missing_file_is_false_not_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ghost.png");

        assert!(!is_stable(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_atomic_rename_creates_parent() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.txt");
        let to = dir.path().join("nested/deep/b.txt");
        tokio::fs::write(&from, b"x").await.unwrap();

        atomic_rename(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"x");
    }
}
