//! Append-only NDJSON journal of applied renames and conversions.
//!
//! The journal is the sole authority for undo order: one line per applied
//! `(from, to)` pair, undone strictly LIFO. An entry is only removed once
//! its reverse rename has actually succeeded, so a failed undo can simply
//! be retried.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{fs_safe, paths, utils};

/// Filename under the state directory.
pub const JOURNAL_FILE_NAME: &str = "journal.ndjson";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One applied operation, in append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub from: String,
    pub to: String,
    pub ts: u64,
}

/// Result of an undo attempt, mirrored onto the bridge as `{ok, reason}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UndoOutcome {
    fn done() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Append-only log with LIFO undo.
pub struct JournalStore {
    path: PathBuf,
    cache: Option<Vec<JournalEntry>>,
}

impl JournalStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, cache: None }
    }

    pub fn at_default_location() -> Self {
        Self::new(paths::state_dir().join(JOURNAL_FILE_NAME))
    }

    /// Number of undoable entries.
    pub async fn len(&mut self) -> Result<usize, JournalError> {
        self.ensure_loaded().await?;
        Ok(self.cache.as_ref().map(|c| c.len()).unwrap_or(0))
    }

    pub async fn is_empty(&mut self) -> Result<bool, JournalError> {
        Ok(self.len().await? == 0)
    }

    /// Append one applied operation.
    pub async fn record(&mut self, from: &Path, to: &Path) -> Result<(), JournalError> {
        let entry = JournalEntry {
            from: from.to_string_lossy().into_owned(),
            to: to.to_string_lossy().into_owned(),
            ts: utils::now_millis(),
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        if let Some(cache) = &mut self.cache {
            cache.push(entry);
        }
        Ok(())
    }

    /// Undo the most recent entry.
    ///
    /// The journal is rewritten only after the reverse rename succeeds; on
    /// failure the entry stays in place so the undo can be retried.
    pub async fn undo(&mut self) -> UndoOutcome {
        if let Err(e) = self.ensure_loaded().await {
            return UndoOutcome::failed(e.to_string());
        }
        let last = match self.cache.as_ref().and_then(|c| c.last()).cloned() {
            Some(entry) => entry,
            None => return UndoOutcome::failed("empty"),
        };

        let from = PathBuf::from(&last.from);
        let to = PathBuf::from(&last.to);
        let target = restore_target(&from).await;

        if let Err(e) = fs_safe::atomic_rename(&to, &target).await {
            return UndoOutcome::failed(format!(
                "could not restore {}: {e}",
                to.display()
            ));
        }

        if let Some(cache) = &mut self.cache {
            cache.pop();
        }
        if let Err(e) = self.rewrite().await {
            return UndoOutcome::failed(format!("journal rewrite failed: {e}"));
        }
        crate::log_event!(
            "journal",
            "undone",
            "{} -> {}",
            to.display(),
            target.display()
        );
        UndoOutcome::done()
    }

    async fn ensure_loaded(&mut self) -> Result<(), JournalError> {
        if self.cache.is_some() {
            return Ok(());
        }
        let entries = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| match serde_json::from_str::<JournalEntry>(line) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        tracing::warn!("skipping malformed journal line: {e}");
                        None
                    }
                })
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        self.cache = Some(entries);
        Ok(())
    }

    /// Atomically rewrite the backing file from the cache.
    async fn rewrite(&self) -> Result<(), JournalError> {
        let entries = self.cache.as_deref().unwrap_or_default();
        let mut contents = String::new();
        for entry in entries {
            contents.push_str(&serde_json::to_string(entry)?);
            contents.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("ndjson.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Where to put a restored file: its original path if free, otherwise
/// `{base}_restored{ext}`, then `_restored_2`, `_restored_3`, ...
async fn restore_target(from: &Path) -> PathBuf {
    if !tokio::fs::try_exists(from).await.unwrap_or(false) {
        return from.to_path_buf();
    }
    let dir = from.parent().unwrap_or(Path::new("."));
    let stem = from
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = utils::ext_with_dot(from);

    let mut n = 1u32;
    loop {
        let candidate = if n == 1 {
            format!("{stem}_restored{ext}")
        } else {
            format!("{stem}_restored_{n}{ext}")
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
    async fn test_record_then_undo_restores_file() {
        let dir = tempdir().unwrap();
        let journal_path = dir.path().join("state/journal.ndjson");
        let mut journal = JournalStore::new(journal_path.clone());

        let from = dir.path().join("Screenshot 1.png");
        let to = dir.path().join("Screenshot_2025-10-30_09-00-00.png");
        tokio::fs::write(&to, b"img").await.unwrap();

        journal.record(&from, &to).await.unwrap();
        assert_eq!(journal.len().await.unwrap(), 1);

        let outcome = journal.undo().await;
        assert!(outcome.ok, "{outcome:?}");
        assert!(from.exists());
        assert!(!to.exists());
        assert_eq!(journal.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undo_is_lifo() {
        let dir = tempdir().unwrap();
        let mut journal = JournalStore::new(dir.path().join("journal.ndjson"));

        let a_from = dir.path().join("a.png");
        let a_to = dir.path().join("a_renamed.png");
        let b_from = dir.path().join("b.png");
        let b_to = dir.path().join("b_renamed.png");
        tokio::fs::write(&a_to, b"a").await.unwrap();
        tokio::fs::write(&b_to, b"b").await.unwrap();

        journal.record(&a_from, &a_to).await.unwrap();
        journal.record(&b_from, &b_to).await.unwrap();

        assert!(journal.undo().await.ok);
        assert!(b_from.exists(), "most recent entry undone first");
        assert!(!a_from.exists());

        assert!(journal.undo().await.ok);
        assert!(a_from.exists());
    }

    #[tokio::test]
    async fn test_undo_empty_reports_reason() {
        let dir = tempdir().unwrap();
        let mut journal = JournalStore::new(dir.path().join("journal.ndjson"));

        let outcome = journal.undo().await;
        assert!(!outcome.ok);
        assert_eq!(outcome.reason.as_deref(), Some("empty"));
    }

    #[tokio::test]
    async fn test_undo_collision_appends_restored_suffix() {
        let dir = tempdir().unwrap();
        let mut journal = JournalStore::new(dir.path().join("journal.ndjson"));

        let from = dir.path().join("photo.png");
        let to = dir.path().join("Photo_2025-10-30_09-00-00.png");
        tokio::fs::write(&to, b"new").await.unwrap();
        // The original slot got reoccupied in the meantime.
        tokio::fs::write(&from, b"occupied").await.unwrap();

        journal.record(&from, &to).await.unwrap();
        assert!(journal.undo().await.ok);

        assert!(dir.path().join("photo_restored.png").exists());
        assert_eq!(tokio::fs::read(&from).await.unwrap(), b"occupied");
    }

    #[tokio::test]
    async fn test_failed_undo_keeps_entry() {
        let dir = tempdir().unwrap();
        let mut journal = JournalStore::new(dir.path().join("journal.ndjson"));

        let from = dir.path().join("gone.png");
        let to = dir.path().join("gone_renamed.png");
        // `to` never exists, so the reverse rename keeps failing.
        journal.record(&from, &to).await.unwrap();

        let outcome = journal.undo().await;
        assert!(!outcome.ok);
        assert_eq!(journal.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cache_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.ndjson");

        let from = dir.path().join("x.png");
        let to = dir.path().join("y.png");
        tokio::fs::write(&to, b"y").await.unwrap();
        {
            let mut journal = JournalStore::new(path.clone());
            journal.record(&from, &to).await.unwrap();
        }
        // Fresh store reads the same file back.
        let mut journal = JournalStore::new(path);
        assert_eq!(journal.len().await.unwrap(), 1);
        assert!(journal.undo().await.ok);
        assert!(from.exists());
    }
}
