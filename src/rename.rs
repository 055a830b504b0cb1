//! Output-name generation with in-flight target reservation.
//!
//! Concurrent pipelines writing into the same directory must never pick
//! the same destination. Instead of a lock per file, a process-local set
//! of reserved absolute paths arbitrates: the first pipeline to insert a
//! path owns it, everyone else advances to `_2`, `_3`, ... The
//! [`Reservation`] guard releases its slot on drop, which is how callers
//! satisfy the release-always contract.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::Profile;
use crate::template::{self, TemplateContext};
use crate::utils;

/// A reserved destination path. Dropping it frees the slot.
pub struct Reservation {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    target: PathBuf,
}

impl Reservation {
    /// Basename of the reserved destination.
    pub fn filename(&self) -> String {
        self.target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Absolute reserved destination path.
    pub fn path(&self) -> &Path {
        &self.target
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        utils::lock(&self.set).remove(&self.target);
    }
}

/// Generates destination names for rename pipelines.
#[derive(Clone, Default)]
pub struct RenameService {
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl RenameService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand the profile template for `src` and reserve the first free
    /// destination slot in the source directory.
    ///
    /// A slot is free when it is neither on disk nor reserved by another
    /// in-flight pipeline; occupied slots advance `{name}_{n}{ext}` for
    /// n = 2, 3, ...
    pub async fn target_for_profile(
        &self,
        src: &Path,
        ctx: &TemplateContext<'_>,
        profile: &Profile,
    ) -> Reservation {
        let dir = src.parent().unwrap_or(Path::new("."));
        let template = if profile.template.trim().is_empty() {
            template::DEFAULT_TEMPLATE
        } else {
            profile.template.as_str()
        };
        let base = template::expand_name(template, ctx);
        let (stem, ext) = split_name(&base);

        let mut n = 1u32;
        loop {
            let candidate = if n == 1 {
                base.clone()
            } else {
                format!("{stem}_{n}{ext}")
            };
            let full = dir.join(&candidate);

            let inserted = utils::lock(&self.in_flight).insert(full.clone());
            if inserted {
                if tokio::fs::try_exists(&full).await.unwrap_or(false) {
                    // Already on disk; give the slot back and advance.
                    utils::lock(&self.in_flight).remove(&full);
                } else {
                    return Reservation {
                        set: self.in_flight.clone(),
                        target: full,
                    };
                }
            }
            n += 1;
        }
    }

    /// False when `basename` is already in the canonical shape for this
    /// profile, i.e. renaming it again would be a no-op.
    pub fn needs_rename_for_profile(&self, basename: &str, profile: &Profile) -> bool {
        !template::matches_default_format(basename, &profile.prefix)
    }

    #[cfg(test)]
    fn reserved_count(&self) -> usize {
        utils::lock(&self.in_flight).len()
    }
}

fn split_name(name: &str) -> (String, String) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (name[..idx].to_string(), name[idx..].to_string()),
        _ => (name.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn test_profile() -> Profile {
        Profile {
            id: "screenshots".into(),
            pattern: "Screenshot*".into(),
            prefix: "Screenshot".into(),
            ..Profile::default()
        }
    }

    fn ctx<'a>(src: &'a Path) -> TemplateContext<'a> {
        TemplateContext {
            birthtime: chrono::Local
                .with_ymd_and_hms(2025, 10, 30, 9, 0, 0)
                .unwrap(),
            original_path: src,
            ext: ".png",
            prefix: "Screenshot",
            counter: None,
        }
    }

    #[tokio::test]
    async fn test_reserves_expanded_template_name() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("Screenshot 1.png");
        let service = RenameService::new();

        let reservation = service
            .target_for_profile(&src, &ctx(&src), &test_profile())
            .await;
        assert_eq!(reservation.filename(), "Screenshot_2025-10-30_09-00-00.png");
        assert_eq!(reservation.path().parent().unwrap(), dir.path());
    }

    #[tokio::test]
    async fn test_concurrent_reservations_are_distinct() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("Screenshot 1.png");
        let service = RenameService::new();
        let profile = test_profile();

        let first = service.target_for_profile(&src, &ctx(&src), &profile).await;
        let second = service.target_for_profile(&src, &ctx(&src), &profile).await;
        let third = service.target_for_profile(&src, &ctx(&src), &profile).await;

        assert_eq!(first.filename(), "Screenshot_2025-10-30_09-00-00.png");
        assert_eq!(second.filename(), "Screenshot_2025-10-30_09-00-00_2.png");
        assert_eq!(third.filename(), "Screenshot_2025-10-30_09-00-00_3.png");
    }

    #[tokio::test]
    async fn test_on_disk_collision_advances() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("Screenshot 1.png");
        tokio::fs::write(dir.path().join("Screenshot_2025-10-30_09-00-00.png"), b"x")
            .await
            .unwrap();
        let service = RenameService::new();

        let reservation = service
            .target_for_profile(&src, &ctx(&src), &test_profile())
            .await;
        assert_eq!(reservation.filename(), "Screenshot_2025-10-30_09-00-00_2.png");
    }

    #[tokio::test]
    async fn test_drop_releases_slot() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("Screenshot 1.png");
        let service = RenameService::new();
        let profile = test_profile();

        let first = service.target_for_profile(&src, &ctx(&src), &profile).await;
        assert_eq!(service.reserved_count(), 1);
        drop(first);
        assert_eq!(service.reserved_count(), 0);

        // The freed slot is handed out again.
        let again = service.target_for_profile(&src, &ctx(&src), &profile).await;
        assert_eq!(again.filename(), "Screenshot_2025-10-30_09-00-00.png");
    }

    #[test]
    fn test_needs_rename_is_idempotence_check() {
        let service = RenameService::new();
        let profile = test_profile();
        assert!(!service.needs_rename_for_profile("Screenshot_2025-10-30_09-00-00.png", &profile));
        assert!(!service.needs_rename_for_profile("Screenshot_2025-10-30_09-00-00_2.png", &profile));
        assert!(service.needs_rename_for_profile("Screenshot 1.png", &profile));
    }
}
