//! Common utilities shared across modules.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

/// Get current UTC timestamp in milliseconds since UNIX_EPOCH.
///
/// Uses chrono for accurate cross-platform timestamps.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Extension of a path with its leading dot, original casing preserved.
///
/// Returns an empty string for paths without an extension.
pub fn ext_with_dot(path: &std::path::Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Lock a mutex, recovering the inner value if a panicking holder poisoned it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_now_millis() {
        let ts = now_millis();
        // Should be a reasonable Unix timestamp in ms (after 2020)
        assert!(ts > 1_577_836_800_000, "Timestamp should be after 2020-01-01");
    }

    #[test]
    fn test_ext_with_dot() {
        assert_eq!(ext_with_dot(Path::new("/a/b/IMG.HEIC")), ".HEIC");
        assert_eq!(ext_with_dot(Path::new("/a/b/noext")), "");
        assert_eq!(ext_with_dot(Path::new("photo.tar.gz")), ".gz");
    }
}
