//! Persisted config invariants: dedup, primary-dir, default profiles,
//! structural fallback, and atomic-write behavior.

use tempfile::tempdir;

use namefix::config::{Config, ConfigPatch, ConfigStore};

#[tokio::test]
async fn missing_file_is_replaced_with_defaults() {
    let root = tempdir().unwrap();
    let path = root.path().join("config.json");
    let store = ConfigStore::new(path.clone());

    let config = store.get().await.unwrap();
    assert!(config.dry_run, "safe by default");
    assert!(path.exists(), "defaults persisted on first load");

    let ids: Vec<&str> = config.profiles.iter().map(|p| p.id.as_str()).collect();
    assert!(ids.contains(&"heic-convert"));
    assert!(ids.contains(&"screenshots"));
    assert!(ids.contains(&"screen-recordings"));
}

#[tokio::test]
async fn invalid_json_is_rewritten_with_defaults() {
    let root = tempdir().unwrap();
    let path = root.path().join("config.json");
    tokio::fs::write(&path, b"{not json at all").await.unwrap();

    let store = ConfigStore::new(path.clone());
    let config = store.get().await.unwrap();
    assert!(config.dry_run);

    let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&on_disk).is_ok());
}

#[tokio::test]
async fn structurally_invalid_file_is_left_untouched() {
    let root = tempdir().unwrap();
    let path = root.path().join("config.json");
    let broken = r#"{"watchDirs": 42}"#;
    tokio::fs::write(&path, broken).await.unwrap();

    let store = ConfigStore::new(path.clone());
    let config = store.get().await.unwrap();
    assert!(config.watch_dirs.is_empty(), "defaults in memory");

    let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(on_disk, broken, "file kept for manual repair");
}

#[tokio::test]
async fn set_dedups_dirs_and_keeps_primary_invariant() {
    let root = tempdir().unwrap();
    let store = ConfigStore::new(root.path().join("config.json"));

    let a = root.path().join("a").to_string_lossy().into_owned();
    let b = root.path().join("b").to_string_lossy().into_owned();
    let config = store
        .set(ConfigPatch {
            watch_dirs: Some(vec![a.clone(), b.clone(), a.clone(), "  ".into()]),
            ..ConfigPatch::default()
        })
        .await
        .unwrap();

    assert_eq!(config.watch_dirs, vec![a.clone(), b]);
    assert_eq!(config.watch_dir, a);

    // The persisted copy satisfies the same invariant.
    let store2 = ConfigStore::new(root.path().join("config.json"));
    let reloaded = store2.get().await.unwrap();
    assert_eq!(reloaded.watch_dirs, config.watch_dirs);
    assert_eq!(reloaded.watch_dir, reloaded.watch_dirs[0]);
}

#[tokio::test]
async fn default_profiles_appear_exactly_once_after_reload() {
    let root = tempdir().unwrap();
    let store = ConfigStore::new(root.path().join("config.json"));
    store.get().await.unwrap();

    let store2 = ConfigStore::new(root.path().join("config.json"));
    let config = store2.get().await.unwrap();
    for id in ["heic-convert", "screenshots", "screen-recordings"] {
        let count = config.profiles.iter().filter(|p| p.id == id).count();
        assert_eq!(count, 1, "{id} must appear exactly once");
    }
}

#[tokio::test]
async fn set_of_get_is_byte_stable() {
    let root = tempdir().unwrap();
    let path = root.path().join("config.json");
    let store = ConfigStore::new(path.clone());

    let config = store.get().await.unwrap();
    let before = tokio::fs::read(&path).await.unwrap();
    store.set(ConfigPatch::from(config)).await.unwrap();
    let after = tokio::fs::read(&path).await.unwrap();

    assert_eq!(before, after);
}

#[tokio::test]
async fn on_change_delivers_eagerly_and_on_set() {
    use std::sync::{Arc, Mutex};

    let root = tempdir().unwrap();
    let store = ConfigStore::new(root.path().join("config.json"));
    store.get().await.unwrap();

    let seen: Arc<Mutex<Vec<Config>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = store.on_change(move |config| {
        sink.lock().unwrap().push(config.clone());
    });

    assert_eq!(seen.lock().unwrap().len(), 1, "eager delivery when loaded");

    store
        .set(ConfigPatch {
            theme: Some("dark".into()),
            ..ConfigPatch::default()
        })
        .await
        .unwrap();
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].theme, "dark");
    }

    drop(subscription);
    store
        .set(ConfigPatch {
            theme: Some("light".into()),
            ..ConfigPatch::default()
        })
        .await
        .unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2, "unsubscribed");
}

#[cfg(unix)]
#[tokio::test]
async fn persisted_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let root = tempdir().unwrap();
    let path = root.path().join("config.json");
    let store = ConfigStore::new(path.clone());
    store.get().await.unwrap();

    let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
