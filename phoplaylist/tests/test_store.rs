use bytes::Bytes;
use chrono::{Duration, Utc};
use phocache::MediaCache;
use phoplaylist::{Freshness, PlaylistPolicy, PlaylistStore, SyncOutcome};
use phosource::{FetchError, MediaKind, PhotoSource, RemoteItem};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn remote(id: &str, hours_old: i64) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        kind: MediaKind::Photo,
        mime_type: "image/jpeg".to_string(),
        created_at: Utc::now() - Duration::hours(hours_old),
        version: "v1".to_string(),
        filename: None,
        download_url: None,
    }
}

/// Album de test en mémoire
#[derive(Debug, Default)]
struct FakeAlbum {
    items: Mutex<Vec<RemoteItem>>,
    failing: Mutex<HashSet<String>>,
    list_error: Mutex<bool>,
    list_delay: Option<std::time::Duration>,
    payload: usize,
    fetches: AtomicUsize,
}

impl FakeAlbum {
    fn with_items(items: Vec<RemoteItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Default::default()
        }
    }

    fn set_items(&self, items: Vec<RemoteItem>) {
        *self.items.lock().unwrap() = items;
    }

    fn retain(&self, keep: impl Fn(&RemoteItem) -> bool) {
        self.items.lock().unwrap().retain(|i| keep(i));
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PhotoSource for FakeAlbum {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_items(&self) -> phosource::Result<Vec<RemoteItem>> {
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if *self.list_error.lock().unwrap() {
            return Err(FetchError::Unreachable("album offline".to_string()));
        }
        Ok(self.items.lock().unwrap().clone())
    }

    async fn fetch(&self, item: &RemoteItem) -> phosource::Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&item.id) {
            return Err(FetchError::Unreachable(format!("cannot fetch {}", item.id)));
        }
        let mut content = format!("{}-{}", item.id, item.version).into_bytes();
        if self.payload > 0 {
            content.resize(self.payload, b'.');
        }
        Ok(Bytes::from(content))
    }
}

struct Fixture {
    dir: TempDir,
    album: Arc<FakeAlbum>,
    cache: Arc<MediaCache>,
    store: PlaylistStore,
}

fn policy(min_size: usize, max_size: usize) -> PlaylistPolicy {
    PlaylistPolicy {
        min_size,
        max_size,
        fresh_retention_secs: 14 * 24 * 3600,
    }
}

async fn fixture(album: FakeAlbum, policy: PlaylistPolicy, capacity: u64) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let album = Arc::new(album);
    let cache = Arc::new(
        MediaCache::open(dir.path().join("media"), capacity, std::time::Duration::from_secs(5))
            .await
            .unwrap(),
    );
    let store = PlaylistStore::open(
        album.clone(),
        cache.clone(),
        policy,
        dir.path().join("playlist").join("catalog.db"),
    )
    .unwrap();
    Fixture {
        dir,
        album,
        cache,
        store,
    }
}

fn ids(store: &PlaylistStore) -> Vec<String> {
    store.snapshot().ids().map(String::from).collect()
}

#[tokio::test]
async fn test_refresh_twice_yields_identical_snapshot() {
    let items = (0..5).map(|i| remote(&format!("p{}", i), i)).collect();
    let f = fixture(FakeAlbum::with_items(items), policy(2, 10), 10_000).await;

    let first = f.store.refresh().await.unwrap();
    assert_eq!(first.outcome, SyncOutcome::Completed);
    assert_eq!(first.added, 5);
    assert_eq!(first.playlist_len, 5);
    let snapshot = f.store.snapshot();

    let second = f.store.refresh().await.unwrap();
    assert_eq!(second.outcome, SyncOutcome::Unchanged);
    assert_eq!(second.added, 0);
    assert_eq!(f.store.snapshot().to_bytes(), snapshot.to_bytes());
    assert_eq!(f.store.snapshot().generation(), snapshot.generation());

    // Aucun re-téléchargement
    assert_eq!(f.album.fetches(), 5);
}

#[tokio::test]
async fn test_selection_is_newest_first_and_bounded() {
    let items = (0..12).map(|i| remote(&format!("p{:02}", i), i)).collect();
    let f = fixture(FakeAlbum::with_items(items), policy(3, 10), 10_000).await;

    let report = f.store.refresh().await.unwrap();
    assert_eq!(report.playlist_len, 10);
    assert_eq!(report.degraded, None);

    let expected: Vec<String> = (0..10).map(|i| format!("p{:02}", i)).collect();
    assert_eq!(ids(&f.store), expected);
    assert!(f.store.snapshot().entries().iter().all(|e| e.fresh));
}

#[tokio::test]
async fn test_degraded_fill_uses_stale_items() {
    let mut items: Vec<RemoteItem> = (0..10).map(|i| remote(&format!("fresh{:02}", i), i)).collect();
    items.extend((0..40).map(|i| remote(&format!("stale{:02}", i), 24 * 30 + i)));
    let f = fixture(FakeAlbum::with_items(items), policy(30, 100), 1_000_000).await;

    let report = f.store.refresh().await.unwrap();
    assert_eq!(report.playlist_len, 30);
    let degraded = report.degraded.expect("degraded fill must be reported");
    assert_eq!(degraded.fresh, 10);
    assert_eq!(degraded.total, 30);
    assert_eq!(degraded.min_size, 30);

    let snapshot = f.store.snapshot();
    assert!(snapshot.entries()[..10].iter().all(|e| e.fresh));
    assert!(snapshot.entries()[10..].iter().all(|e| !e.fresh));
    assert_eq!(snapshot.get(10).unwrap().id, "stale00");
    assert_eq!(f.store.status().degraded, Some(degraded));
}

#[tokio::test]
async fn test_concurrent_sync_is_coalesced() {
    let album = FakeAlbum {
        items: Mutex::new(vec![remote("a", 1)]),
        list_delay: Some(std::time::Duration::from_millis(300)),
        ..Default::default()
    };
    let f = fixture(album, policy(1, 10), 10_000).await;
    let store = Arc::new(f.store);

    let running = {
        let store = store.clone();
        tokio::spawn(async move { store.refresh().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let second = store.update().await.unwrap();
    assert_eq!(second.outcome, SyncOutcome::Coalesced);

    let first = running.await.unwrap().unwrap();
    assert_eq!(first.outcome, SyncOutcome::Completed);
    assert_eq!(store.snapshot().len(), 1);
}

#[tokio::test]
async fn test_vanished_items_are_dropped_then_evicted() {
    let items = vec![remote("a", 1), remote("b", 2), remote("old", 24 * 30)];
    let f = fixture(FakeAlbum::with_items(items), policy(3, 10), 10_000).await;

    f.store.refresh().await.unwrap();
    assert_eq!(ids(&f.store), vec!["a", "b", "old"]);

    f.album.retain(|i| i.id != "old" && i.id != "b");
    let report = f.store.refresh().await.unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(ids(&f.store), vec!["a"]);
    // Première absence : le contenu reste en cache
    assert!(f.cache.lookup("old").await.is_some());

    f.store.refresh().await.unwrap();
    assert!(f.cache.lookup("old").await.is_none());
    assert_eq!(f.store.item("old").unwrap().freshness, Freshness::Evicted);

    // Encore dans la fenêtre de fraîcheur : conservé mais hors playlist
    assert!(f.cache.lookup("b").await.is_some());
    assert_ne!(f.store.item("b").unwrap().freshness, Freshness::Evicted);
    assert_eq!(ids(&f.store), vec!["a"]);
}

#[tokio::test]
async fn test_update_refetches_changed_content() {
    let f = fixture(
        FakeAlbum::with_items(vec![remote("a", 1), remote("b", 2)]),
        policy(1, 10),
        10_000,
    )
    .await;
    f.store.refresh().await.unwrap();
    assert_eq!(f.album.fetches(), 2);

    let unchanged = f.store.update().await.unwrap();
    assert_eq!(unchanged.outcome, SyncOutcome::Unchanged);
    assert_eq!(unchanged.refetched, 0);

    let mut items = f.album.items.lock().unwrap().clone();
    items[0].version = "v2".to_string();
    f.album.set_items(items);

    let report = f.store.update().await.unwrap();
    assert_eq!(report.refetched, 1);
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert_eq!(f.album.fetches(), 3);

    let entry = f.store.snapshot().get(0).cloned().unwrap();
    assert_eq!(entry.id, "a");
    assert_eq!(entry.version.as_deref(), Some("v2"));
    assert_eq!(std::fs::read(&entry.path).unwrap(), b"a-v2");
}

#[tokio::test]
async fn test_failed_fetch_is_skipped_for_the_cycle() {
    let album = FakeAlbum::with_items(vec![remote("a", 1), remote("b", 2), remote("c", 3)]);
    album.failing.lock().unwrap().insert("b".to_string());
    let f = fixture(album, policy(1, 2), 10_000).await;

    let report = f.store.refresh().await.unwrap();
    assert_eq!(ids(&f.store), vec!["a", "c"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, "b");
    assert!(!report.skipped[0].quota_exceeded);

    f.album.failing.lock().unwrap().clear();
    f.store.refresh().await.unwrap();
    assert_eq!(ids(&f.store), vec!["a", "b"]);
}

#[tokio::test]
async fn test_quota_exceeded_items_are_skipped() {
    let album = FakeAlbum {
        items: Mutex::new(vec![remote("a", 1), remote("b", 2), remote("c", 3)]),
        payload: 10,
        ..Default::default()
    };
    let f = fixture(album, policy(1, 10), 25).await;

    let report = f.store.refresh().await.unwrap();
    assert_eq!(ids(&f.store), vec!["a", "b"]);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].quota_exceeded);
    assert!(f.cache.usage().await.used <= 25);

    // La playlist affichée est protégée contre l'éviction
    assert!(f.cache.is_live("a"));
    assert!(f.cache.is_live("b"));
}

#[tokio::test]
async fn test_load_restores_playlist_without_network() {
    let f = fixture(
        FakeAlbum::with_items(vec![remote("a", 1), remote("b", 2)]),
        policy(1, 10),
        10_000,
    )
    .await;
    f.store.refresh().await.unwrap();
    let expected = f.store.snapshot().to_bytes();
    let fetches = f.album.fetches();

    let restarted = PlaylistStore::open(
        f.album.clone(),
        f.cache.clone(),
        policy(1, 10),
        f.dir.path().join("playlist").join("catalog.db"),
    )
    .unwrap();
    assert!(restarted.snapshot().is_empty());

    let report = restarted.load().await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert_eq!(restarted.snapshot().to_bytes(), expected);
    assert_eq!(f.album.fetches(), fetches);
}

#[tokio::test]
async fn test_empty_album_keeps_current_playlist() {
    let f = fixture(
        FakeAlbum::with_items(vec![remote("a", 1), remote("b", 2)]),
        policy(1, 10),
        10_000,
    )
    .await;
    f.store.refresh().await.unwrap();
    let before = f.store.snapshot();

    f.album.set_items(Vec::new());
    let report = f.store.refresh().await.unwrap();
    assert!(report.album_empty);
    assert_eq!(report.outcome, SyncOutcome::Unchanged);
    assert_eq!(f.store.snapshot().to_bytes(), before.to_bytes());
    assert!(f.cache.lookup("a").await.is_some());
}

#[tokio::test]
async fn test_listing_error_keeps_last_snapshot() {
    let f = fixture(FakeAlbum::with_items(vec![remote("a", 1)]), policy(1, 10), 10_000).await;
    f.store.refresh().await.unwrap();

    *f.album.list_error.lock().unwrap() = true;
    let err = f.store.refresh().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(ids(&f.store), vec!["a"]);
    assert_eq!(f.store.snapshot().generation(), 1);
}

#[tokio::test]
async fn test_invalid_policy_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(
        MediaCache::open(dir.path().join("media"), 100, std::time::Duration::from_secs(5))
            .await
            .unwrap(),
    );
    let result = PlaylistStore::open(
        Arc::new(FakeAlbum::default()),
        cache,
        policy(10, 5),
        dir.path().join("catalog.db"),
    );
    assert!(matches!(result, Err(phoplaylist::Error::InvalidPolicy(_))));
}
