use bytes::Bytes;
use chrono::Utc;
use phocache::{cache_key, CacheError, MediaCache};
use phosource::{FetchError, MediaKind, PhotoSource, RemoteItem};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn item(id: &str) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        kind: MediaKind::Photo,
        mime_type: "image/jpeg".to_string(),
        created_at: Utc::now(),
        version: "v1".to_string(),
        filename: None,
        download_url: None,
    }
}

fn bytes(len: usize) -> Bytes {
    Bytes::from(vec![7u8; len])
}

async fn create_test_cache(capacity: u64) -> (TempDir, MediaCache) {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = MediaCache::open(temp_dir.path(), capacity, Duration::from_secs(5))
        .await
        .unwrap();
    (temp_dir, cache)
}

fn none() -> HashSet<String> {
    HashSet::new()
}

/// Source de test comptant les téléchargements
#[derive(Debug, Default)]
struct CountingSource {
    fetches: AtomicUsize,
    delay: Option<Duration>,
    fail: bool,
}

#[async_trait::async_trait]
impl PhotoSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn list_items(&self) -> phosource::Result<Vec<RemoteItem>> {
        Ok(Vec::new())
    }

    async fn fetch(&self, item: &RemoteItem) -> phosource::Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(FetchError::Unreachable("offline".to_string()));
        }
        Ok(Bytes::from(item.id.clone().into_bytes()))
    }
}

#[tokio::test]
async fn test_admitting_third_item_evicts_oldest() {
    let (_dir, cache) = create_test_cache(100).await;

    let a = cache.admit(&item("A"), bytes(40), &none()).await.unwrap();
    cache.admit(&item("B"), bytes(40), &none()).await.unwrap();
    let c = cache.admit(&item("C"), bytes(40), &none()).await.unwrap();

    assert_eq!(c.evicted, vec!["A".to_string()]);
    assert!(!a.path.exists());
    assert!(cache.lookup("A").await.is_none());
    assert!(cache.lookup("B").await.is_some());
    assert!(cache.lookup("C").await.is_some());

    let usage = cache.usage().await;
    assert_eq!(usage.used, 80);
    assert!(usage.used <= usage.capacity);
}

#[tokio::test]
async fn test_live_items_are_never_evicted() {
    let (_dir, cache) = create_test_cache(100).await;

    cache.admit(&item("A"), bytes(40), &none()).await.unwrap();
    cache.admit(&item("B"), bytes(40), &none()).await.unwrap();
    cache.set_live(vec!["A".to_string()]);

    let c = cache.admit(&item("C"), bytes(40), &none()).await.unwrap();
    assert_eq!(c.evicted, vec!["B".to_string()]);
    assert!(cache.lookup("A").await.is_some());
}

#[tokio::test]
async fn test_quota_exceeded_when_everything_is_in_use() {
    let (_dir, cache) = create_test_cache(100).await;

    cache.admit(&item("A"), bytes(40), &none()).await.unwrap();
    cache.admit(&item("B"), bytes(40), &none()).await.unwrap();
    cache.set_live(vec!["A".to_string()]);
    let reserved: HashSet<String> = ["B".to_string()].into_iter().collect();

    let err = cache.admit(&item("C"), bytes(40), &reserved).await.unwrap_err();
    assert!(err.is_quota_exceeded());

    // Rien n'a bougé
    assert!(cache.lookup("A").await.is_some());
    assert!(cache.lookup("B").await.is_some());
    assert!(cache.lookup("C").await.is_none());
    assert_eq!(cache.usage().await.used, 80);
}

#[tokio::test]
async fn test_item_larger_than_capacity_is_refused() {
    let (_dir, cache) = create_test_cache(100).await;
    let err = cache.admit(&item("big"), bytes(101), &none()).await.unwrap_err();
    assert!(matches!(err, CacheError::QuotaExceeded { requested: 101, .. }));
    assert_eq!(cache.usage().await.entries, 0);
}

#[tokio::test]
async fn test_touch_refreshes_lru_order() {
    let (_dir, cache) = create_test_cache(100).await;

    cache.admit(&item("A"), bytes(40), &none()).await.unwrap();
    cache.admit(&item("B"), bytes(40), &none()).await.unwrap();
    assert!(cache.touch("A").await.unwrap());

    let c = cache.admit(&item("C"), bytes(40), &none()).await.unwrap();
    assert_eq!(c.evicted, vec!["B".to_string()]);
}

#[tokio::test]
async fn test_replacing_an_entry_accounts_for_size_delta() {
    let (_dir, cache) = create_test_cache(100).await;

    cache.admit(&item("A"), bytes(60), &none()).await.unwrap();
    cache.set_live(vec!["A".to_string()]);

    let mut changed = item("A");
    changed.version = "v2".to_string();
    let admission = cache.admit(&changed, bytes(90), &none()).await.unwrap();

    assert!(admission.evicted.is_empty());
    assert_eq!(std::fs::read(&admission.path).unwrap().len(), 90);
    assert_eq!(cache.usage().await.used, 90);
    assert_eq!(cache.lookup("A").await.unwrap().version.as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_concurrent_admissions_respect_capacity() {
    let (_dir, cache) = create_test_cache(100).await;
    let cache = Arc::new(cache);

    let mut handles = Vec::new();
    for i in 0..20 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let _ = cache.admit(&item(&format!("item{}", i)), bytes(30), &HashSet::new()).await;
            cache.usage().await.used
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap() <= 100);
    }

    let usage = cache.usage().await;
    assert_eq!(usage.entries, 3);
    assert_eq!(usage.used, 90);
}

#[tokio::test]
async fn test_ensure_fetches_only_when_absent() {
    let (_dir, cache) = create_test_cache(1000).await;
    let source = CountingSource::default();

    let first = cache.ensure(&item("A"), &source, &none()).await.unwrap();
    assert!(first.fetched);
    assert_eq!(std::fs::read(&first.path).unwrap(), b"A");

    let second = cache.ensure(&item("A"), &source, &none()).await.unwrap();
    assert!(!second.fetched);
    assert_eq!(second.path, first.path);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ensure_surfaces_fetch_errors() {
    let (_dir, cache) = create_test_cache(1000).await;
    let source = CountingSource {
        fail: true,
        ..Default::default()
    };

    let err = cache.ensure(&item("A"), &source, &none()).await.unwrap_err();
    assert!(matches!(err, CacheError::Fetch(FetchError::Unreachable(_))));
    assert!(cache.lookup("A").await.is_none());
}

#[tokio::test]
async fn test_ensure_times_out() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = MediaCache::open(temp_dir.path(), 1000, Duration::from_millis(50))
        .await
        .unwrap();
    let source = CountingSource {
        delay: Some(Duration::from_secs(5)),
        ..Default::default()
    };

    let err = cache.ensure(&item("slow"), &source, &none()).await.unwrap_err();
    assert!(matches!(err, CacheError::Fetch(FetchError::Timeout(_))));
}

#[tokio::test]
async fn test_ledger_survives_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    {
        let cache = MediaCache::open(temp_dir.path(), 100, Duration::from_secs(5))
            .await
            .unwrap();
        cache.admit(&item("A"), bytes(40), &none()).await.unwrap();
        cache.admit(&item("B"), bytes(40), &none()).await.unwrap();
        cache.touch("A").await.unwrap();
    }

    let cache = MediaCache::open(temp_dir.path(), 100, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(cache.usage().await.used, 80);
    assert_eq!(cache.lookup("A").await.unwrap().version.as_deref(), Some("v1"));

    // L'ordre LRU est conservé : B est le plus ancien
    let c = cache.admit(&item("C"), bytes(40), &none()).await.unwrap();
    assert_eq!(c.evicted, vec!["B".to_string()]);
}

#[tokio::test]
async fn test_open_drops_missing_files_and_orphans() {
    let temp_dir = tempfile::tempdir().unwrap();
    {
        let cache = MediaCache::open(temp_dir.path(), 100, Duration::from_secs(5))
            .await
            .unwrap();
        let a = cache.admit(&item("A"), bytes(10), &none()).await.unwrap();
        cache.admit(&item("B"), bytes(10), &none()).await.unwrap();
        std::fs::remove_file(a.path).unwrap();
    }
    std::fs::write(temp_dir.path().join("stray.jpg"), b"x").unwrap();
    std::fs::write(temp_dir.path().join("C.jpg.part"), b"partial").unwrap();

    let cache = MediaCache::open(temp_dir.path(), 100, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(cache.lookup("A").await.is_none());
    assert!(cache.lookup("B").await.is_some());
    assert_eq!(cache.ledger_count().unwrap(), 1);
    assert!(!temp_dir.path().join("stray.jpg").exists());
    assert!(!temp_dir.path().join("C.jpg.part").exists());
}

#[tokio::test]
async fn test_corrupt_ledger_is_rebuilt_from_files() {
    let temp_dir = tempfile::tempdir().unwrap();
    {
        let cache = MediaCache::open(temp_dir.path(), 100, Duration::from_secs(5))
            .await
            .unwrap();
        cache.admit(&item("A"), bytes(10), &none()).await.unwrap();
        cache.admit(&item("B"), bytes(20), &none()).await.unwrap();
    }
    std::fs::write(temp_dir.path().join("ledger.db"), vec![0x42u8; 4096]).unwrap();

    let cache = MediaCache::open(temp_dir.path(), 100, Duration::from_secs(5))
        .await
        .unwrap();
    let usage = cache.usage().await;
    assert_eq!(usage.entries, 2);
    assert_eq!(usage.used, 30);

    // La version est inconnue après reconstruction
    let a = cache.lookup("A").await.unwrap();
    assert_eq!(a.version, None);
    assert_eq!(a.extension, "jpg");
}

#[tokio::test]
async fn test_reduced_capacity_is_enforced_at_open() {
    let temp_dir = tempfile::tempdir().unwrap();
    {
        let cache = MediaCache::open(temp_dir.path(), 100, Duration::from_secs(5))
            .await
            .unwrap();
        cache.admit(&item("A"), bytes(40), &none()).await.unwrap();
        cache.admit(&item("B"), bytes(40), &none()).await.unwrap();
    }

    let cache = MediaCache::open(temp_dir.path(), 50, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(cache.lookup("A").await.is_none());
    assert!(cache.lookup("B").await.is_some());
    assert!(cache.usage().await.used <= 50);
}

#[tokio::test]
async fn test_remove_refuses_live_items() {
    let (_dir, cache) = create_test_cache(100).await;
    cache.admit(&item("A"), bytes(10), &none()).await.unwrap();
    cache.set_live(vec!["A".to_string()]);

    assert!(!cache.remove("A").await.unwrap());
    cache.set_live(Vec::new());
    assert!(cache.remove("A").await.unwrap());
    assert_eq!(cache.usage().await.used, 0);
}

#[tokio::test]
async fn test_rebuild_drops_hashed_files_and_readmission_is_counted_once() {
    let temp_dir = tempfile::tempdir().unwrap();
    let photo = item("IMG 1.jpg");
    {
        let cache = MediaCache::open(temp_dir.path(), 100, Duration::from_secs(5))
            .await
            .unwrap();
        cache.admit(&photo, bytes(40), &none()).await.unwrap();
        cache.admit(&item("B"), bytes(10), &none()).await.unwrap();
    }
    std::fs::write(temp_dir.path().join("ledger.db"), vec![0x42u8; 4096]).unwrap();

    let cache = MediaCache::open(temp_dir.path(), 100, Duration::from_secs(5))
        .await
        .unwrap();
    let usage = cache.usage().await;
    assert_eq!(usage.entries, 1);
    assert_eq!(usage.used, 10);
    assert!(cache.lookup("B").await.is_some());
    let hashed = temp_dir
        .path()
        .join(format!("{}.jpg", cache_key("IMG 1.jpg")));
    assert!(!hashed.exists());

    // Réadmis puis affiché : compté une seule fois et jamais évincé
    let admission = cache.admit(&photo, bytes(40), &none()).await.unwrap();
    cache.set_live(vec!["IMG 1.jpg".to_string()]);
    assert_eq!(cache.usage().await.used, 50);
    assert_eq!(cache.usage().await.entries, 2);

    cache.admit(&item("C"), bytes(50), &none()).await.unwrap();
    let d = cache.admit(&item("D"), bytes(40), &none()).await.unwrap();
    assert_eq!(d.evicted, vec!["B".to_string(), "C".to_string()]);
    assert!(admission.path.exists());
    assert_eq!(cache.usage().await.used, 80);
}

#[tokio::test]
async fn test_replaced_file_is_kept_while_displayed() {
    let (_dir, cache) = create_test_cache(100).await;
    let jpeg = cache.admit(&item("A"), bytes(30), &none()).await.unwrap();
    cache.set_live(vec!["A".to_string()]);

    let png_item = RemoteItem {
        mime_type: "image/png".to_string(),
        version: "v2".to_string(),
        ..item("A")
    };
    let png = cache.admit(&png_item, bytes(20), &none()).await.unwrap();
    assert_ne!(jpeg.path, png.path);
    assert!(jpeg.path.exists());
    assert!(png.path.exists());
    let usage = cache.usage().await;
    assert_eq!(usage.entries, 1);
    assert_eq!(usage.used, 50);

    // Toujours affiché : rien n'est libéré
    cache.release_retired().await;
    assert!(jpeg.path.exists());

    cache.set_live(Vec::new());
    cache.release_retired().await;
    assert!(!jpeg.path.exists());
    assert!(png.path.exists());
    assert_eq!(cache.usage().await.used, 20);
}
