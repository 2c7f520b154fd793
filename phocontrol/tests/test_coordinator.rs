use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use phocache::MediaCache;
use phocontrol::{
    ActionReport, CommandSink, CommandSource, ControlCommand, ControlError, ControlRouter,
    ControllerHandle, ControllerSettings, Coordinator, CoordinatorAction, CoordinatorHandle,
    CoordinatorSettings, LogDisplay, PlayerController, PlayerStatus,
};
use phoplaylist::{PlaylistPolicy, PlaylistStore, SyncOutcome};
use phosource::{FetchError, MediaKind, PhotoSource, RemoteItem};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn remote(id: &str, version: &str) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        kind: MediaKind::Photo,
        mime_type: "image/jpeg".to_string(),
        created_at: Utc::now(),
        version: version.to_string(),
        filename: None,
        download_url: None,
    }
}

#[derive(Debug, Default)]
struct FakeAlbum {
    items: Mutex<Vec<RemoteItem>>,
    offline: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
    listings: AtomicUsize,
}

#[async_trait]
impl PhotoSource for FakeAlbum {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_items(&self) -> phosource::Result<Vec<RemoteItem>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable("album offline".to_string()));
        }
        Ok(self.items.lock().unwrap().clone())
    }

    async fn fetch(&self, item: &RemoteItem) -> phosource::Result<Bytes> {
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Bytes::from(format!("{}-{}", item.id, item.version)))
    }
}

struct Fixture {
    _dir: TempDir,
    album: Arc<FakeAlbum>,
    store: Arc<PlaylistStore>,
    controller: ControllerHandle,
    coordinator: CoordinatorHandle,
}

async fn fixture(items: Vec<RemoteItem>, settings: CoordinatorSettings) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let album = Arc::new(FakeAlbum {
        items: Mutex::new(items),
        ..Default::default()
    });
    let cache = Arc::new(
        MediaCache::open(dir.path().join("media"), 1 << 20, Duration::from_secs(5))
            .await
            .unwrap(),
    );
    let store = Arc::new(
        PlaylistStore::open(
            album.clone(),
            cache,
            PlaylistPolicy {
                min_size: 1,
                max_size: 10,
                fresh_retention_secs: 3600,
            },
            dir.path().join("catalog.db"),
        )
        .unwrap(),
    );
    let controller = PlayerController::spawn(
        Arc::new(LogDisplay::default()),
        store.subscribe(),
        ControllerSettings {
            show_duration: Duration::from_secs(3600),
            tick: Duration::ZERO,
        },
    );
    let coordinator = Coordinator::spawn(store.clone(), controller.clone(), settings);
    Fixture {
        _dir: dir,
        album,
        store,
        controller,
        coordinator,
    }
}

async fn wait_status(
    handle: &ControllerHandle,
    predicate: impl FnMut(&PlayerStatus) -> bool,
) -> PlayerStatus {
    let mut rx = handle.subscribe();
    let status = tokio::time::timeout(Duration::from_secs(3), rx.wait_for(predicate))
        .await
        .expect("status not reached in time")
        .expect("controller gone");
    status.clone()
}

#[test]
fn test_backoff_doubles_up_to_the_cap() {
    let settings = CoordinatorSettings {
        wake_refresh_after: Duration::from_secs(60),
        retry_backoff: Duration::from_secs(30),
        retry_backoff_max: Duration::from_secs(100),
    };
    assert_eq!(settings.backoff(1), Duration::from_secs(30));
    assert_eq!(settings.backoff(2), Duration::from_secs(60));
    assert_eq!(settings.backoff(3), Duration::from_secs(100));
    assert_eq!(settings.backoff(40), Duration::from_secs(100));
}

#[tokio::test]
async fn test_refresh_publishes_playlist_to_player() {
    let f = fixture(
        vec![remote("a", "v1"), remote("b", "v1")],
        CoordinatorSettings::default(),
    )
    .await;

    let report = f
        .coordinator
        .run(CoordinatorAction::Refresh, CommandSource::Scheduler)
        .await
        .unwrap();
    match report {
        ActionReport::Sync(report) => assert_eq!(report.playlist_len, 2),
        other => panic!("unexpected report {:?}", other),
    }
    let status = wait_status(&f.controller, |s| s.playlist_len == 2).await;
    assert!(status.state.playing);
    assert!(status.current.is_some());
}

#[tokio::test]
async fn test_sleep_during_update_stays_asleep() {
    let f = fixture(vec![remote("a", "v1")], CoordinatorSettings::default()).await;
    f.coordinator
        .run(CoordinatorAction::Refresh, CommandSource::Scheduler)
        .await
        .unwrap();
    wait_status(&f.controller, |s| s.playlist_len == 1).await;

    // New version, slow download
    *f.album.items.lock().unwrap() = vec![remote("a", "v2")];
    *f.album.fetch_delay.lock().unwrap() = Some(Duration::from_millis(300));
    f.coordinator
        .submit(CoordinatorAction::Update, CommandSource::Scheduler)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = f
        .coordinator
        .run(CoordinatorAction::Sleep, CommandSource::Scheduler)
        .await
        .unwrap();
    assert!(matches!(report, ActionReport::Power(ref s) if s.state.asleep && !s.state.playing));

    // Let the update finish and commit
    tokio::time::timeout(Duration::from_secs(3), async {
        while f.store.item("a").and_then(|i| i.cached_version) != Some("v2".to_string()) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("update did not finish");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = f.controller.status();
    assert!(status.state.asleep);
    assert!(!status.state.playing);
}

#[tokio::test]
async fn test_wakeup_refreshes_empty_playlist_first() {
    let f = fixture(
        vec![remote("a", "v1"), remote("b", "v1"), remote("c", "v1")],
        CoordinatorSettings::default(),
    )
    .await;
    f.coordinator
        .run(CoordinatorAction::Sleep, CommandSource::Scheduler)
        .await
        .unwrap();
    assert!(f.store.snapshot().is_empty());

    f.coordinator
        .run(CoordinatorAction::Wakeup, CommandSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(f.store.snapshot().len(), 3);
    assert!(f.store.last_refresh().is_some());

    let status = wait_status(&f.controller, |s| s.playlist_len == 3 && s.current.is_some()).await;
    assert!(status.state.playing);
    assert!(!status.state.asleep);
}

#[tokio::test]
async fn test_wakeup_skips_refresh_when_recent() {
    let f = fixture(vec![remote("a", "v1")], CoordinatorSettings::default()).await;
    f.coordinator
        .run(CoordinatorAction::Refresh, CommandSource::Scheduler)
        .await
        .unwrap();
    f.coordinator
        .run(CoordinatorAction::Sleep, CommandSource::Scheduler)
        .await
        .unwrap();
    let listings = f.album.listings.load(Ordering::SeqCst);

    f.coordinator
        .run(CoordinatorAction::Wakeup, CommandSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(f.album.listings.load(Ordering::SeqCst), listings);
}

#[tokio::test]
async fn test_failed_refresh_is_retried() {
    let f = fixture(
        vec![remote("a", "v1")],
        CoordinatorSettings {
            wake_refresh_after: Duration::from_secs(3600),
            retry_backoff: Duration::from_millis(50),
            retry_backoff_max: Duration::from_millis(200),
        },
    )
    .await;
    f.album.offline.store(true, Ordering::SeqCst);

    let err = f
        .coordinator
        .run(CoordinatorAction::Refresh, CommandSource::Scheduler)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Sync(_)));

    f.album.offline.store(false, Ordering::SeqCst);
    let mut playlists = f.store.subscribe();
    tokio::time::timeout(Duration::from_secs(3), playlists.wait_for(|p| p.len() == 1))
        .await
        .expect("refresh was not retried")
        .unwrap();
}

#[tokio::test]
async fn test_router_sends_power_commands_to_coordinator() {
    let f = fixture(vec![remote("a", "v1")], CoordinatorSettings::default()).await;
    f.coordinator
        .run(CoordinatorAction::Refresh, CommandSource::Scheduler)
        .await
        .unwrap();
    let router = ControlRouter::new(f.controller.clone(), f.coordinator.clone());

    router
        .dispatch(ControlCommand::Sleep, CommandSource::Gpio)
        .unwrap();
    let status = wait_status(&f.controller, |s| s.state.asleep).await;
    assert!(!status.state.playing);

    assert!(matches!(
        router.dispatch_name("wake-up", CommandSource::Http),
        Err(ControlError::InvalidCommand(_))
    ));
    assert_eq!(
        router.dispatch_name("wakeup", CommandSource::Http).unwrap(),
        ControlCommand::Wakeup
    );
    let status = wait_status(&f.controller, |s| !s.state.asleep).await;
    assert!(status.state.playing);

    router
        .dispatch(ControlCommand::Pause, CommandSource::Http)
        .unwrap();
    let status = wait_status(&f.controller, |s| !s.state.playing).await;
    assert!(!status.state.asleep);
}

#[tokio::test]
async fn test_overlapping_refreshes_coalesce() {
    let f = fixture(vec![remote("a", "v1")], CoordinatorSettings::default()).await;
    *f.album.fetch_delay.lock().unwrap() = Some(Duration::from_millis(200));

    let first = f
        .coordinator
        .run(CoordinatorAction::Refresh, CommandSource::Scheduler);
    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.coordinator
            .run(CoordinatorAction::Refresh, CommandSource::Http)
            .await
    };
    let (first, second) = tokio::join!(first, second);
    let outcomes: Vec<SyncOutcome> = [first.unwrap(), second.unwrap()]
        .into_iter()
        .map(|r| match r {
            ActionReport::Sync(report) => report.outcome,
            other => panic!("unexpected report {:?}", other),
        })
        .collect();
    assert_eq!(outcomes, vec![SyncOutcome::Completed, SyncOutcome::Coalesced]);
}
