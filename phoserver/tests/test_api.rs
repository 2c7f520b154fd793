use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use phocache::MediaCache;
use phocontrol::{
    ControlRouter, ControllerHandle, ControllerSettings, Coordinator, CoordinatorSettings,
    LogDisplay, PlayerController,
};
use phoplaylist::{PlaylistPolicy, PlaylistStore};
use phoserver::api::{create_router, ApiState};
use phosource::{MediaKind, PhotoSource, RemoteItem};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

#[derive(Debug)]
struct StaticAlbum(Vec<RemoteItem>);

#[async_trait]
impl PhotoSource for StaticAlbum {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_items(&self) -> phosource::Result<Vec<RemoteItem>> {
        Ok(self.0.clone())
    }

    async fn fetch(&self, item: &RemoteItem) -> phosource::Result<Bytes> {
        Ok(Bytes::from(item.id.clone()))
    }
}

fn remote(id: &str) -> RemoteItem {
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

struct Fixture {
    _dir: TempDir,
    app: Router,
    store: Arc<PlaylistStore>,
    controller: ControllerHandle,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(
        MediaCache::open(dir.path().join("media"), 1 << 20, Duration::from_secs(5))
            .await
            .unwrap(),
    );
    let store = Arc::new(
        PlaylistStore::open(
            Arc::new(StaticAlbum(vec![remote("a"), remote("b")])),
            cache,
            PlaylistPolicy::default(),
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
    let coordinator =
        Coordinator::spawn(store.clone(), controller.clone(), CoordinatorSettings::default());
    let app = create_router(ApiState::new(
        ControlRouter::new(controller.clone(), coordinator),
        store.clone(),
    ));
    Fixture {
        _dir: dir,
        app,
        store,
        controller,
    }
}

async fn post(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::post(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_player_command_is_accepted_and_applied() {
    let f = fixture().await;
    let (status, body) = post(&f.app, "/player/pause").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], true);
    assert_eq!(body["command"], "pause");

    until(|| !f.controller.status().state.playing).await;

    let (status, _) = post(&f.app, "/player/play-next").await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_unknown_and_power_commands_are_not_found() {
    let f = fixture().await;
    let (_, before) = get(&f.app, "/status").await;
    let applied = f.controller.status().commands_applied;

    let (status, body) = post(&f.app, "/player/rewind").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("rewind"));

    let (status, _) = post(&f.app, "/player/sleep").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post(&f.app, "/power/pause").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post(&f.app, "/playlist/delete").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, after) = get(&f.app, "/status").await;
    assert_eq!(after["player"], before["player"]);

    // Seule la commande valide suivante atteint le lecteur
    let (status, _) = post(&f.app, "/player/mute").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    until(|| f.controller.status().commands_applied == applied + 1).await;
    let player = f.controller.status();
    assert!(player.state.muted);
    assert_eq!(player.last_command.map(|c| c.as_str()), Some("mute"));
}

#[tokio::test]
async fn test_power_routes_drive_the_coordinator() {
    let f = fixture().await;
    let (status, body) = post(&f.app, "/power/sleep").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["command"], "sleep");
    until(|| f.controller.status().state.asleep).await;

    let (status, _) = post(&f.app, "/power/wakeup").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    until(|| {
        let s = f.controller.status();
        !s.state.asleep && s.state.playing
    })
    .await;
}

#[tokio::test]
async fn test_refresh_route_and_status() {
    let f = fixture().await;
    let (status, body) = post(&f.app, "/playlist/refresh").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["command"], "refresh");
    until(|| f.store.snapshot().len() == 2).await;
    until(|| f.controller.status().playlist_len == 2).await;

    let (status, body) = get(&f.app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["player"]["playing"], true);
    assert_eq!(body["playlist"]["len"], 2);
    assert_eq!(body["cache"]["entries"], 2);
    assert_eq!(body["cache"]["capacity"], 1 << 20);
}

#[tokio::test]
async fn test_stopped_controller_answers_unavailable() {
    let f = fixture().await;
    f.controller.shutdown().await;
    until(|| !f.controller.is_running()).await;

    let (status, body) = post(&f.app, "/player/mute").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}
