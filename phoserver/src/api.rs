//! API de contrôle du lecteur
//!
//! - `POST /player/{command}` : commandes du lecteur (hors veille)
//! - `POST /power/{action}` : `sleep` ou `wakeup`
//! - `POST /playlist/{action}` : `refresh` ou `update`
//! - `GET /status` : état du lecteur, de la playlist et du cache
//!
//! Les commandes sont mises en file : la réponse 202 ne préjuge pas de
//! leur effet, visible ensuite sur `/status`.
//!
//! L'API n'est pas authentifiée.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use phocache::CacheUsage;
use phocontrol::{CommandSource, ControlCommand, ControlRouter, CoordinatorAction, PlayerStatus};
use phoplaylist::{PlaylistStatus, PlaylistStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// État partagé des handlers
#[derive(Clone)]
pub struct ApiState {
    pub router: ControlRouter,
    pub store: Arc<PlaylistStore>,
}

impl ApiState {
    pub fn new(router: ControlRouter, store: Arc<PlaylistStore>) -> Self {
        Self { router, store }
    }
}

/// Commande acceptée et mise en file
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CommandAccepted {
    pub accepted: bool,
    pub command: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiError {
    pub error: String,
}

/// Réponse de `GET /status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub player: PlayerStatus,
    pub playlist: PlaylistStatus,
    pub cache: CacheUsage,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            error: message.into(),
        }),
    )
        .into_response()
}

fn accepted(command: impl ToString) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(CommandAccepted {
            accepted: true,
            command: command.to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/player/{command}",
    params(
        ("command" = String, Path, description = "play_next, play_back, pause, resume, mute or unmute")
    ),
    responses(
        (status = 202, description = "Command queued", body = CommandAccepted),
        (status = 404, description = "Unknown command", body = ApiError),
        (status = 503, description = "Player controller not running", body = ApiError)
    ),
    tag = "player"
)]
pub async fn player_command(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let command = match name.parse::<ControlCommand>() {
        Ok(command) if command.is_power() => {
            return error(
                StatusCode::NOT_FOUND,
                format!("'{}' is a power command, use /power/{}", command, command),
            );
        }
        Ok(command) => command,
        Err(e) => {
            debug!(name = %name, "Rejected player command");
            return error(StatusCode::NOT_FOUND, e.to_string());
        }
    };

    match state.router.controller().submit(command, CommandSource::Http) {
        Ok(()) => accepted(command),
        Err(e) => {
            warn!(command = %command, "Player command dropped: {}", e);
            error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[utoipa::path(
    post,
    path = "/power/{action}",
    params(("action" = String, Path, description = "sleep or wakeup")),
    responses(
        (status = 202, description = "Power transition queued", body = CommandAccepted),
        (status = 404, description = "Unknown action", body = ApiError),
        (status = 503, description = "Sleep coordinator not running", body = ApiError)
    ),
    tag = "power"
)]
pub async fn power_action(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let action = match name.parse::<ControlCommand>().ok().and_then(CoordinatorAction::for_command) {
        Some(action) => action,
        None => return error(StatusCode::NOT_FOUND, format!("Unknown power action: {}", name)),
    };
    submit(&state, action)
}

#[utoipa::path(
    post,
    path = "/playlist/{action}",
    params(("action" = String, Path, description = "refresh or update")),
    responses(
        (status = 202, description = "Sync queued", body = CommandAccepted),
        (status = 404, description = "Unknown action", body = ApiError),
        (status = 503, description = "Sleep coordinator not running", body = ApiError)
    ),
    tag = "playlist"
)]
pub async fn playlist_action(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let action = match name.trim().to_lowercase().as_str() {
        "refresh" => CoordinatorAction::Refresh,
        "update" => CoordinatorAction::Update,
        _ => return error(StatusCode::NOT_FOUND, format!("Unknown playlist action: {}", name)),
    };
    submit(&state, action)
}

fn submit(state: &ApiState, action: CoordinatorAction) -> Response {
    match state.router.coordinator().submit(action, CommandSource::Http) {
        Ok(()) => accepted(action),
        Err(e) => {
            warn!(action = %action, "Action dropped: {}", e);
            error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Player, playlist and cache state", content_type = "application/json")
    ),
    tag = "status"
)]
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(StatusResponse {
        player: state.router.controller().status(),
        playlist: state.store.status(),
        cache: state.store.cache().usage().await,
    })
}

/// Crée le router de l'API de contrôle
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/player/{command}", post(player_command))
        .route("/power/{action}", post(power_action))
        .route("/playlist/{action}", post(playlist_action))
        .route("/status", get(status))
        .with_state(state)
}

#[derive(utoipa::OpenApi)]
#[openapi(
    paths(player_command, power_action, playlist_action, status),
    components(schemas(CommandAccepted, ApiError)),
    tags(
        (name = "player", description = "Slideshow commands"),
        (name = "power", description = "Screen sleep and wakeup"),
        (name = "playlist", description = "Playlist synchronisation"),
        (name = "status", description = "Daemon state")
    )
)]
pub struct ApiDoc;
