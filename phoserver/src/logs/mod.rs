//! Journalisation : tampon circulaire, flux SSE et réglage du niveau à chaud
mod sselayer;

pub use sselayer::SseLayer;

use phoconfig::Config;
use std::{
    collections::VecDeque,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::SystemTime,
};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt, Registry,
};

/// Représente une entrée de log
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: SystemTime,
    pub level: String,
    pub target: String,
    pub message: String,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Buffer circulaire partagé
#[derive(Clone)]
pub struct LogState {
    buffer: Arc<RwLock<VecDeque<LogEntry>>>,
    capacity: usize,
    tx: broadcast::Sender<LogEntry>,
    max_level: Arc<RwLock<Level>>,
    reload_handle: Arc<reload::Handle<LevelFilter, Registry>>,
}

impl LogState {
    pub fn new(
        capacity: usize,
        level: Level,
        reload_handle: reload::Handle<LevelFilter, Registry>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
            tx: broadcast::channel(1000).0,
            max_level: Arc::new(RwLock::new(level)),
            reload_handle: Arc::new(reload_handle),
        }
    }

    pub fn set_max_level(&self, level: Level) {
        *write(&self.max_level) = level;

        if let Err(e) = self.reload_handle.reload(level_to_levelfilter(level)) {
            eprintln!("Failed to reload log level filter: {}", e);
        }
    }

    pub fn get_max_level(&self) -> Level {
        *read(&self.max_level)
    }

    fn push(&self, entry: LogEntry) {
        let mut buf = write(&self.buffer);
        while buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry.clone());
        drop(buf);
        let _ = self.tx.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn dump(&self) -> Vec<LogEntry> {
        read(&self.buffer).iter().cloned().collect()
    }
}

/// Query params pour /log-sse
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub error: Option<bool>,
    #[serde(default)]
    pub warn: Option<bool>,
    #[serde(default)]
    pub info: Option<bool>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub trace: Option<bool>,
    #[serde(default)]
    pub search: Option<String>,
}

fn sse_event(entry: &LogEntry) -> Option<Event> {
    serde_json::to_string(entry)
        .ok()
        .map(|json| Event::default().data(json))
}

/// Handler SSE
pub async fn log_sse(
    State(state): State<LogState>,
    Query(params): Query<LogQuery>,
) -> impl IntoResponse {
    let mut rx = state.subscribe();

    let history = state.dump();
    let stream_state = state.clone();
    let current_level = stream_state.get_max_level();

    let stream = async_stream::stream! {
        // Historique d'abord, filtré par le niveau courant
        for entry in history {
            if !is_level_allowed(&entry.level, current_level) || !filter_entry(&entry, &params) {
                continue;
            }
            if let Some(event) = sse_event(&entry) {
                yield Ok::<_, axum::Error>(event);
            }
        }

        // Puis les nouvelles entrées en temps réel
        loop {
            let entry = match rx.recv().await {
                Ok(entry) => entry,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let max_level = stream_state.get_max_level();
            if !is_level_allowed(&entry.level, max_level) || !filter_entry(&entry, &params) {
                continue;
            }
            if let Some(event) = sse_event(&entry) {
                yield Ok::<_, axum::Error>(event);
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Handler REST (dump JSON du buffer)
pub async fn log_dump(State(state): State<LogState>) -> impl IntoResponse {
    Json(state.dump())
}

/// Un log est autorisé si son niveau est au moins aussi grave que `max_level`
fn is_level_allowed(log_level: &str, max_level: Level) -> bool {
    match string_to_level(log_level) {
        // Level: TRACE > DEBUG > INFO > WARN > ERROR
        Some(level) => level <= max_level,
        None => false,
    }
}

/// Fonction de filtrage
fn filter_entry(entry: &LogEntry, q: &LogQuery) -> bool {
    let lvl = entry.level.to_lowercase();
    let flags = [
        (q.error, "error"),
        (q.warn, "warn"),
        (q.info, "info"),
        (q.debug, "debug"),
        (q.trace, "trace"),
    ];

    // si aucun flag → tout est autorisé
    let any_flag = flags.iter().any(|(flag, _)| flag.unwrap_or(false));
    let mut allowed = !any_flag
        || flags
            .iter()
            .any(|(flag, name)| flag.unwrap_or(false) && lvl == *name);

    if let Some(search) = &q.search {
        allowed &= entry.message.contains(search) || entry.target.contains(search);
    }

    allowed
}

/// Options d'initialisation du système de logging
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Capacité du buffer circulaire (nombre d'entrées conservées)
    pub buffer_capacity: usize,
    /// Activer la sortie vers stderr/stdout
    pub enable_console: bool,
    pub min_level: Level,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            enable_console: true,
            min_level: Level::INFO,
        }
    }
}

impl LoggingOptions {
    /// Lit la section `host.logger` de la configuration
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            buffer_capacity: config
                .get_log_cache_size()
                .unwrap_or(defaults.buffer_capacity),
            enable_console: config
                .get_log_enable_console()
                .unwrap_or(defaults.enable_console),
            min_level: config
                .get_log_min_level()
                .ok()
                .and_then(|l| string_to_level(&l))
                .unwrap_or(defaults.min_level),
        }
    }
}

/// Initialise le système de logging avec SSE et optionnellement la console
///
/// Retourne le `LogState` à passer aux routes de logs. Si un subscriber
/// global est déjà installé, il est conservé et le `LogState` ne reçoit rien.
pub fn init_logging(options: LoggingOptions) -> LogState {
    // Filtre rechargeable appliqué avant le SseLayer
    let (filter, reload_handle) = reload::Layer::new(level_to_levelfilter(options.min_level));
    let log_state = LogState::new(options.buffer_capacity, options.min_level, reload_handle);

    let subscriber = Registry::default()
        .with(filter)
        .with(SseLayer::new(log_state.clone()));

    let result = if options.enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()
    } else {
        subscriber.try_init()
    };
    if let Err(e) = result {
        eprintln!("Logging already initialised: {}", e);
    }

    log_state
}

/// Request body pour la configuration du logging
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LogSetupRequest {
    pub level: String,
}

/// Response pour la configuration du logging
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LogSetupResponse {
    pub current_level: String,
    pub available_levels: Vec<String>,
}

const LEVELS: [&str; 5] = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

fn setup_response(level: Level) -> LogSetupResponse {
    LogSetupResponse {
        current_level: level_to_string(level),
        available_levels: LEVELS.iter().map(|l| l.to_string()).collect(),
    }
}

/// Handler pour GET /api/log_setup - retourne la configuration actuelle
#[utoipa::path(
    get,
    path = "/api/log_setup",
    responses(
        (status = 200, description = "Log configuration retrieved successfully", body = LogSetupResponse)
    ),
    tag = "logs"
)]
pub async fn log_setup_get(State(state): State<LogState>) -> impl IntoResponse {
    Json(setup_response(state.get_max_level()))
}

/// Handler pour POST /api/log_setup - met à jour le niveau de log
#[utoipa::path(
    post,
    path = "/api/log_setup",
    request_body = LogSetupRequest,
    responses(
        (status = 200, description = "Log level updated successfully", body = LogSetupResponse),
        (status = 400, description = "Invalid log level")
    ),
    tag = "logs"
)]
pub async fn log_setup_post(
    State(state): State<LogState>,
    Json(payload): Json<LogSetupRequest>,
) -> impl IntoResponse {
    let Some(level) = string_to_level(&payload.level) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Invalid log level. Must be one of: ERROR, WARN, INFO, DEBUG, TRACE"
            })),
        )
            .into_response();
    };

    state.set_max_level(level);
    tracing::info!("Log level changed to: {}", payload.level);

    (StatusCode::OK, Json(setup_response(level))).into_response()
}

pub fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

fn level_to_string(level: Level) -> String {
    match level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
    .to_string()
}

fn level_to_levelfilter(level: Level) -> LevelFilter {
    LevelFilter::from_level(level)
}

/// Crée le router des logs : `/log-dump`, `/log-sse` et `/api/log_setup`
pub fn create_logs_router(log_state: LogState) -> axum::Router {
    use axum::routing::get;
    axum::Router::new()
        .route("/log-dump", get(log_dump))
        .route("/log-sse", get(log_sse))
        .route("/api/log_setup", get(log_setup_get).post(log_setup_post))
        .with_state(log_state)
}

/// API OpenAPI pour la gestion des logs
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        log_setup_get,
        log_setup_post,
    ),
    components(
        schemas(LogSetupRequest, LogSetupResponse)
    ),
    tags(
        (name = "logs", description = "Log level configuration endpoints")
    )
)]
pub struct LogsApiDoc;
