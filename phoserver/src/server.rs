//! # Module Server - API de haut niveau pour Axum
//!
//! Ce module cache la construction du routeur Axum et la gestion de l'arrêt :
//!
//! - Sous-routeurs avec `add_router()` et handlers avec état
//! - API documentée (OpenAPI + Swagger UI) avec `add_openapi()`
//! - Routes de logs avec `init_logging()`
//! - Arrêt gracieux sur Ctrl+C ou SIGTERM

use crate::logs::{create_logs_router, init_logging, LogState, LoggingOptions, LogsApiDoc};
use anyhow::{Context, Result};
use axum::handler::Handler;
use axum::routing::get;
use axum::Router;
use phoconfig::get_config;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::{signal, sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Info serveur sérialisable
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ServerInfo {
    pub name: String,
    pub bind: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    bind: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
    log_state: Option<LogState>,
    shutdown: CancellationToken,
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `bind` - Adresse d'écoute (ex: "127.0.0.1")
    /// * `http_port` - Port HTTP à écouter (0 : port libre choisi par le système)
    pub fn new(name: impl Into<String>, bind: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            bind: bind.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
            log_state: None,
            shutdown: CancellationToken::new(),
            local_addr: None,
        }
    }

    pub fn new_configured() -> Result<Self> {
        let config = get_config()?;
        Ok(Self::new(
            "Phoseum",
            config.get_http_bind(),
            config.get_http_port(),
        ))
    }

    async fn mount(&self, path: &str, route: Router) {
        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            let normalized = format!("/{}", path.trim_start_matches('/'));
            std::mem::take(&mut *r).nest(&normalized, route)
        };
    }

    /// Ajoute un handler GET avec état
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", get(handler)).with_state(state);
        self.mount(path, route).await;
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        self.mount(path, sub_router).await;
    }

    /// Ajoute une API documentée avec OpenAPI et Swagger UI
    ///
    /// Les routes de `api_router` sont fusionnées à la racine : les chemins
    /// déclarés dans `openapi` sont donc les chemins réels.
    ///
    /// - `/swagger-ui/{name}` affiche la documentation
    /// - `/api-docs/{name}.json` fournit la spécification
    pub async fn add_openapi(
        &mut self,
        api_router: Router,
        openapi: utoipa::openapi::OpenApi,
        name: &str,
    ) {
        let swagger_path: &'static str = Box::leak(format!("/swagger-ui/{}", name).into_boxed_str());
        let openapi_json_path: &'static str =
            Box::leak(format!("/api-docs/{}.json", name).into_boxed_str());
        let swagger = SwaggerUi::new(swagger_path).url(openapi_json_path, openapi);

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).merge(api_router).merge(swagger);
    }

    /// Initialise le logging et enregistre les routes de logs
    ///
    /// Routes : `/log-sse`, `/log-dump`, `/api/log_setup` et la
    /// documentation `/swagger-ui/logs`.
    pub async fn init_logging(&mut self, options: LoggingOptions) -> LogState {
        let log_state = init_logging(options);
        self.attach_logs(log_state.clone()).await;
        log_state
    }

    /// Enregistre les routes de logs pour un `LogState` déjà initialisé
    pub async fn attach_logs(&mut self, log_state: LogState) {
        self.add_openapi(
            create_logs_router(log_state.clone()),
            LogsApiDoc::openapi(),
            "logs",
        )
        .await;
        self.log_state = Some(log_state);
    }

    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }

    /// Jeton annulé à l'arrêt du serveur (signal reçu ou `shutdown()`)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Démarre le serveur HTTP
    ///
    /// Retourne l'adresse effectivement écoutée. Le serveur s'arrête
    /// proprement sur Ctrl+C, SIGTERM ou `shutdown()`.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.bind))?;
        let listener = tokio::net::TcpListener::bind(SocketAddr::new(ip, self.http_port))
            .await
            .with_context(|| format!("Cannot listen on {}:{}", self.bind, self.http_port))?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);

        info!("Server {} running at http://{}", self.name, addr);
        if !ip.is_loopback() {
            warn!(
                "Control API listens on {} without authentication, anyone on the network can drive the player",
                addr
            );
        }

        let router = self.router.read().await.clone();
        let token = self.shutdown.clone();
        let server_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!("HTTP server failed: {}", e);
            }
        });

        let token = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => {
                    info!("Shutdown signal received, stopping gracefully");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });

        self.join_handle = Some(server_task);
        Ok(addr)
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Demande l'arrêt gracieux
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            bind: self.bind.clone(),
            http_port: self.http_port,
        }
    }

    /// Routeur complet, pour les tests
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};
    match unix_signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = signal::ctrl_c().await;
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    bind: String,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind: "127.0.0.1".to_string(),
            http_port: 8000,
        }
    }

    pub fn new_configured() -> Result<Self> {
        let config = get_config()?;
        Ok(Self {
            name: "Phoseum".to_string(),
            bind: config.get_http_bind(),
            http_port: config.get_http_port(),
        })
    }

    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Construit le serveur
    pub fn build(self) -> Server {
        Server::new(self.name, self.bind, self.http_port)
    }
}
