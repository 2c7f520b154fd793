//! # phoserver - Surface HTTP de Phoseum
//!
//! Cette crate expose le démon sur HTTP avec Axum :
//!
//! - [`Server`] / [`ServerBuilder`] : routeur, Swagger UI, arrêt gracieux
//!   sur Ctrl+C ou SIGTERM
//! - [`api`] : commandes du lecteur, veille, synchronisation et statut
//! - [`logs`] : tampon de logs, flux SSE et niveau de log réglable à chaud
//!
//! L'API de contrôle n'a pas d'authentification : par défaut le serveur
//! n'écoute que sur l'interface locale.
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use phoserver::{api::{self, ApiState}, logs::LoggingOptions, ServerBuilder};
//! use utoipa::OpenApi;
//!
//! # async fn run(state: ApiState) -> anyhow::Result<()> {
//! let mut server = ServerBuilder::new("Phoseum").http_port(8000).build();
//! server.init_logging(LoggingOptions::default()).await;
//! server
//!     .add_openapi(api::create_router(state), api::ApiDoc::openapi(), "phoseum")
//!     .await;
//!
//! server.start().await?;
//! server.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod logs;
pub mod server;

pub use api::{create_router, ApiDoc, ApiState};
pub use logs::{init_logging, log_dump, log_sse, LogState, LoggingOptions, SseLayer};
pub use server::{Server, ServerBuilder, ServerInfo};
