mod cli;

use anyhow::{bail, Result};
use clap::Parser;
use cli::Cli;
use phocache::CacheConfigExt;
use phocontrol::{
    CommandSource, ConsoleListener, ControlConfigExt, ControlRouter, Coordinator,
    CoordinatorAction, GpioListener, PlayerBackend, PlayerController,
};
use phoplaylist::PlaylistConfigExt;
use phoserver::{api, logs::LoggingOptions, ServerBuilder};
use phosource::SourceConfigExt;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::OpenApi;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ========== Configuration et logs ==========
    let config_dir = cli
        .config_dir
        .as_ref()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let config = phoconfig::init_config(&config_dir)?;
    cli.apply(&config)?;

    let mut server = ServerBuilder::new_configured()?.build();
    server
        .init_logging(LoggingOptions::from_config(&config))
        .await;
    info!(config_dir = config.dir(), "Starting Phoseum");

    // Rejeter les réglages invalides avant de démarrer quoi que ce soit
    let backend = config.get_player_backend()?;
    let gpio_map = config.get_gpio_map()?;
    let gpio_device = config.get_gpio_device();
    config.get_audio_volume()?;
    if backend == PlayerBackend::Gpio && gpio_device.is_none() {
        bail!("control.gpio_dev is required when control.player is gpio");
    }

    // ========== Cache, source et playlist ==========
    let cache = Arc::new(config.open_media_cache().await?);
    let usage = cache.usage().await;
    info!(
        used = usage.used,
        capacity = usage.capacity,
        entries = usage.entries,
        "Media cache opened"
    );

    let source = config.build_photo_source()?;
    info!(source = source.name(), "Remote album configured");

    let store = Arc::new(config.open_playlist_store(source, cache)?);
    match store.load().await {
        Ok(report) => info!(
            playlist = report.playlist_len,
            degraded = report.degraded.is_some(),
            "Cached playlist restored"
        ),
        Err(e) => warn!("Cannot restore the cached playlist: {}", e),
    }

    // ========== Lecteur et coordination ==========
    let screen = config.build_display()?;
    let backend_name = screen.name().to_string();
    info!(display = %backend_name, "Display backend selected");
    let controller = PlayerController::spawn(
        screen,
        store.subscribe(),
        config.get_controller_settings(),
    );
    let coordinator = Coordinator::spawn(
        store.clone(),
        controller.clone(),
        config.get_coordinator_settings(),
    );
    coordinator.submit(CoordinatorAction::Refresh, CommandSource::Scheduler)?;
    let router = ControlRouter::new(controller.clone(), coordinator);

    // ========== Entrées physiques ==========
    let shutdown = server.shutdown_token();
    match backend {
        PlayerBackend::Gpio => {
            if let Some(device) = gpio_device {
                if gpio_map.is_empty() {
                    warn!("No GPIO binding configured, buttons will do nothing");
                }
                let listener = GpioListener::new(device, gpio_map);
                tokio::spawn(listener.run(router.clone(), shutdown.clone()));
            }
        }
        PlayerBackend::Console => {
            info!("Reading player commands from the console");
            tokio::spawn(ConsoleListener.run(router.clone(), shutdown.clone()));
        }
        PlayerBackend::None => info!("No physical input, HTTP control only"),
    }

    // ========== API HTTP ==========
    server
        .add_openapi(
            api::create_router(api::ApiState::new(router, store.clone())),
            api::ApiDoc::openapi(),
            "phoseum",
        )
        .await;
    warn!("The control API has no authentication, keep it on a trusted network");

    let addr = server.start().await?;
    info!(%addr, "Phoseum is ready");
    server.wait().await;

    // ========== Arrêt ==========
    shutdown.cancel();
    info!("Stopping the player");
    controller.shutdown().await;
    info!("Phoseum stopped");
    Ok(())
}
