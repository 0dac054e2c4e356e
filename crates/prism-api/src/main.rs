use actix_web::{web, App, HttpServer};
use prism_engine::Scheduler;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod handlers;
mod middleware;
mod routes;
mod state;

use config::ApiConfig;
use state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = match ApiConfig::from_env() {
        Ok(config) => {
            if let Err(e) = config.validate() {
                eprintln!("Configuration validation failed: {e}");
                std::process::exit(1);
            }
            config
        }
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        "Starting Prism API v{} on {}",
        env!("CARGO_PKG_VERSION"),
        config.server_address()
    );

    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => {
            info!("Application state initialized");
            state
        }
        Err(e) => {
            error!("Failed to initialize application state: {e}");
            std::process::exit(1);
        }
    };

    // Relay pub/sub events from background workers into the in-process
    // WebSocket hub. Runs for the process lifetime.
    let relay_handle = tokio::spawn(prism_core::pubsub::run_relay(
        config.redis_url.clone(),
        Arc::clone(&app_state.hub),
    ));

    // Periodic jobs: fleet sync, snooze reaper, score decay
    let scheduler = Arc::new(
        Scheduler::new(
            Arc::clone(&app_state.db),
            Arc::clone(&app_state.engine),
            config.intervals,
        )
        .with_cache(app_state.cache.clone())
        .with_publisher(app_state.publisher.clone()),
    );
    let job_handles = scheduler.start();

    // One gateway task per connected Discord bot; MESSAGE_CREATE
    // dispatches feed the same ingest path as webhooks.
    if !config.adapters.discord.bot_token.is_empty() {
        let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(64);
        let bot_token = config.adapters.discord.bot_token.clone();
        tokio::spawn(async move {
            prism_adapters::discord::DiscordGateway::new()
                .run(bot_token, events_tx)
                .await;
        });

        let gateway_state = app_state.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                gateway_state.engine.process_webhook("discord", event).await;
            }
        });
        info!("Discord gateway listener started");
    }

    let bind_address = config.server_address();
    let frontend_origin = config.frontend_origin.clone();
    let server_state = app_state.clone();

    let server = HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_origin("http://localhost:3000")
            .allowed_origin("http://localhost:5173")
            .allow_any_method()
            .allow_any_header()
            .supports_credentials();

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default().exclude("/health"))
            .configure(routes::configure_routes)
    })
    .bind(&bind_address)?;

    let server = server.run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    info!("Prism API ready and listening on {bind_address}");

    shutdown_signal().await;
    info!("Prism API shutting down");

    // Background loops are cooperative — abort at their next await point
    relay_handle.abort();
    for handle in job_handles {
        handle.abort();
    }

    server_handle.stop(true).await;
    match server_task.await {
        Ok(Ok(())) => info!("Server shut down cleanly"),
        Ok(Err(e)) => error!("Server error during shutdown: {e}"),
        Err(e) => error!("Failed to join server task: {e}"),
    }

    Ok(())
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
