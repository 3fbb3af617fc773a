mod api;
mod ciba;
mod config;
mod errors;
mod hooks;
mod locks;
mod openapi;
mod registry;
mod state;
mod status_list;
mod store;
#[cfg(test)]
mod test_utils;

use crate::ciba::CibaExpirySweep;
use crate::state::AppState;
use axum::Router;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use sweeper::{PeriodicTask, PeriodicTaskOptions};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_scalar::{Scalar, Servable};

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // Load configuration
    let config = match config::ServerConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;

    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    // Owned here so it stops with the server
    let sweep = start_expiry_sweep(&state);

    let app = create_app(state).await;

    // Build server address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    // Start server
    let server = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server running on {}, press Ctrl+C to stop", addr);
    let serve = axum::serve(server, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = serve {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    if let Some(task) = sweep {
        info!(
            "Stopping {} after {} runs ({} failed)",
            task.name(),
            task.runs(),
            task.failures()
        );
        task.stop();
    }
    info!("Server shutdown complete");
}

/// Starts the backchannel expiry sweep, unless backchannel authentication is disabled
fn start_expiry_sweep(state: &AppState) -> Option<PeriodicTask> {
    let ciba = state.ciba.config();
    if !ciba.enabled {
        return None;
    }
    let interval = ciba.sweep_interval();
    Some(PeriodicTask::start_with_opt(
        CibaExpirySweep::new(Arc::clone(&state.ciba)),
        PeriodicTaskOptions {
            interval,
            initial_delay: interval,
            ..Default::default()
        },
    ))
}

/// Create a new application instance with a given state
pub async fn create_app(state: AppState) -> Router {
    // Create OpenAPI documentation
    let (router, api_doc) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .merge(api::router(&state))
        .split_for_parts();

    Router::new()
        .merge(router)
        .route(
            "/openapi.json",
            axum::routing::get({
                let api_doc = api_doc.clone();
                move || async move { axum::Json(api_doc) }
            }),
        )
        .merge(Scalar::with_url("/scalar", api_doc))
        .with_state(state)
}

// Simple signal handler that works on all platforms
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
