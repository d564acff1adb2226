use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use oemwatch_common::config::{load_system_config, SystemConfig};

mod browser;
mod error;
mod observer;
mod routes;
mod wait;

use browser::BrowserPool;

/// Shared application state.
pub struct AppState {
    pub pool: BrowserPool,
    pub metrics_handle: PrometheusHandle,
    pub config: SystemConfig,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("oemwatch render service starting");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let config_path = std::env::var("OEMWATCH_SYSTEM_CONFIG").ok().map(std::path::PathBuf::from);
    let config = load_system_config(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to load system config");
        std::process::exit(1);
    });

    let pool = BrowserPool::launch(config.concurrency.renderer_session_cap as usize)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to launch browser pool");
            std::process::exit(1);
        });

    let state = Arc::new(AppState {
        pool,
        metrics_handle,
        config,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/render", post(routes::render_handler))
        .with_state(state);

    let port: u16 = std::env::var("RENDER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8082);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = port, "oemwatch render service listening");

    axum::serve(listener, app).await.expect("HTTP server error");
}

async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "healthy" })),
    )
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
