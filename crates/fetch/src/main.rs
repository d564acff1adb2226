use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::RwLock;

use oemwatch_common::config::{load_system_config, SystemConfig};

mod cache;
mod fetch;
mod rate_limit;
mod routes;

use cache::UrlCache;
use rate_limit::DomainRateLimiter;

/// Shared application state.
pub struct AppState {
    pub http: reqwest::Client,
    pub cache: Arc<RwLock<UrlCache>>,
    pub rate_limiter: Arc<DomainRateLimiter>,
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

    tracing::info!("oemwatch fetch service starting");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let config_path = std::env::var("OEMWATCH_SYSTEM_CONFIG").ok().map(std::path::PathBuf::from);
    let config = load_system_config(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to load system config");
        std::process::exit(1);
    });

    let http = reqwest::Client::builder()
        .user_agent(concat!("oemwatch-fetch/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to build HTTP client");

    let rate_limiter = DomainRateLimiter::new(
        config.rate_limit.requests_per_second,
        config.rate_limit.burst,
        config.concurrency.per_host_concurrency as usize,
    );

    let state = Arc::new(AppState {
        http,
        cache: Arc::new(RwLock::new(UrlCache::new(Duration::from_secs(
            config.cache.fetch_ttl_seconds,
        )))),
        rate_limiter: Arc::new(rate_limiter),
        metrics_handle,
        config,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/fetch", post(routes::fetch_handler))
        .with_state(state);

    let port: u16 = std::env::var("FETCH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8081);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = port, "oemwatch fetch service listening");

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
