use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use sha2::{Digest, Sha256};

use oemwatch_common::api::render::{RenderRequest, RenderResponse};

use crate::error::RenderError;
use crate::observer::NetworkObserver;
use crate::wait::apply_wait_policy;
use crate::AppState;

/// POST /render — navigate, apply the requested wait policy while capturing
/// the network trace, and return the final DOM plus the trace (C3, §4.3).
pub async fn render_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderRequest>,
) -> Result<Json<RenderResponse>, (StatusCode, String)> {
    let start = Instant::now();
    let total_budget = Duration::from_secs(state.config.timeouts.render_total_secs);
    let wait_budget = Duration::from_secs(state.config.timeouts.render_wait_policy_secs);

    let session = state
        .pool
        .open_session(total_budget)
        .await
        .map_err(render_error_response)?;

    let observer = NetworkObserver::new();
    let listener_tasks = observer
        .attach(&session.page)
        .await
        .map_err(render_error_response)?;

    session
        .page
        .goto(&request.url)
        .await
        .map_err(|e| render_error_response(RenderError::Navigation(e.to_string())))?;

    apply_wait_policy(&session.page, &request.wait_policy, wait_budget)
        .await
        .map_err(render_error_response)?;

    let html = session
        .page
        .content()
        .await
        .map_err(|e| render_error_response(RenderError::Cdp(e.to_string())))?;

    let final_url = session
        .page
        .url()
        .await
        .map_err(|e| render_error_response(RenderError::Cdp(e.to_string())))?
        .unwrap_or_else(|| request.url.clone());

    let screenshot_sha256 = if request.capture_screenshot {
        match session
            .page
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
        {
            Ok(bytes) => Some(format!("{:x}", Sha256::digest(&bytes))),
            Err(e) => {
                tracing::warn!(error = %e, url = %request.url, "screenshot capture failed");
                None
            }
        }
    } else {
        None
    };

    for task in listener_tasks {
        task.abort();
    }
    let network = observer.into_trace().await;

    Ok(Json(RenderResponse {
        html,
        final_url,
        screenshot_sha256,
        network,
        elapsed_ms: start.elapsed().as_millis() as u64,
    }))
}

fn render_error_response(e: RenderError) -> (StatusCode, String) {
    let status = match &e {
        RenderError::WaitTimeout(_) | RenderError::PoolTimeout => StatusCode::GATEWAY_TIMEOUT,
        RenderError::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
        RenderError::Navigation(_) | RenderError::Cdp(_) => StatusCode::BAD_GATEWAY,
        RenderError::Launch(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
