use std::sync::Arc;
use std::time::Duration;
use base64::Engine;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use oemwatch_common::api::fetch::{FetchErrorBody, FetchErrorKind, FetchRequest, FetchResponse};

use crate::fetch::{fetch_with_retry, FetchError};
use crate::AppState;

/// POST /fetch — the HTTP Fetcher contract (C2, §4.2): rate-limit + per-host
/// concurrency gate, retry with jittered backoff, cache by requested URL.
pub async fn fetch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FetchRequest>,
) -> Result<Json<FetchResponse>, (StatusCode, Json<FetchErrorBody>)> {
    if let Some(cached) = state.cache.read().await.get(&request.url) {
        return Ok(Json(to_wire(cached)));
    }

    let domain = extract_domain(&request.url);
    let _permit = state
        .rate_limiter
        .acquire(&domain, Duration::from_secs(120), None)
        .await
        .map_err(|e| {
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(FetchErrorBody {
                    kind: FetchErrorKind::Blocked,
                    message: e,
                    retry_after_secs: None,
                }),
            )
        })?;

    let timeout = request
        .options
        .as_ref()
        .and_then(|o| o.timeout_ms)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(state.config.timeouts.http_fetch_secs));
    let headers = request
        .options
        .as_ref()
        .and_then(|o| o.headers.clone())
        .unwrap_or_default();

    let outcome = fetch_with_retry(
        &state.http,
        &request.url,
        &headers,
        timeout,
        state.config.retry.http_fetch.max_attempts,
        state.config.retry.http_fetch.initial_backoff_ms,
        state.config.retry.http_fetch.max_backoff_ms,
    )
    .await
    .map_err(|e| {
        metrics::counter!("fetch.request.errors", "domain" => domain.clone()).increment(1);
        fetch_error_response(e)
    })?;

    state
        .cache
        .write()
        .await
        .insert(request.url.clone(), &outcome);

    Ok(Json(to_wire(outcome)))
}

fn to_wire(outcome: crate::fetch::FetchOutcome) -> FetchResponse {
    FetchResponse {
        status: outcome.status,
        headers: outcome.headers,
        body_base64: base64::engine::general_purpose::STANDARD.encode(&outcome.body),
        final_url: outcome.final_url,
        elapsed_ms: outcome.elapsed_ms,
    }
}

fn fetch_error_response(e: FetchError) -> (StatusCode, Json<FetchErrorBody>) {
    let (status, kind, retry_after) = match &e {
        FetchError::Transient(_) => (StatusCode::BAD_GATEWAY, FetchErrorKind::Transient, None),
        FetchError::Permanent4xx { status, .. } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
            FetchErrorKind::Permanent4xx,
            None,
        ),
        FetchError::Blocked(_) => (StatusCode::FORBIDDEN, FetchErrorKind::Blocked, None),
        FetchError::Timeout => (StatusCode::GATEWAY_TIMEOUT, FetchErrorKind::Timeout, None),
    };
    (
        status,
        Json(FetchErrorBody {
            kind,
            message: e.to_string(),
            retry_after_secs: retry_after,
        }),
    )
}

fn extract_domain(url: &str) -> String {
    url.split("//")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("unknown")
        .to_string()
}
