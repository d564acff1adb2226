use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;

use oemwatch_common::api::render::{NetworkTrace, ObservedRequest, ObservedResponse};

use crate::error::RenderError;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const MIN_CANDIDATE_BODY_BYTES: u64 = 500;

/// Hosts whose traffic is never worth probing as a data API (§4.3).
const HOST_DENYLIST: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "doubleclick.net",
    "connect.facebook.net",
    "facebook.com",
    "hotjar.com",
    "segment.io",
    "cdn.cookielaw.org",
    "consent.cookiebot.com",
    "criteo.com",
    "adsrvr.org",
];

/// Records every request/response on a tab for the lifetime of one render
/// session (§4.3). Per request-id, `requestWillBeSent` precedes
/// `responseReceived` precedes `loadingFinished|loadingFailed` — enforced
/// here by always mutating the single entry keyed on that id, never
/// reordering the chronological `order` vector.
pub struct NetworkObserver {
    requests: Mutex<HashMap<String, ObservedRequest>>,
    order: Mutex<Vec<String>>,
}

impl NetworkObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to CDP network events on `page`. Returns the listener
    /// tasks; aborting or dropping them (on session close) stops capture.
    pub async fn attach(
        self: &Arc<Self>,
        page: &Page,
    ) -> Result<Vec<tokio::task::JoinHandle<()>>, RenderError> {
        let mut tasks = Vec::new();

        let mut will_be_sent = page.event_listener::<EventRequestWillBeSent>().await?;
        let observer = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = will_be_sent.next().await {
                observer.on_request_will_be_sent(&event).await;
            }
        }));

        let mut response_received = page.event_listener::<EventResponseReceived>().await?;
        let observer = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = response_received.next().await {
                observer.on_response_received(&event).await;
            }
        }));

        let mut loading_finished = page.event_listener::<EventLoadingFinished>().await?;
        let observer = Arc::clone(self);
        let finished_page = page.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = loading_finished.next().await {
                observer.on_loading_finished(&event, &finished_page).await;
            }
        }));

        let mut loading_failed = page.event_listener::<EventLoadingFailed>().await?;
        let observer = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = loading_failed.next().await {
                observer.on_loading_failed(&event).await;
            }
        }));

        Ok(tasks)
    }

    async fn on_request_will_be_sent(&self, event: &EventRequestWillBeSent) {
        let request_id = event.request_id.inner().to_string();
        let headers: HashMap<String, String> = event
            .request
            .headers
            .inner()
            .as_object()
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let observed = ObservedRequest {
            request_id: request_id.clone(),
            method: event.request.method.clone(),
            url: event.request.url.clone(),
            request_headers: headers,
            request_body: event.request.post_data.clone(),
            resource_type: event
                .r#type
                .map(|t| format!("{:?}", t))
                .unwrap_or_else(|| "Other".to_string()),
            response: None,
            loading_finished: false,
            loading_failed: false,
        };

        let mut requests = self.requests.lock().await;
        if !requests.contains_key(&request_id) {
            self.order.lock().await.push(request_id.clone());
        }
        requests.insert(request_id, observed);
    }

    async fn on_response_received(&self, event: &EventResponseReceived) {
        let request_id = event.request_id.inner().to_string();
        let mut requests = self.requests.lock().await;
        let Some(entry) = requests.get_mut(&request_id) else {
            return;
        };

        let headers: HashMap<String, String> = event
            .response
            .headers
            .inner()
            .as_object()
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        entry.response = Some(ObservedResponse {
            status: event.response.status as u16,
            content_type: Some(event.response.mime_type.clone()),
            headers,
            encoded_body_size: event.response.encoded_data_length.max(0.0) as u64,
            from_cache: event.response.from_disk_cache || event.response.from_service_worker,
            decoded_body_base64: None,
            truncated: false,
        });
    }

    async fn on_loading_finished(&self, event: &EventLoadingFinished, page: &Page) {
        let request_id = event.request_id.inner().to_string();

        let should_fetch_body = {
            let requests = self.requests.lock().await;
            requests
                .get(&request_id)
                .and_then(|r| r.response.as_ref())
                .map(|resp| {
                    (200..300).contains(&resp.status)
                        && resp
                            .content_type
                            .as_deref()
                            .is_some_and(|ct| ct.contains("json"))
                })
                .unwrap_or(false)
        };

        if should_fetch_body {
            if let Ok(body) = page
                .execute(GetResponseBodyParams::new(event.request_id.clone()))
                .await
            {
                let raw = if body.base_64_encoded {
                    base64::engine::general_purpose::STANDARD
                        .decode(&body.body)
                        .unwrap_or_default()
                } else {
                    body.body.clone().into_bytes()
                };

                let mut requests = self.requests.lock().await;
                if let Some(entry) = requests.get_mut(&request_id) {
                    if let Some(resp) = entry.response.as_mut() {
                        if raw.len() > MAX_BODY_BYTES {
                            resp.decoded_body_base64 = Some(
                                base64::engine::general_purpose::STANDARD
                                    .encode(&raw[..MAX_BODY_BYTES]),
                            );
                            resp.truncated = true;
                        } else {
                            resp.decoded_body_base64 =
                                Some(base64::engine::general_purpose::STANDARD.encode(&raw));
                        }
                    }
                }
            }
        }

        let mut requests = self.requests.lock().await;
        if let Some(entry) = requests.get_mut(&request_id) {
            entry.loading_finished = true;
        }
    }

    async fn on_loading_failed(&self, event: &EventLoadingFailed) {
        let request_id = event.request_id.inner().to_string();
        let mut requests = self.requests.lock().await;
        if let Some(entry) = requests.get_mut(&request_id) {
            entry.loading_failed = true;
        }
    }

    /// Drain the captured log into the wire trace, applying the API
    /// candidate filter: 2xx JSON, body >= 500 bytes, host not denied.
    pub async fn into_trace(self: Arc<Self>) -> NetworkTrace {
        let order = self.order.lock().await.clone();
        let requests = self.requests.lock().await;

        let mut ordered_requests = Vec::with_capacity(order.len());
        let mut api_candidate_request_ids = Vec::new();

        for request_id in &order {
            let Some(req) = requests.get(request_id) else {
                continue;
            };
            if is_api_candidate(req) {
                api_candidate_request_ids.push(request_id.clone());
            }
            ordered_requests.push(req.clone());
        }

        NetworkTrace {
            requests: ordered_requests,
            api_candidate_request_ids,
        }
    }
}

fn is_api_candidate(req: &ObservedRequest) -> bool {
    let Some(resp) = &req.response else {
        return false;
    };
    if !(200..300).contains(&resp.status) {
        return false;
    }
    if !resp
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("json"))
    {
        return false;
    }
    if resp.encoded_body_size < MIN_CANDIDATE_BODY_BYTES {
        return false;
    }
    !is_denied_host(&req.url)
}

fn is_denied_host(url: &str) -> bool {
    let host = url
        .split("//")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("");
    HOST_DENYLIST.iter().any(|deny| host.ends_with(deny))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, content_type: &str, size: u64) -> ObservedResponse {
        ObservedResponse {
            status,
            headers: HashMap::new(),
            content_type: Some(content_type.to_string()),
            encoded_body_size: size,
            from_cache: false,
            decoded_body_base64: None,
            truncated: false,
        }
    }

    fn request(url: &str, response: Option<ObservedResponse>) -> ObservedRequest {
        ObservedRequest {
            request_id: "1".into(),
            method: "GET".into(),
            url: url.into(),
            request_headers: HashMap::new(),
            request_body: None,
            resource_type: "XHR".into(),
            response,
            loading_finished: true,
            loading_failed: false,
        }
    }

    #[test]
    fn accepts_json_over_threshold_off_denylist() {
        let req = request(
            "https://api.oem.example/v1/vehicles",
            Some(response(200, "application/json", 600)),
        );
        assert!(is_api_candidate(&req));
    }

    #[test]
    fn rejects_small_body() {
        let req = request(
            "https://api.oem.example/v1/vehicles",
            Some(response(200, "application/json", 100)),
        );
        assert!(!is_api_candidate(&req));
    }

    #[test]
    fn rejects_denylisted_host() {
        let req = request(
            "https://www.google-analytics.com/collect",
            Some(response(200, "application/json", 10_000)),
        );
        assert!(!is_api_candidate(&req));
    }

    #[test]
    fn rejects_non_json() {
        let req = request(
            "https://api.oem.example/v1/vehicles",
            Some(response(200, "text/html", 10_000)),
        );
        assert!(!is_api_candidate(&req));
    }
}
