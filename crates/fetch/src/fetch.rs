use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of one successful HTTP GET (§4.2): status, headers, body bytes,
/// the final URL after redirects, and elapsed time.
pub struct FetchOutcome {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub final_url: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// 5xx or transient network error — retried per policy before surfacing.
    #[error("transient failure: {0}")]
    Transient(String),
    /// 4xx other than 408/429 — not retried.
    #[error("permanent client error {status}: {message}")]
    Permanent4xx { status: u16, message: String },
    /// 403/429 with the retry budget exhausted.
    #[error("blocked (retry budget exhausted): {0}")]
    Blocked(String),
    #[error("request timed out")]
    Timeout,
}

/// Issue one polite GET with retry-with-jittered-backoff (§4.2): up to
/// `max_attempts`, retrying 5xx/transient errors and 408/429 (429 honours
/// `Retry-After`), never retrying other 4xx.
pub async fn fetch_with_retry(
    http: &reqwest::Client,
    url: &str,
    headers: &HashMap<String, String>,
    timeout: Duration,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
) -> Result<FetchOutcome, FetchError> {
    let mut attempt = 0;
    let mut backoff_ms = initial_backoff_ms;

    loop {
        attempt += 1;
        let start = Instant::now();
        let outcome = do_request(http, url, headers, timeout).await;
        let domain = extract_domain(url);

        match outcome {
            Ok(resp) => {
                metrics::histogram!("fetch.request.latency_ms", "domain" => domain.clone())
                    .record(start.elapsed().as_millis() as f64);
                let status = resp.status;
                if (200..400).contains(&status) {
                    return Ok(resp);
                }
                if status == 429 || status == 403 {
                    let retry_after = resp
                        .headers
                        .get("retry-after")
                        .and_then(|v| v.parse::<u64>().ok());
                    if attempt >= max_attempts {
                        return Err(FetchError::Blocked(format!(
                            "status {status} after {attempt} attempts"
                        )));
                    }
                    let wait = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_millis(backoff_ms));
                    tokio::time::sleep(wait).await;
                    backoff_ms = (backoff_ms * 2).min(max_backoff_ms);
                    continue;
                }
                if status == 408 || (500..600).contains(&status) {
                    if attempt >= max_attempts {
                        return Err(FetchError::Transient(format!(
                            "status {status} after {attempt} attempts"
                        )));
                    }
                    sleep_with_jitter(backoff_ms).await;
                    backoff_ms = (backoff_ms * 2).min(max_backoff_ms);
                    continue;
                }
                return Err(FetchError::Permanent4xx {
                    status,
                    message: format!("non-retryable status {status}"),
                });
            }
            Err(e) if e.is_timeout() => return Err(FetchError::Timeout),
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(FetchError::Transient(e.to_string()));
                }
                sleep_with_jitter(backoff_ms).await;
                backoff_ms = (backoff_ms * 2).min(max_backoff_ms);
            }
        }
    }
}

async fn do_request(
    http: &reqwest::Client,
    url: &str,
    headers: &HashMap<String, String>,
    timeout: Duration,
) -> Result<FetchOutcome, reqwest::Error> {
    let start = Instant::now();
    let mut request = http.get(url).timeout(timeout);
    for (k, v) in headers {
        request = request.header(k, v);
    }

    let response = request.send().await?;
    let final_url = response.url().to_string();
    let status = response.status().as_u16();
    let resp_headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let body = response.bytes().await?.to_vec();

    Ok(FetchOutcome {
        status,
        headers: resp_headers,
        body,
        final_url,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

async fn sleep_with_jitter(base_ms: u64) {
    tokio::time::sleep(Duration::from_millis(base_ms + compute_jitter(base_ms))).await;
}

/// Hash-based jitter, avoiding a dependency on a random number crate for a
/// single retry-spacing decision.
fn compute_jitter(backoff_ms: u64) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::hash::DefaultHasher::new();
    backoff_ms.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish() % (backoff_ms / 2 + 1)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://example.com/path"), "example.com");
        assert_eq!(extract_domain("http://www.test.org/a/b"), "www.test.org");
    }
}
