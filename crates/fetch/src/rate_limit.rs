use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};

/// Per-host politeness gate (§4.2): a leaky-bucket allowing R requests/s
/// with burst B, plus a hard cap of K concurrent in-flight requests.
/// Per-host overrides (an OEM's `politeness_override`) replace the default
/// rate/burst wholesale for that host; the concurrency cap stays uniform.
pub struct DomainRateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    concurrency: Mutex<HashMap<String, Arc<Semaphore>>>,
    default_rate: f64,
    default_burst: u32,
    per_host_concurrency: usize,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    rate: f64,
    burst: f64,
}

impl TokenBucket {
    fn new(rate: f64, burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
            rate,
            burst,
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = Instant::now();
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        }
    }
}

/// Held for the lifetime of one in-flight request; releases the per-host
/// concurrency permit on drop.
pub struct HostPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl DomainRateLimiter {
    pub fn new(default_rate: f64, default_burst: u32, per_host_concurrency: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            concurrency: Mutex::new(HashMap::new()),
            default_rate,
            default_burst,
            per_host_concurrency,
        }
    }

    /// Acquire a rate-limit token and a concurrency permit for `domain`,
    /// waiting at most `timeout` total. `override_rate`/`override_burst`
    /// let a caller supply an OEM's `politeness_override`.
    pub async fn acquire(
        &self,
        domain: &str,
        timeout: Duration,
        override_rate: Option<(f64, u32)>,
    ) -> Result<HostPermit, String> {
        let deadline = Instant::now() + timeout;
        let (rate, burst) = override_rate.unwrap_or((self.default_rate, self.default_burst as f64));

        loop {
            let wait_time = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(domain.to_string())
                    .or_insert_with(|| TokenBucket::new(rate, burst));

                if bucket.try_acquire() {
                    Duration::ZERO
                } else {
                    bucket.time_until_available()
                }
            };

            if wait_time.is_zero() {
                break;
            }

            if Instant::now() + wait_time > deadline {
                return Err(format!("rate limit timeout for domain: {domain}"));
            }
            tokio::time::sleep(wait_time).await;
        }

        let semaphore = {
            let mut map = self.concurrency.lock().await;
            map.entry(domain.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_concurrency)))
                .clone()
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let permit = tokio::time::timeout(remaining, semaphore.acquire_owned())
            .await
            .map_err(|_| format!("concurrency limit timeout for domain: {domain}"))?
            .map_err(|e| e.to_string())?;

        Ok(HostPermit { _permit: permit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_within_burst_immediately() {
        let limiter = DomainRateLimiter::new(1.0, 3, 2);
        for _ in 0..3 {
            limiter
                .acquire("example.com", Duration::from_millis(50), None)
                .await
                .expect("burst should not block");
        }
    }

    #[tokio::test]
    async fn exhausted_bucket_times_out() {
        let limiter = DomainRateLimiter::new(0.001, 1, 2);
        limiter
            .acquire("example.com", Duration::from_millis(10), None)
            .await
            .unwrap();
        let result = limiter
            .acquire("example.com", Duration::from_millis(10), None)
            .await;
        assert!(result.is_err());
    }
}
