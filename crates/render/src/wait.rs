use std::time::Duration;

use chromiumoxide::Page;
use oemwatch_common::api::render::WaitPolicy;

use crate::error::RenderError;

/// Block until `policy` is satisfied or `budget` elapses (§4.3).
pub async fn apply_wait_policy(
    page: &Page,
    policy: &WaitPolicy,
    budget: Duration,
) -> Result<(), RenderError> {
    match policy {
        WaitPolicy::DomContentLoaded => {
            tokio::time::timeout(budget, page.wait_for_navigation())
                .await
                .map_err(|_| RenderError::WaitTimeout(budget.as_millis() as u64))?
                .map_err(|e| RenderError::Navigation(e.to_string()))?;
            Ok(())
        }
        WaitPolicy::NetworkIdle(idle_ms) => {
            tokio::time::timeout(budget, page.wait_for_navigation())
                .await
                .map_err(|_| RenderError::WaitTimeout(budget.as_millis() as u64))?
                .map_err(|e| RenderError::Navigation(e.to_string()))?;
            wait_for_network_idle(page, Duration::from_millis(*idle_ms), budget).await
        }
        WaitPolicy::FixedDelay(ms) => {
            tokio::time::sleep(Duration::from_millis(*ms).min(budget)).await;
            Ok(())
        }
    }
}

/// Poll in-flight request count via JS performance entries until no new
/// resource load has started for `idle_for`, or `budget` elapses.
async fn wait_for_network_idle(
    page: &Page,
    idle_for: Duration,
    budget: Duration,
) -> Result<(), RenderError> {
    let deadline = tokio::time::Instant::now() + budget;
    let mut last_count: i64 = -1;
    let mut stable_since = tokio::time::Instant::now();

    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(RenderError::WaitTimeout(budget.as_millis() as u64));
        }

        let count: i64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .map_err(|e| RenderError::Cdp(e.to_string()))?
            .into_value()
            .unwrap_or(last_count.max(0));

        if count == last_count {
            if stable_since.elapsed() >= idle_for {
                return Ok(());
            }
        } else {
            last_count = count;
            stable_since = tokio::time::Instant::now();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
