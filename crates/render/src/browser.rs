use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::sync::Semaphore;

use crate::error::RenderError;

/// One headless-Chrome process backing at most `session_cap` concurrent
/// tabs (§4.3: "the subsystem caps concurrent sessions at S, default 4").
/// One session = one tab, opened fresh per render and closed afterwards.
pub struct BrowserPool {
    browser: Browser,
    _handler_task: tokio::task::JoinHandle<()>,
    sessions: Arc<Semaphore>,
}

impl BrowserPool {
    pub async fn launch(session_cap: usize) -> Result<Self, RenderError> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .build()
            .map_err(RenderError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("chromiumoxide handler event error");
                }
            }
        });

        Ok(Self {
            browser,
            _handler_task: handler_task,
            sessions: Arc::new(Semaphore::new(session_cap)),
        })
    }

    /// Acquire a tab, waiting up to `timeout` for a free slot in the pool.
    pub async fn open_session(&self, timeout: Duration) -> Result<Session, RenderError> {
        let permit = tokio::time::timeout(timeout, self.sessions.clone().acquire_owned())
            .await
            .map_err(|_| RenderError::PoolTimeout)?
            .map_err(|_| RenderError::PoolExhausted)?;

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Cdp(e.to_string()))?;

        Ok(Session {
            page,
            _permit: permit,
        })
    }
}

/// One tab for the lifetime of a single render call. The tab is closed when
/// the session is dropped, releasing the pool slot.
pub struct Session {
    pub page: chromiumoxide::Page,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Drop for Session {
    fn drop(&mut self) {
        let page = self.page.clone();
        tokio::spawn(async move {
            if let Err(e) = page.close().await {
                tracing::debug!(error = %e, "failed to close render session tab");
            }
        });
    }
}
