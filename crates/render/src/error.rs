use thiserror::Error;

/// Errors surfaced by the headless-renderer service (C3, §4.3).
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("wait policy timed out after {0}ms")]
    WaitTimeout(u64),
    #[error("cdp call failed: {0}")]
    Cdp(String),
    #[error("session pool exhausted")]
    PoolExhausted,
    #[error("session pool timed out waiting for a free tab")]
    PoolTimeout,
}

impl From<chromiumoxide::error::CdpError> for RenderError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        RenderError::Cdp(e.to_string())
    }
}
