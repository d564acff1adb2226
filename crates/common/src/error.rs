use thiserror::Error;

/// Top-level error type for OEM watch operations.
///
/// Variants map onto the crawl pipeline's error kind taxonomy: per-page
/// errors (`TransientNetwork`, `PermanentPageError`, `Blocked`,
/// `ExtractionFailed`, `LlmFailure`, `SpendCapExhausted`, `StoreConflict`)
/// are recorded against the page or run and never abort it.
/// `InvariantViolation` is the sole exception — it aborts the OEM's
/// current import run.
#[derive(Debug, Error)]
pub enum OemWatchError {
    #[error("database error: {0}")]
    Database(String),

    #[error("fetch service error: {0}")]
    Fetch(String),

    #[error("render service error: {0}")]
    Render(String),

    #[error("LLM provider error: {0}")]
    LlmApi(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("permanent page error: {0}")]
    PermanentPageError(String),

    #[error("blocked: {0}")]
    Blocked(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("llm router failure: {0}")]
    LlmFailure(String),

    #[error("monthly spend cap exhausted for model {0}")]
    SpendCapExhausted(String),

    #[error("store conflict: {0}")]
    StoreConflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl OemWatchError {
    /// Whether this error is from a hard dependency (warrants suspending
    /// the scheduler, same classification the circuit breaker keys on).
    pub fn is_hard_dependency(&self) -> bool {
        matches!(self, Self::Database(_) | Self::LlmApi(_))
    }

    /// Whether this error is from a soft collaborator service the pipeline
    /// can degrade around (retry, fall back, or skip) rather than halt for.
    pub fn is_soft_dependency(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Render(_))
    }

    /// `InvariantViolation` is the only error kind that aborts an OEM's
    /// current import run; every other per-page error is recorded and
    /// counted, and the run continues.
    pub fn aborts_run(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// Result type alias for OEM watch operations.
pub type Result<T> = std::result::Result<T, OemWatchError>;
