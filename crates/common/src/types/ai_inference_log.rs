use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AiInferenceLogId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStatus {
    Success,
    Failure,
}

impl InferenceStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Per-call accounting record for the LLM Router (C6, §4.6); there is
/// exactly one row per call, success or failure (invariant 5 of §8).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AiInferenceLog {
    pub id: AiInferenceLogId,
    pub provider: String,
    pub model: String,
    pub task_type: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub status: InferenceStatus,
    pub was_fallback: bool,
    pub prompt_hash: String,
    pub response_hash: String,
    pub created_at: DateTime<Utc>,
}
