use serde::{Deserialize, Serialize};

/// A single-turn prompt sent to a provider. The LLM Router's tasks (§4.6)
/// are all bounded one-shot completions, never multi-turn tool-calling
/// sessions, so there is exactly one user message per call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Parsed response from a provider call.
#[derive(Clone, Debug)]
pub struct LlmResponse {
    pub text: String,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    Other(String),
}

#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
