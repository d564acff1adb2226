use serde::{Deserialize, Serialize};

use super::types::{LlmResponse, Message, Role, StopReason, TokenUsage};
use super::LlmError;

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
    stop_reason: String,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text { text: String },
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(default)]
    r#type: String,
}

fn from_wire_response(resp: AnthropicResponse) -> LlmResponse {
    let text = resp
        .content
        .into_iter()
        .map(|AnthropicResponseBlock::Text { text }| text)
        .collect::<Vec<_>>()
        .join("");

    let stop_reason = match resp.stop_reason.as_str() {
        "end_turn" | "stop_sequence" => StopReason::EndTurn,
        "max_tokens" => StopReason::MaxTokens,
        other => StopReason::Other(other.to_string()),
    };

    LlmResponse {
        text,
        stop_reason,
        usage: TokenUsage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        },
    }
}

/// Send a single-turn messages request to the Anthropic API.
pub async fn send_messages(
    http: &reqwest::Client,
    api_key: &str,
    model: &str,
    max_tokens: u32,
    temperature: Option<f64>,
    system: &str,
    messages: &[Message],
) -> Result<LlmResponse, LlmError> {
    let start = std::time::Instant::now();

    let wire_messages: Vec<AnthropicMessage> = messages
        .iter()
        .map(|m| AnthropicMessage {
            role: match m.role {
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: m.content.clone(),
        })
        .collect();

    let request = AnthropicRequest {
        model,
        max_tokens,
        system,
        messages: wire_messages,
        temperature,
    };

    let response = http
        .post(ANTHROPIC_MESSAGES_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("content-type", "application/json")
        .json(&request)
        .send()
        .await
        .map_err(|e| LlmError::Http(e.to_string()))?;

    let status = response.status();
    let latency = start.elapsed().as_secs_f64();
    metrics::histogram!("llm.api.latency", "provider" => "anthropic", "model" => model.to_string())
        .record(latency);

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Auth(format!("{}: {}", status, body)));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return Err(LlmError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<AnthropicError>(&body);
        let msg = match parsed {
            Ok(e) => {
                if e.error.r#type == "invalid_request_error" && e.error.message.contains("context window") {
                    return Err(LlmError::ContextWindowExceeded(e.error.message));
                }
                e.error.message
            }
            Err(_) => body,
        };
        return Err(LlmError::Api(format!("{}: {}", status, msg)));
    }

    let body: AnthropicResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Parse(format!("failed to parse Anthropic response: {}", e)))?;

    let llm_response = from_wire_response(body);

    metrics::counter!("llm.api.input_tokens", "provider" => "anthropic").increment(llm_response.usage.input_tokens);
    metrics::counter!("llm.api.output_tokens", "provider" => "anthropic").increment(llm_response.usage.output_tokens);

    Ok(llm_response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_response() {
        let json = r#"{
            "content": [{"type": "text", "text": "Hello world"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;

        let resp: AnthropicResponse = serde_json::from_str(json).unwrap();
        let parsed = from_wire_response(resp);

        assert_eq!(parsed.stop_reason, StopReason::EndTurn);
        assert_eq!(parsed.usage.input_tokens, 10);
        assert_eq!(parsed.text, "Hello world");
    }
}
