use serde::{Deserialize, Serialize};

use super::types::{LlmResponse, Message, Role, StopReason, TokenUsage};
use super::LlmError;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: String,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

fn to_wire_messages(system: &str, messages: &[Message]) -> Vec<ChatMessage> {
    let mut wire = vec![ChatMessage {
        role: "system".into(),
        content: system.to_string(),
    }];
    for msg in messages {
        wire.push(ChatMessage {
            role: match msg.role {
                Role::User => "user".into(),
                Role::Assistant => "assistant".into(),
            },
            content: msg.content.clone(),
        });
    }
    wire
}

fn from_wire_response(resp: ChatResponse) -> Result<LlmResponse, LlmError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Parse("empty choices array".into()))?;

    let stop_reason = match choice.finish_reason.as_str() {
        "stop" => StopReason::EndTurn,
        "length" => StopReason::MaxTokens,
        other => StopReason::Other(other.to_string()),
    };

    Ok(LlmResponse {
        text: choice.message.content.unwrap_or_default(),
        stop_reason,
        usage: TokenUsage {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
        },
    })
}

/// Send a single-turn chat completion request to the OpenAI API.
pub async fn send_chat_completion(
    http: &reqwest::Client,
    api_key: &str,
    model: &str,
    max_tokens: u32,
    temperature: Option<f64>,
    system: &str,
    messages: &[Message],
) -> Result<LlmResponse, LlmError> {
    let start = std::time::Instant::now();

    let request = ChatRequest {
        model,
        max_tokens,
        messages: to_wire_messages(system, messages),
        temperature,
    };

    let response = http
        .post(OPENAI_CHAT_URL)
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| LlmError::Http(e.to_string()))?;

    let status = response.status();
    let latency = start.elapsed().as_secs_f64();
    metrics::histogram!("llm.api.latency", "provider" => "openai", "model" => model.to_string()).record(latency);

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
        let parsed = serde_json::from_str::<OpenAiError>(&body);
        let msg = match parsed {
            Ok(e) => {
                if e.error.message.contains("context length") {
                    return Err(LlmError::ContextWindowExceeded(e.error.message));
                }
                e.error.message
            }
            Err(_) => body,
        };
        return Err(LlmError::Api(format!("{}: {}", status, msg)));
    }

    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Parse(format!("failed to parse OpenAI response: {}", e)))?;

    let llm_response = from_wire_response(body)?;

    metrics::counter!("llm.api.input_tokens", "provider" => "openai").increment(llm_response.usage.input_tokens);
    metrics::counter!("llm.api.output_tokens", "provider" => "openai").increment(llm_response.usage.output_tokens);

    Ok(llm_response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_response() {
        let json = r#"{
            "choices": [{"message": {"content": "Hello world"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4}
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        let parsed = from_wire_response(resp).unwrap();
        assert_eq!(parsed.text, "Hello world");
        assert_eq!(parsed.stop_reason, StopReason::EndTurn);
    }
}
