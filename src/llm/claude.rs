use super::{http_client, ChatRequest, ChatResponse, LlmError, Role};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Deserialize)]
struct ClaudeContent {
    #[serde(default)]
    text: String,
}

/// System messages are lifted into the top-level `system` field.
fn build_request(request: &ChatRequest) -> ClaudeRequest {
    let system_parts: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let messages: Vec<ClaudeMessage> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| ClaudeMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        })
        .collect();

    ClaudeRequest {
        model: request.model.clone(),
        max_tokens: 4096,
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
    }
}

pub async fn chat(config: &ClaudeConfig, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
    let client = http_client(config.timeout)?;
    let body = build_request(request);

    tracing::debug!(model = %request.model, messages = body.messages.len(), "Sending Claude message");

    let resp = client
        .post(format!("{}/v1/messages", config.base_url))
        .header("Content-Type", "application/json")
        .header("x-api-key", &config.api_key)
        .header("anthropic-version", "2023-06-01")
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }

    let data: ClaudeResponse = resp
        .json()
        .await
        .map_err(|e| LlmError::Parse(e.to_string()))?;
    let content = data
        .content
        .into_iter()
        .map(|c| c.text)
        .collect::<Vec<_>>()
        .concat();

    Ok(ChatResponse {
        content,
        model: request.model.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[test]
    fn test_build_request_lifts_system_prompt() {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system("You are ClauseEase."),
                ChatMessage::user("Context:\n\nlease"),
                ChatMessage::assistant("Context received."),
            ],
            model: "claude-sonnet-4-20250514".into(),
        };
        let body = build_request(&request);
        assert_eq!(body.system.as_deref(), Some("You are ClauseEase."));
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "user");
        assert_eq!(body.messages[1].role, "assistant");
    }

    #[test]
    fn test_build_request_without_system() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            model: "m".into(),
        };
        let json = serde_json::to_value(build_request(&request)).unwrap();
        assert!(json.get("system").is_none());
    }
}
