use super::{http_client, ChatRequest, ChatResponse, LlmError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

fn build_request(request: &ChatRequest) -> OpenAiRequest<'_> {
    OpenAiRequest {
        model: &request.model,
        messages: request
            .messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect(),
        stream: false,
    }
}

pub async fn chat(config: &OpenAiConfig, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
    let client = http_client(config.timeout)?;
    let body = build_request(request);

    tracing::debug!(
        base_url = %config.base_url,
        model = %request.model,
        messages = body.messages.len(),
        "Sending chat completion"
    );

    let mut req = client
        .post(format!("{}/chat/completions", config.base_url))
        .header("Content-Type", "application/json")
        .json(&body);

    if !config.api_key.is_empty() {
        req = req.header("Authorization", format!("Bearer {}", config.api_key));
    }

    let resp = req.send().await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }

    let data: OpenAiResponse = resp
        .json()
        .await
        .map_err(|e| LlmError::Parse(e.to_string()))?;
    let content = data
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| LlmError::Parse("response contained no choices".to_string()))?;

    Ok(ChatResponse {
        content,
        model: request.model.clone(),
    })
}
