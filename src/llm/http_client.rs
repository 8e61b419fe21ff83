//! HTTP-backed LLM collaborator (§4.4, §4.11) — an OpenAI-compatible
//! chat-completions endpoint reached over `reqwest`, streamed via
//! server-sent `data: ` lines.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use super::{LlmClient, LlmError, LlmMessage, LlmRole};
use crate::config::LlmConfig;

pub struct HttpLlmClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| LlmError::ProviderUnavailable(format!("failed to build http client: {e}")))?;
        Ok(Self { http, endpoint: config.endpoint.clone(), model: config.model.clone(), api_key })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl From<&LlmMessage> for ChatMessage {
    fn from(m: &LlmMessage) -> Self {
        let role = match m.role {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        };
        Self { role, content: m.content.clone() }
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    delta: ChatDelta,
}

#[derive(Deserialize, Default)]
struct ChatDelta {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    fn name(&self) -> &'static str {
        "http-chat-completions"
    }

    async fn stream_completion(
        &self,
        messages: &[LlmMessage],
        context: Option<&str>,
        tokens: mpsc::Sender<Result<String, LlmError>>,
    ) -> Result<(), LlmError> {
        let mut chat_messages: Vec<ChatMessage> = Vec::with_capacity(messages.len() + 1);
        if let Some(ctx) = context {
            chat_messages.push(ChatMessage { role: "system", content: format!("Use the following context to ground your answer:\n{ctx}") });
        }
        chat_messages.extend(messages.iter().map(ChatMessage::from));

        let body = ChatRequest { model: &self.model, messages: chat_messages, stream: true };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ProviderUnavailable(format!("status {status}: {text}")));
        }

        let mut stream = response.bytes_stream();
        let mut carry = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = tokens.send(Err(LlmError::ProviderUnavailable(e.to_string()))).await;
                    return Ok(());
                }
            };
            carry.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = carry.find('\n') {
                let line = carry[..newline].trim().to_string();
                carry.drain(..=newline);
                let Some(data) = line.strip_prefix("data: ") else { continue };
                if data == "[DONE]" {
                    return Ok(());
                }
                match serde_json::from_str::<ChatChunk>(data) {
                    Ok(parsed) => {
                        if let Some(delta) = parsed.choices.first().and_then(|c| c.delta.content.clone()) {
                            if tokens.send(Ok(delta)).await.is_err() {
                                return Ok(()); // receiver dropped -> cancellation, not an error
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "llm: malformed stream chunk, skipping"),
                }
            }
        }
        Ok(())
    }
}
