//! OpenAI-compatible chat-completions adapter.
//!
//! Works against the official API and local compatible servers (Ollama,
//! LM Studio). The endpoint base is expected to include the `/v1` prefix.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clients::{check_http_response, ClientError, LlmClient};
use crate::config::LlmConfig;
use crate::types::{ChatMessage, ChatRole};

/// Chat completion request body.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
}

/// A single message on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

/// Chat completion response body.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// A single choice in a chat completion response.
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

/// HTTP LLM client for OpenAI-compatible backends.
pub struct HttpLlmClient {
    endpoint: String,
    credential: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl HttpLlmClient {
    /// Create a client from the runtime configuration.
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            credential: config.credential.clone(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(
        &self,
        system_instruction: &str,
        conversation: &[ChatMessage],
    ) -> Result<String, ClientError> {
        let mut messages = Vec::with_capacity(conversation.len().saturating_add(1));
        messages.push(WireMessage {
            role: "system".to_owned(),
            content: system_instruction.to_owned(),
        });
        for msg in conversation {
            let role = match msg.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(WireMessage {
                role: role.to_owned(),
                content: msg.content.clone(),
            });
        }

        let body = ChatRequest {
            model: self.model.clone(),
            messages,
        };

        let url = format!("{}/chat/completions", self.endpoint);
        let mut request = self.client.post(&url).json(&body);
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential);
        }

        let raw = check_http_response(request.send().await?).await?;
        let parsed: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| ClientError::Parse(format!("chat completion body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClientError::Parse("chat completion returned no choices".to_owned()))
    }
}
