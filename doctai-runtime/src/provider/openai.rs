//! OpenAI-compatible provider implementation
//!
//! Works with OpenAI chat completions and any endpoint speaking the same
//! shape (the `custom` vendor: vLLM, Ollama, LiteLLM, Azure-style proxies).

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    client: Client,
    profile: ProviderProfile,
}

impl OpenAIProvider {
    pub fn new(profile: ProviderProfile) -> Result<Self, Error> {
        let client = http_client(&profile)?;
        Ok(Self { client, profile })
    }

    fn build_request(&self, conversation: &Conversation) -> OpenAIRequest {
        build_request(conversation, &self.profile)
    }
}

impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        self.profile.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.profile.model
    }

    #[instrument(skip_all, fields(provider = %self.profile.kind, model = %self.profile.model))]
    async fn send_turn(&self, conversation: &Conversation) -> Result<ChatMessage, ProviderError> {
        let api_request = self.build_request(conversation);
        debug!(messages = api_request.messages.len(), "sending chat completion");

        let mut req = self.client.post(&self.profile.endpoint).json(&api_request);

        if let Some(api_key) = &self.profile.api_key {
            req = req.bearer_auth(api_key);
        }

        let body = send_request(req).await?;
        let content = parse_response(&body, self.profile.kind == ProviderKind::Custom)?;

        debug!(chars = content.len(), "received assistant message");
        Ok(ChatMessage::assistant(content))
    }
}

/// Translate the canonical conversation into a chat completions request
fn build_request(conversation: &Conversation, profile: &ProviderProfile) -> OpenAIRequest {
    OpenAIRequest {
        model: profile.model.clone(),
        messages: conversation.messages().iter().map(OpenAIMessage::from).collect(),
        temperature: Some(profile.temperature),
        max_tokens: Some(profile.max_tokens),
    }
}

/// Extract the single assistant message from a chat completions response.
///
/// With `accept_anthropic_shape`, a body that carries Anthropic-style
/// `content` blocks instead of `choices` is accepted too.
fn parse_response(body: &str, accept_anthropic_shape: bool) -> Result<String, ProviderError> {
    let value: serde_json::Value = parse_body(body)?;

    if value.get("choices").is_none() && accept_anthropic_shape && value.get("content").is_some() {
        return anthropic::parse_response(body);
    }

    let api_response: OpenAIResponse = serde_json::from_value(value)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("no choices in response".into()))?;

    choice
        .message
        .content
        .ok_or_else(|| ProviderError::MalformedResponse("choice has no text content".into()))
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

impl From<&ChatMessage> for OpenAIMessage {
    fn from(msg: &ChatMessage) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role,
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}
