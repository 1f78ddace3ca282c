//! Anthropic Claude provider implementation

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    profile: ProviderProfile,
}

impl AnthropicProvider {
    pub fn new(profile: ProviderProfile) -> Result<Self, Error> {
        let client = http_client(&profile)?;
        Ok(Self { client, profile })
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.profile.model
    }

    #[instrument(skip_all, fields(provider = "anthropic", model = %self.profile.model))]
    async fn send_turn(&self, conversation: &Conversation) -> Result<ChatMessage, ProviderError> {
        let api_request = build_request(conversation, &self.profile);
        debug!(messages = api_request.messages.len(), "sending messages request");

        let api_key = self
            .profile
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::Auth("no API key configured".into()))?;

        let req = self
            .client
            .post(&self.profile.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&api_request);

        let body = send_request(req).await?;
        let content = parse_response(&body)?;

        debug!(chars = content.len(), "received assistant message");
        Ok(ChatMessage::assistant(content))
    }
}

/// Translate the canonical conversation into a messages request.
///
/// System messages move to the top-level `system` field. Consecutive turns
/// with the same role are merged because the API requires alternation.
fn build_request(conversation: &Conversation, profile: &ProviderProfile) -> AnthropicRequest {
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for msg in conversation.turns() {
        let role = match msg.role {
            Role::Assistant => "assistant",
            Role::User | Role::System => "user",
        };

        match messages.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&msg.content);
            }
            _ => messages.push(AnthropicMessage {
                role,
                content: msg.content.clone(),
            }),
        }
    }

    AnthropicRequest {
        model: profile.model.clone(),
        messages,
        system: conversation.system_prompt(),
        max_tokens: profile.max_tokens,
        temperature: Some(profile.temperature),
    }
}

/// Concatenate the text blocks of a messages response
pub(crate) fn parse_response(body: &str) -> Result<String, ProviderError> {
    let api_response: AnthropicResponse = parse_body(body)?;

    let texts: Vec<String> = api_response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect();

    if texts.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "response has no text content blocks".into(),
        ));
    }

    Ok(texts.concat())
}

// ============================================================================
// Anthropic API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> ProviderProfile {
        ProviderProfile::resolve(ProviderKind::Anthropic, None, Some("sk-ant".into()), None, 30)
            .unwrap()
    }

    #[test]
    fn test_system_prompt_moves_out_of_messages() {
        let mut conversation = Conversation::new();
        conversation.push(ChatMessage::system("contract"));
        conversation.push(ChatMessage::user("docs"));
        conversation.push(ChatMessage::assistant("scripts"));
        conversation.push(ChatMessage::user("feedback"));

        let body = serde_json::to_value(build_request(&conversation, &profile())).unwrap();

        assert_eq!(body["system"], "contract");
        assert_eq!(body["max_tokens"], 4096);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["content"], "feedback");
    }

    #[test]
    fn test_consecutive_user_turns_are_merged() {
        let mut conversation = Conversation::new();
        conversation.push(ChatMessage::user("one"));
        conversation.push(ChatMessage::user("two"));

        let request = build_request(&conversation, &profile());
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].content, "one\n\ntwo");
        assert!(request.system.is_none());
    }

    #[test]
    fn test_parse_response_concatenates_text_blocks() {
        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-20241022",
            "content": [
                { "type": "text", "text": "first " },
                { "type": "tool_use", "id": "t1", "name": "x", "input": {} },
                { "type": "text", "text": "second" }
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        })
        .to_string();

        assert_eq!(parse_response(&body).unwrap(), "first second");
    }

    #[test]
    fn test_parse_response_without_text_is_malformed() {
        let body = json!({ "content": [] }).to_string();
        let err = parse_response(&body).unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::MalformedResponse);

        let err = parse_response(r#"{"type": "error"}"#).unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::MalformedResponse);
    }
}
