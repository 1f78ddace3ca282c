//! Google Gemini provider implementation (generateContent)

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Google Gemini provider
pub struct GeminiProvider {
    client: Client,
    profile: ProviderProfile,
}

impl GeminiProvider {
    pub fn new(profile: ProviderProfile) -> Result<Self, Error> {
        let client = http_client(&profile)?;
        Ok(Self { client, profile })
    }
}

impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.profile.model
    }

    #[instrument(skip_all, fields(provider = "gemini", model = %self.profile.model))]
    async fn send_turn(&self, conversation: &Conversation) -> Result<ChatMessage, ProviderError> {
        let api_request = build_request(conversation, &self.profile);
        debug!(contents = api_request.contents.len(), "sending generateContent request");

        let api_key = self
            .profile
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::Auth("no API key configured".into()))?;

        let req = self
            .client
            .post(&self.profile.endpoint)
            .header("x-goog-api-key", api_key)
            .json(&api_request);

        let body = send_request(req).await?;
        let content = parse_response(&body)?;

        debug!(chars = content.len(), "received assistant message");
        Ok(ChatMessage::assistant(content))
    }
}

/// Translate the canonical conversation into a generateContent request.
///
/// Assistant turns use the `model` role; system messages become the
/// `systemInstruction`.
fn build_request(conversation: &Conversation, profile: &ProviderProfile) -> GeminiRequest {
    let mut contents: Vec<GeminiContent> = Vec::new();

    for msg in conversation.turns() {
        let role = match msg.role {
            Role::Assistant => "model",
            Role::User | Role::System => "user",
        };

        match contents.last_mut() {
            Some(last) if last.role == Some(role) => last.parts.push(GeminiPart {
                text: msg.content.clone(),
            }),
            _ => contents.push(GeminiContent {
                role: Some(role),
                parts: vec![GeminiPart {
                    text: msg.content.clone(),
                }],
            }),
        }
    }

    GeminiRequest {
        contents,
        system_instruction: conversation.system_prompt().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text }],
        }),
        generation_config: GenerationConfig {
            temperature: profile.temperature,
            max_output_tokens: profile.max_tokens,
        },
    }
}

/// Join the text parts of the first candidate
fn parse_response(body: &str) -> Result<String, ProviderError> {
    let api_response: GeminiResponse = parse_body(body)?;

    let candidate = api_response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("no candidates in response".into()))?;

    let parts = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default();

    let texts: Vec<String> = parts.into_iter().filter_map(|p| p.text).collect();
    if texts.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "candidate has no text parts".into(),
        ));
    }

    Ok(texts.concat())
}

// ============================================================================
// Gemini API Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}
