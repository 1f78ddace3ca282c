//! # AI Provider Interface
//!
//! A trait-based abstraction for talking to AI back ends through one
//! canonical conversation shape.
//!
//! ## Design
//! - `LlmProvider` defines the single capability: `send_turn`
//! - Adapters for OpenAI chat completions, Anthropic messages and Gemini
//!   generateContent; the custom vendor reuses the OpenAI shape against an
//!   arbitrary URL
//! - Adapters hold no conversation state: the caller owns the `Conversation`
//! - `PROVIDER_DEFAULTS` is resolved once into a `ProviderProfile`

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;

use doctai_error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Types
// ============================================================================

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Append-only conversation state.
///
/// Messages are never reordered or edited once pushed. One `Conversation`
/// belongs to exactly one test run.
#[derive(Debug, Default, Serialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the end of the conversation
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// All system messages joined, for vendors that take the system prompt
    /// out of band
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// User and assistant turns in order, without system messages
    pub fn turns(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// The closed set of provider failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProviderErrorKind {
    AuthError,
    RateLimited,
    NetworkError,
    MalformedResponse,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthError => "AuthError",
            Self::RateLimited => "RateLimited",
            Self::NetworkError => "NetworkError",
            Self::MalformedResponse => "MalformedResponse",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error type for provider operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Credentials were rejected (401/403)
    Auth(String),
    /// Rate limited (429)
    RateLimited { retry_after: Option<u64> },
    /// Transport failure, request timeout or unexpected HTTP status
    Network(String),
    /// The response could not be turned into a single assistant message
    MalformedResponse(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Auth(_) => ProviderErrorKind::AuthError,
            Self::RateLimited { .. } => ProviderErrorKind::RateLimited,
            Self::Network(_) => ProviderErrorKind::NetworkError,
            Self::MalformedResponse(_) => ProviderErrorKind::MalformedResponse,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(e) => write!(f, "Authentication failed: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::MalformedResponse(e) => write!(f, "Malformed response: {}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        let kind = match err.kind() {
            ProviderErrorKind::AuthError => ErrorKind::ProviderAuth,
            ProviderErrorKind::RateLimited => ErrorKind::ProviderRateLimited,
            ProviderErrorKind::NetworkError => ErrorKind::ProviderNetwork,
            ProviderErrorKind::MalformedResponse => ErrorKind::ProviderMalformed,
        };
        Error::new(kind, err.to_string()).with_operation("provider::send_turn")
    }
}

/// Map a non-success HTTP status onto the provider error taxonomy
pub fn classify_status(status: u16, body: &str, retry_after: Option<u64>) -> ProviderError {
    let message = error_message(body);
    match status {
        401 | 403 => ProviderError::Auth(message),
        429 => ProviderError::RateLimited { retry_after },
        _ => ProviderError::Network(format!("HTTP {}: {}", status, message)),
    }
}

/// Pull the human-readable message out of a vendor error body
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });

    match message {
        Some(m) => m,
        None => body.chars().take(200).collect(),
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// The main AI provider trait
#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openai", "anthropic")
    fn name(&self) -> &str;

    /// The model requests are sent to
    fn model(&self) -> &str;

    /// Send the whole conversation and return the assistant's reply
    async fn send_turn(&self, conversation: &Conversation) -> Result<ChatMessage, ProviderError>;
}

// ============================================================================
// Provider Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Gemini,
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Custom => "custom",
        }
    }

    /// Default endpoint and model for this vendor
    pub fn defaults(&self) -> &'static ProviderDefaults {
        let index = match self {
            Self::OpenAI => 0,
            Self::Anthropic => 1,
            Self::Gemini => 2,
            Self::Custom => 3,
        };
        &PROVIDER_DEFAULTS[index]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "custom" => Ok(Self::Custom),
            _ => Err(Error::unknown_provider(s)),
        }
    }
}

/// Per-vendor defaults. `{model}` in an endpoint is replaced by the model name.
#[derive(Debug, Clone, Copy)]
pub struct ProviderDefaults {
    pub kind: ProviderKind,
    pub endpoint: Option<&'static str>,
    pub model: Option<&'static str>,
}

/// Indexed by `ProviderKind::defaults`
pub static PROVIDER_DEFAULTS: [ProviderDefaults; 4] = [
    ProviderDefaults {
        kind: ProviderKind::OpenAI,
        endpoint: Some("https://api.openai.com/v1/chat/completions"),
        model: Some("gpt-4o"),
    },
    ProviderDefaults {
        kind: ProviderKind::Anthropic,
        endpoint: Some("https://api.anthropic.com/v1/messages"),
        model: Some("claude-3-5-sonnet-20241022"),
    },
    ProviderDefaults {
        kind: ProviderKind::Gemini,
        endpoint: Some(
            "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent",
        ),
        model: Some("gemini-1.5-pro-latest"),
    },
    ProviderDefaults {
        kind: ProviderKind::Custom,
        endpoint: None,
        model: None,
    },
];

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// A fully resolved provider configuration
#[derive(Clone)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub endpoint: String,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ProviderProfile {
    /// Fill the gaps in user-supplied settings from `PROVIDER_DEFAULTS`.
    ///
    /// Fails with `ConfigInvalid` when the custom vendor lacks a URL or model,
    /// or a hosted vendor lacks an API key.
    pub fn resolve(
        kind: ProviderKind,
        model: Option<String>,
        api_key: Option<String>,
        api_url: Option<String>,
        request_timeout_secs: u64,
    ) -> Result<Self, Error> {
        let defaults = kind.defaults();
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let model = non_empty(model)
            .or_else(|| defaults.model.map(str::to_string))
            .ok_or_else(|| {
                Error::config_invalid(format!("a model is required for the {} provider", kind))
                    .with_context("provider", kind.as_str())
            })?;

        let endpoint = non_empty(api_url)
            .or_else(|| defaults.endpoint.map(|e| e.replace("{model}", &model)))
            .ok_or_else(|| {
                Error::config_invalid(format!("an API URL is required for the {} provider", kind))
                    .with_context("provider", kind.as_str())
            })?;

        let api_key = non_empty(api_key);
        if api_key.is_none() && kind != ProviderKind::Custom {
            return Err(
                Error::config_invalid(format!("an API key is required for the {} provider", kind))
                    .with_context("provider", kind.as_str()),
            );
        }

        if request_timeout_secs == 0 {
            return Err(Error::config_invalid("request timeout must be at least one second"));
        }

        Ok(Self {
            kind,
            model,
            api_key,
            endpoint,
            request_timeout_secs,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }
}

// The key never ends up in logs
impl fmt::Debug for ProviderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderProfile")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

// ============================================================================
// Vendor dispatch
// ============================================================================

/// The closed set of vendor adapters, chosen once from a profile
pub enum Provider {
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
    Gemini(GeminiProvider),
}

impl Provider {
    pub fn from_profile(profile: ProviderProfile) -> Result<Self, Error> {
        let provider = match profile.kind {
            ProviderKind::OpenAI | ProviderKind::Custom => {
                Provider::OpenAI(OpenAIProvider::new(profile)?)
            }
            ProviderKind::Anthropic => Provider::Anthropic(AnthropicProvider::new(profile)?),
            ProviderKind::Gemini => Provider::Gemini(GeminiProvider::new(profile)?),
        };
        Ok(provider)
    }
}

impl LlmProvider for Provider {
    fn name(&self) -> &str {
        match self {
            Provider::OpenAI(p) => p.name(),
            Provider::Anthropic(p) => p.name(),
            Provider::Gemini(p) => p.name(),
        }
    }

    fn model(&self) -> &str {
        match self {
            Provider::OpenAI(p) => p.model(),
            Provider::Anthropic(p) => p.model(),
            Provider::Gemini(p) => p.model(),
        }
    }

    async fn send_turn(&self, conversation: &Conversation) -> Result<ChatMessage, ProviderError> {
        match self {
            Provider::OpenAI(p) => p.send_turn(conversation).await,
            Provider::Anthropic(p) => p.send_turn(conversation).await,
            Provider::Gemini(p) => p.send_turn(conversation).await,
        }
    }
}

// ============================================================================
// HTTP plumbing shared by the adapters
// ============================================================================

pub(crate) fn http_client(profile: &ProviderProfile) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(profile.request_timeout_secs))
        .build()
        .map_err(|e| {
            Error::config_invalid("failed to create HTTP client")
                .with_context("provider", profile.kind.as_str())
                .set_source(e)
        })
}

/// Send a prepared request and return the body of a successful response
pub(crate) async fn send_request(request: reqwest::RequestBuilder) -> Result<String, ProviderError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Network(format!("request timed out: {}", e))
        } else {
            ProviderError::Network(e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), &body, retry_after));
    }

    response
        .text()
        .await
        .map_err(|e| ProviderError::Network(format!("failed to read response body: {}", e)))
}

/// Parse a response body as JSON or report it as malformed
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are helpful");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are helpful");

        assert_eq!(ChatMessage::user("Hello").role, Role::User);
        assert_eq!(ChatMessage::assistant("Hi there!").role, Role::Assistant);
    }

    #[test]
    fn test_conversation_is_append_only_and_ordered() {
        let mut conversation = Conversation::new();
        conversation.push(ChatMessage::system("rules"));
        conversation.push(ChatMessage::user("docs"));
        conversation.push(ChatMessage::assistant("scripts"));

        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(conversation.last().map(|m| m.content.as_str()), Some("scripts"));
        assert_eq!(conversation.turns().count(), 2);
    }

    #[test]
    fn test_system_prompt_joins_all_system_messages() {
        let mut conversation = Conversation::new();
        assert_eq!(conversation.system_prompt(), None);

        conversation.push(ChatMessage::system("first"));
        conversation.push(ChatMessage::user("question"));
        conversation.push(ChatMessage::system("second"));
        assert_eq!(conversation.system_prompt().as_deref(), Some("first\n\nsecond"));
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!(" gemini ".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);

        let err = "bard".parse::<ProviderKind>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownProvider);
    }

    #[test]
    fn test_defaults_table_matches_kind() {
        for kind in [
            ProviderKind::OpenAI,
            ProviderKind::Anthropic,
            ProviderKind::Gemini,
            ProviderKind::Custom,
        ] {
            assert_eq!(kind.defaults().kind, kind);
        }
        assert!(ProviderKind::Custom.defaults().endpoint.is_none());
    }

    #[test]
    fn test_profile_resolves_vendor_defaults() {
        let profile = ProviderProfile::resolve(
            ProviderKind::Anthropic,
            None,
            Some("sk-ant-test".into()),
            None,
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )
        .unwrap();

        assert_eq!(profile.model, "claude-3-5-sonnet-20241022");
        assert_eq!(profile.endpoint, "https://api.anthropic.com/v1/messages");
        assert_eq!(profile.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_gemini_endpoint_includes_model() {
        let profile = ProviderProfile::resolve(
            ProviderKind::Gemini,
            Some("gemini-2.0-flash".into()),
            Some("key".into()),
            None,
            30,
        )
        .unwrap();

        assert_eq!(
            profile.endpoint,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_custom_requires_url_and_model() {
        let err = ProviderProfile::resolve(ProviderKind::Custom, None, None, Some("http://x".into()), 30)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let err = ProviderProfile::resolve(ProviderKind::Custom, Some("m".into()), None, None, 30)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let profile = ProviderProfile::resolve(
            ProviderKind::Custom,
            Some("local-model".into()),
            None,
            Some("http://localhost:8080/v1/chat/completions".into()),
            30,
        )
        .unwrap();
        assert!(profile.api_key.is_none());
    }

    #[test]
    fn test_hosted_vendor_requires_api_key() {
        let err = ProviderProfile::resolve(ProviderKind::OpenAI, None, Some("  ".into()), None, 30)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_profile_debug_redacts_key() {
        let profile =
            ProviderProfile::resolve(ProviderKind::OpenAI, None, Some("sk-secret".into()), None, 30)
                .unwrap();
        let debug = format!("{:?}", profile);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_classify_status() {
        let body = r#"{"error": {"message": "Incorrect API key provided"}}"#;
        assert_eq!(
            classify_status(401, body, None),
            ProviderError::Auth("Incorrect API key provided".into())
        );
        assert_eq!(classify_status(403, "forbidden", None).kind(), ProviderErrorKind::AuthError);
        assert_eq!(
            classify_status(429, "", Some(20)),
            ProviderError::RateLimited { retry_after: Some(20) }
        );

        let err = classify_status(503, "overloaded", None);
        assert_eq!(err.kind(), ProviderErrorKind::NetworkError);
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_provider_error_into_error() {
        let err: Error = ProviderError::RateLimited { retry_after: None }.into();
        assert_eq!(err.kind(), ErrorKind::ProviderRateLimited);
        assert!(err.is_retryable());

        let err: Error = ProviderError::MalformedResponse("no choices".into()).into();
        assert_eq!(err.kind(), ErrorKind::ProviderMalformed);
        assert!(!err.is_retryable());
    }
}
