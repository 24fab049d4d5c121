//! Conversational relay between a chat transport and a language model.
//!
//! `chatrelay` receives lines from an IRC-like chat transport, keeps a
//! persistent per-conversation history, builds a token-bounded context from
//! it, streams a completion from an OpenAI-compatible API and delivers the
//! response back as protocol-safe lines.
//!
//! # Pipeline
//!
//! ```text
//! inbound line ─► HistoryStore::append ─► (eligible?) ContextBuilder::build
//!      ─► CompletionOrchestrator::submit ─► tick ─► CompletionBackend::start
//!      ─► TransportEvent (delta / result / error) ─► CompletionEvent
//!      ─► DeliveryAdapter::send  +  HistoryStore::append (assistant turn)
//! ```
//!
//! [`Relay`](relay::Relay) wires these together and runs the host loop.
//!
//! # Where to find things
//!
//! - **History persistence, editing, sessions:** [`history`]:
//!   [`ConversationLog`](history::ConversationLog) and
//!   [`HistoryStore`](history::HistoryStore).
//! - **Token budgets and trimming:** [`context`]:
//!   [`ContextBuilder`](context::ContextBuilder),
//!   [`TrimStrategy`](context::TrimStrategy),
//!   [`TokenCache`](context::TokenCache).
//! - **Request lifecycle:** [`completion`]:
//!   [`CompletionOrchestrator`](completion::CompletionOrchestrator) with
//!   single admission and delta-to-line reassembly.
//! - **HTTP and SSE:** [`api`]: the streaming backend and HTTP tokenizer.
//! - **Outgoing text shaping:** [`delivery`].
//! - **Settings and model profiles:** [`config`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`history`] | Per-conversation logs, line format, rotation, registry |
//! | [`context`] | Token cache, tokenizers, budget, context builder |
//! | [`completion`] | Orchestrator, request states, line assembly, events |
//! | [`api`] | SSE streaming, HTTP tokenizer, streaming backend |
//! | [`delivery`] | Sentence stripping, line splitting, talk switches |
//! | [`relay`] | Pipeline glue and host event loop |
//! | [`config`] | `RelayConfig`, `ModelProfile`, `InferenceParams` |

pub mod api;
pub mod completion;
pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod history;
pub mod prelude;
pub mod relay;

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default model for completions.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body for OpenAI-compatible endpoints. Unset
/// optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub frequency_penalty: f32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "is_false")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

/// Asks the server to append a usage chunk to the stream.
#[derive(Serialize, Debug, Clone)]
pub struct StreamOptions {
    pub include_usage: bool,
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}
fn is_false(v: &bool) -> bool {
    !*v
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the composed context.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Plain text, or a multi-part body carrying images.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

/// A role-tagged message sent to the completion API.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// A user message with the text followed by one image part per URL.
    pub fn user_with_images(text: impl Into<String>, urls: &[String]) -> Self {
        let mut parts = vec![ContentPart::Text { text: text.into() }];
        parts.extend(urls.iter().map(|url| ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.clone() },
        }));
        Self {
            role: MessageRole::User,
            content: MessageContent::Parts(parts),
        }
    }

    /// The textual content; image parts are skipped.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Token usage statistics.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) url: String,
}

impl ApiClient {
    /// Create a client for the default OpenAI endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_url(api_key, OPENAI_URL)
    }

    /// Create a client for any OpenAI-compatible chat completions URL.
    pub fn with_url(api_key: impl Into<String>, url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chatrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = ChatMessage::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.text(), "hello");

        let assist = ChatMessage::assistant("prefill");
        assert_eq!(assist.role, MessageRole::Assistant);
    }

    #[test]
    fn text_message_serializes_as_string() {
        let json = serde_json::to_value(ChatMessage::user("alice: hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "alice: hi");
    }

    #[test]
    fn image_message_serializes_as_parts() {
        let msg = ChatMessage::user_with_images("look", &["https://x.io/a.png".to_string()]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "look");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "https://x.io/a.png");
        assert_eq!(msg.text(), "look");
    }

    #[test]
    fn chat_request_skips_unset_fields() {
        let req = ChatRequest {
            model: "test-model".into(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: Some(100),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["max_tokens"], 100);
        assert!(json.get("top_p").is_none());
        assert!(json.get("seed").is_none());
        assert!(json.get("stream").is_none());
        assert!(json.get("frequency_penalty").is_none());
    }
}
