//! Tokenizer backed by a llama.cpp-style `/tokenize` endpoint.
//!
//! Request: `{"content": "<text>"}`. Response: `{"tokens": [1, 2, ...]}`.
//! Messages are rendered with a ChatML-like template so the count includes
//! role markers and separators.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::context::{TokenizeFuture, Tokenizer};
use crate::ChatMessage;

#[derive(Serialize)]
struct TokenizeRequest<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct TokenizeResponse {
    tokens: Vec<u32>,
}

/// HTTP tokenizer client.
#[derive(Debug, Clone)]
pub struct HttpTokenizer {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenizer {
    pub fn new(url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn tokenize_text(&self, text: &str) -> Result<Vec<u32>, String> {
        let resp = self
            .client
            .post(&self.url)
            .json(&TokenizeRequest { content: text })
            .send()
            .await
            .map_err(|e| format!("tokenize request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("tokenize HTTP {status}: {body}"));
        }
        let parsed: TokenizeResponse = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse tokenize response: {e}"))?;
        trace!("Tokenized {} chars into {} tokens", text.len(), parsed.tokens.len());
        Ok(parsed.tokens)
    }
}

/// Render messages the way a ChatML template would lay them out.
pub fn render_chat_template(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for msg in messages {
        out.push_str("<|im_start|>");
        out.push_str(&msg.role.to_string());
        out.push('\n');
        out.push_str(&msg.text());
        out.push_str("<|im_end|>\n");
    }
    out
}

impl Tokenizer for HttpTokenizer {
    fn tokenize<'a>(&'a self, _model: &'a str, messages: &'a [ChatMessage]) -> TokenizeFuture<'a> {
        Box::pin(async move {
            let text = render_chat_template(messages);
            self.tokenize_text(&text).await
        })
    }
}
