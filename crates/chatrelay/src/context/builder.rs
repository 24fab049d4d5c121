//! Builds the role-tagged message list sent to the completion API.
//!
//! Two trimming strategies fit history into a [`TokenBudget`]:
//!
//! - [`TrimStrategy::Additive`] tokenizes messages one at a time (through the
//!   [`TokenCache`]) from newest to oldest and stops at the first message that
//!   would overflow the budget.
//! - [`TrimStrategy::Subtractive`] tokenizes the whole composed request and,
//!   while it is over budget, drops a batch of the oldest messages sized by
//!   the overage fraction.
//!
//! Output is always chronological: system prompts, then history oldest to
//! newest.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{TokenBudget, TokenCache, Tokenizer};
use crate::error::{RelayError, Result};
use crate::history::HistoryEntry;
use crate::{ChatMessage, ContentPart, MessageContent};

/// Minimum number of messages a subtractive pass removes.
const MIN_SUBTRACTIVE_DROP: usize = 5;

/// How history is trimmed to fit the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimStrategy {
    #[default]
    Additive,
    Subtractive,
}

impl fmt::Display for TrimStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrimStrategy::Additive => write!(f, "additive"),
            TrimStrategy::Subtractive => write!(f, "subtractive"),
        }
    }
}

/// Result of [`ContextBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuiltContext {
    pub messages: Vec<ChatMessage>,
    /// Token count as measured by the strategy that built the context.
    pub token_count: usize,
    /// History messages left out.
    pub dropped: usize,
    /// Tokenize passes over the whole request (subtractive only).
    pub iterations: usize,
}

/// Converts history plus system prompts into a budget-bounded context.
#[derive(Clone)]
pub struct ContextBuilder {
    tokenizer: Arc<dyn Tokenizer>,
    cache: Arc<TokenCache>,
    model: String,
    budget: TokenBudget,
    strategy: TrimStrategy,
    bot_nickname: String,
}

impl fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("model", &self.model)
            .field("budget", &self.budget)
            .field("strategy", &self.strategy)
            .field("bot_nickname", &self.bot_nickname)
            .finish_non_exhaustive()
    }
}

impl ContextBuilder {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        cache: Arc<TokenCache>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            tokenizer,
            cache,
            model: model.into(),
            budget: TokenBudget::default(),
            strategy: TrimStrategy::default(),
            bot_nickname: String::new(),
        }
    }

    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_strategy(mut self, strategy: TrimStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Messages sent by this nickname become `assistant` turns.
    pub fn with_bot_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.bot_nickname = nickname.into();
        self
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn strategy(&self) -> TrimStrategy {
        self.strategy
    }

    /// Build the context for `history` (chronological) behind
    /// `system_prompts`.
    pub async fn build(
        &self,
        system_prompts: &[String],
        history: &[HistoryEntry],
    ) -> Result<BuiltContext> {
        let system: Vec<ChatMessage> = system_prompts.iter().map(ChatMessage::system).collect();
        let conversation: Vec<(String, ChatMessage)> = history
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let is_last = i + 1 == history.len();
                (entry.sender.clone(), self.to_chat_message(entry, is_last))
            })
            .collect();

        let built = match self.strategy {
            TrimStrategy::Additive => self.build_additive(system, conversation).await?,
            TrimStrategy::Subtractive => self.build_subtractive(system, conversation).await?,
        };

        debug!(
            "Context built ({}): {} message(s), {}, {} dropped (limit {}, reserve {})",
            self.strategy,
            built.messages.len(),
            self.budget.usage_string(built.token_count),
            built.dropped,
            self.budget.limit(),
            self.budget.reserve()
        );
        Ok(built)
    }

    async fn build_additive(
        &self,
        system: Vec<ChatMessage>,
        conversation: Vec<(String, ChatMessage)>,
    ) -> Result<BuiltContext> {
        // System prompts are always kept, so they can be counted concurrently.
        let mut total: usize =
            futures::future::try_join_all(system.iter().map(|msg| self.cached_count(msg, "")))
                .await?
                .into_iter()
                .sum();
        if !self.budget.fits(total) {
            warn!(
                "System prompts alone exceed the context budget ({})",
                self.budget.usage_string(total)
            );
        }

        let count = conversation.len();
        let mut picked = Vec::new();
        for (sender, msg) in conversation.into_iter().rev() {
            let tokens = self.cached_count(&msg, &sender).await?;
            if !self.budget.fits(total + tokens) {
                break;
            }
            total += tokens;
            picked.push(msg);
        }
        let dropped = count - picked.len();
        picked.reverse();

        let mut messages = system;
        messages.extend(picked);
        Ok(BuiltContext {
            messages,
            token_count: total,
            dropped,
            iterations: 0,
        })
    }

    async fn build_subtractive(
        &self,
        system: Vec<ChatMessage>,
        conversation: Vec<(String, ChatMessage)>,
    ) -> Result<BuiltContext> {
        let available = self.budget.available();
        let history: Vec<ChatMessage> = conversation.into_iter().map(|(_, msg)| msg).collect();

        let mut start = 0usize;
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            let mut composed = system.clone();
            composed.extend_from_slice(&history[start..]);

            let tokens = self
                .tokenizer
                .tokenize(&self.model, &composed)
                .await
                .map_err(RelayError::Tokenizer)?
                .len();

            let included = history.len() - start;
            if self.budget.fits(tokens) || included == 0 {
                if !self.budget.fits(tokens) {
                    warn!(
                        "System prompts alone exceed the context budget ({})",
                        self.budget.usage_string(tokens)
                    );
                }
                return Ok(BuiltContext {
                    messages: composed,
                    token_count: tokens,
                    dropped: start,
                    iterations,
                });
            }

            let remove = subtractive_drop_count(included, tokens, available);
            debug!(
                "Subtractive pass {iterations}: {} over budget, dropping {remove} of {included} message(s)",
                self.budget.usage_string(tokens)
            );
            start += remove;
        }
    }

    /// Token count of one message, through the cache.
    async fn cached_count(&self, msg: &ChatMessage, sender: &str) -> Result<usize> {
        let key = TokenCache::composed_key(msg.role, sender, &key_text(msg));
        let tokens = self
            .cache
            .get_or_compute(&self.model, &key, || {
                self.tokenizer.tokenize(&self.model, std::slice::from_ref(msg))
            })
            .await
            .map_err(RelayError::Tokenizer)?;
        Ok(tokens.len())
    }

    fn to_chat_message(&self, entry: &HistoryEntry, is_last: bool) -> ChatMessage {
        let content = entry.content.trim();
        if !self.bot_nickname.is_empty() && entry.sender.eq_ignore_ascii_case(&self.bot_nickname) {
            return ChatMessage::assistant(content);
        }
        let text = format!("{}: {}", entry.sender, content);
        if is_last && !entry.image_urls.is_empty() {
            ChatMessage::user_with_images(text, &entry.image_urls)
        } else {
            ChatMessage::user(text)
        }
    }
}

/// `max(5, round(n × (tokens / budget − 1) × 0.5))`, clamped to `n`.
fn subtractive_drop_count(included: usize, tokens: usize, available: usize) -> usize {
    if available == 0 {
        return included;
    }
    let overage = tokens as f64 / available as f64 - 1.0;
    let proposed = (included as f64 * overage * 0.5).round() as usize;
    proposed.max(MIN_SUBTRACTIVE_DROP).min(included)
}

/// Text identifying a message's content for the cache key. Image URLs take
/// part so the multi-part form of a message is cached separately.
fn key_text(msg: &ChatMessage) -> String {
    match &msg.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.as_str(),
                ContentPart::ImageUrl { image_url } => image_url.url.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\u{1f}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;
    use crate::context::{EstimatingTokenizer, TokenizeFuture};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One token per character, no overhead; counts calls.
    struct CharTokenizer {
        inner: EstimatingTokenizer,
        calls: AtomicUsize,
    }

    impl CharTokenizer {
        fn new() -> Self {
            Self {
                inner: EstimatingTokenizer::new()
                    .with_chars_per_token(1.0)
                    .with_message_overhead(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Tokenizer for CharTokenizer {
        fn tokenize<'a>(&'a self, model: &'a str, messages: &'a [ChatMessage]) -> TokenizeFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.tokenize(model, messages)
        }
    }

    struct FailingTokenizer;

    impl Tokenizer for FailingTokenizer {
        fn tokenize<'a>(&'a self, _: &'a str, _: &'a [ChatMessage]) -> TokenizeFuture<'a> {
            Box::pin(async { Err("tokenizer offline".to_string()) })
        }
    }

    /// `count` entries from sender "a", each rendering as 13 chars
    /// ("a: m000000000").
    fn history(count: usize) -> Vec<HistoryEntry> {
        (0..count)
            .map(|i| HistoryEntry::new("a", format!("m{i:09}")))
            .collect()
    }

    fn builder(tokenizer: Arc<dyn Tokenizer>, available: usize, strategy: TrimStrategy) -> ContextBuilder {
        ContextBuilder::new(tokenizer, Arc::new(TokenCache::new()), "test-model")
            .with_budget(TokenBudget::new(available, 0))
            .with_strategy(strategy)
            .with_bot_nickname("bot")
    }

    fn prompts() -> Vec<String> {
        vec!["sys".to_string()]
    }

    #[tokio::test]
    async fn additive_keeps_newest_within_budget() {
        let b = builder(Arc::new(CharTokenizer::new()), 3 + 13 * 2, TrimStrategy::Additive);
        let built = b.build(&prompts(), &history(5)).await.unwrap();

        assert_eq!(built.messages.len(), 3);
        assert_eq!(built.messages[0].role, MessageRole::System);
        assert_eq!(built.messages[1].text(), "a: m000000003");
        assert_eq!(built.messages[2].text(), "a: m000000004");
        assert_eq!(built.token_count, 29);
        assert_eq!(built.dropped, 3);
    }

    #[tokio::test]
    async fn additive_never_exceeds_budget() {
        let entries = history(12);
        for available in (0..200).step_by(7) {
            let tokenizer = Arc::new(CharTokenizer::new());
            let b = builder(tokenizer.clone(), available, TrimStrategy::Additive);
            let built = b.build(&[], &entries).await.unwrap();
            let measured = tokenizer.inner.estimate(&built.messages);
            assert!(measured <= available, "{measured} > {available}");
            assert_eq!(measured, built.token_count);
        }
    }

    #[tokio::test]
    async fn additive_uses_token_cache() {
        let tokenizer = Arc::new(CharTokenizer::new());
        let b = builder(tokenizer.clone(), 1000, TrimStrategy::Additive);
        let entries = history(4);

        b.build(&prompts(), &entries).await.unwrap();
        let first = tokenizer.calls.load(Ordering::SeqCst);
        assert_eq!(first, 5);

        b.build(&prompts(), &entries).await.unwrap();
        assert_eq!(tokenizer.calls.load(Ordering::SeqCst), first);
    }

    #[tokio::test]
    async fn bot_messages_become_assistant_turns() {
        let b = builder(Arc::new(CharTokenizer::new()), 1000, TrimStrategy::Additive);
        let entries = vec![
            HistoryEntry::new("alice", "  hi bot  "),
            HistoryEntry::new("Bot", "hello alice"),
            HistoryEntry::new("alice", "how are you?"),
        ];
        let built = b.build(&prompts(), &entries).await.unwrap();

        let roles: Vec<_> = built.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::User, MessageRole::Assistant, MessageRole::User]
        );
        assert_eq!(built.messages[1].text(), "alice: hi bot");
        assert_eq!(built.messages[2].text(), "hello alice");
    }

    #[tokio::test]
    async fn subtractive_drops_proportionally() {
        let b = builder(Arc::new(CharTokenizer::new()), 100, TrimStrategy::Subtractive);
        let built = b.build(&prompts(), &history(20)).await.unwrap();

        // 263 tokens vs 100: f = 1.63, drop round(20 * 1.63 * 0.5) = 16.
        assert_eq!(built.dropped, 16);
        assert_eq!(built.iterations, 2);
        assert_eq!(built.messages.len(), 5);
        assert_eq!(built.token_count, 3 + 4 * 13);
        assert_eq!(built.messages[4].text(), "a: m000000019");
    }

    #[tokio::test]
    async fn subtractive_drops_at_least_five() {
        let b = builder(Arc::new(CharTokenizer::new()), 130, TrimStrategy::Subtractive);
        let built = b.build(&prompts(), &history(10)).await.unwrap();

        assert_eq!(built.dropped, 5);
        assert_eq!(built.messages.len(), 6);
        assert!(built.token_count <= 130);
    }

    #[tokio::test]
    async fn subtractive_terminates_with_zero_budget() {
        let b = builder(Arc::new(CharTokenizer::new()), 0, TrimStrategy::Subtractive);
        let built = b.build(&prompts(), &history(40)).await.unwrap();

        assert_eq!(built.dropped, 40);
        assert_eq!(built.messages.len(), 1);
        assert_eq!(built.iterations, 2);
    }

    #[tokio::test]
    async fn subtractive_within_budget_is_single_pass() {
        let tokenizer = Arc::new(CharTokenizer::new());
        let b = builder(tokenizer.clone(), 1000, TrimStrategy::Subtractive);
        let built = b.build(&prompts(), &history(3)).await.unwrap();
        assert_eq!(built.iterations, 1);
        assert_eq!(built.dropped, 0);
        assert_eq!(tokenizer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_count_is_monotonic_and_bounded() {
        assert_eq!(subtractive_drop_count(3, 1000, 10), 3);
        assert_eq!(subtractive_drop_count(100, 101, 100), 5);
        assert_eq!(subtractive_drop_count(100, 300, 100), 100);
        assert_eq!(subtractive_drop_count(7, 50, 0), 7);
    }

    #[tokio::test]
    async fn last_message_images_become_parts() {
        let b = builder(Arc::new(CharTokenizer::new()), 1000, TrimStrategy::Additive);
        let entries = vec![
            HistoryEntry::new("alice", "old https://x.io/old.png"),
            HistoryEntry::new("alice", "what is this? https://x.io/cat.jpg"),
        ];
        let built = b.build(&[], &entries).await.unwrap();

        assert!(matches!(built.messages[0].content, MessageContent::Text(_)));
        match &built.messages[1].content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(
                    &parts[1],
                    ContentPart::ImageUrl { image_url } if image_url.url == "https://x.io/cat.jpg"
                ));
            }
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tokenizer_failure_is_an_error() {
        for strategy in [TrimStrategy::Additive, TrimStrategy::Subtractive] {
            let b = builder(Arc::new(FailingTokenizer), 1000, strategy);
            let err = b.build(&prompts(), &history(1)).await.unwrap_err();
            assert!(matches!(err, RelayError::Tokenizer(ref e) if e == "tokenizer offline"));
        }
    }

    #[test]
    fn strategy_deserializes_lowercase() {
        let s: TrimStrategy = serde_json::from_str("\"subtractive\"").unwrap();
        assert_eq!(s, TrimStrategy::Subtractive);
        assert_eq!(TrimStrategy::default().to_string(), "additive");
    }
}
