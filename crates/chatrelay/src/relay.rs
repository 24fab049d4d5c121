//! Pipeline glue between the chat transport, history, context building,
//! completion and delivery.
//!
//! [`Relay::handle_inbound`] records a line and, when it is eligible, builds
//! a context and submits a request. Completion events flow back through
//! [`Relay::handle_completion_event`], which delivers text and appends the
//! assistant's turn. [`Relay::run`] drives both from one task with a fixed
//! scheduler tick; hosts with their own loop can call [`Relay::pump`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::completion::{
    CompletionBackend, CompletionEvent, CompletionOrchestrator, RequestHandle, RequestTarget,
    TransportEvent,
};
use crate::config::{ModelProfile, RelayConfig};
use crate::context::{ContextBuilder, TokenCache, Tokenizer};
use crate::delivery::{ChatTransport, Delivery, DeliveryAdapter, TalkSwitches};
use crate::error::{RelayError, Result};
use crate::history::{ConversationKey, HistoryEntry, HistoryStore};

/// Characters IRC allows in nicknames besides letters and digits.
const NICK_SPECIAL_CHARS: &str = "_-[]\\`^{}|";

/// One line received from the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundLine {
    pub network: String,
    /// Channel name, or the peer's nickname for a direct message.
    pub source: String,
    pub sender: String,
    pub text: String,
}

impl InboundLine {
    pub fn channel(
        network: impl Into<String>,
        channel: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            source: channel.into(),
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// A direct message; the conversation is keyed by the sender.
    pub fn direct(
        network: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let sender = sender.into();
        Self {
            network: network.into(),
            source: sender.clone(),
            sender,
            text: text.into(),
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.network, &self.source)
    }
}

/// What [`Relay::handle_inbound`] did with a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Left to the command layer; not recorded.
    Command,
    /// Recorded only.
    Recorded,
    /// Recorded and a completion was queued.
    Submitted(RequestHandle),
}

/// The relay core.
pub struct Relay {
    config: RelayConfig,
    history: Arc<HistoryStore>,
    token_cache: Arc<TokenCache>,
    tokenizer: Arc<dyn Tokenizer>,
    orchestrator: CompletionOrchestrator,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    completion_rx: mpsc::UnboundedReceiver<CompletionEvent>,
    delivery: DeliveryAdapter,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("bot_nickname", &self.config.bot_nickname)
            .field("orchestrator", &self.orchestrator)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

impl Relay {
    pub fn new(
        config: RelayConfig,
        tokenizer: Arc<dyn Tokenizer>,
        backend: Arc<dyn CompletionBackend>,
        transport: Arc<dyn ChatTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let history = Arc::new(HistoryStore::new(&config.data_dir, config.max_history_lines));
        let (mut orchestrator, transport_rx) = CompletionOrchestrator::new(backend);
        let completion_rx = orchestrator.subscribe();
        let delivery = DeliveryAdapter::new(transport)
            .with_max_line_length(config.max_line_length)
            .with_strip_unfinished_sentences(config.strip_unfinished_sentences)
            .with_typing_suffix(config.typing_suffix.clone());

        info!(
            "Relay ready as {} (profile {}, history in {})",
            config.bot_nickname,
            config.model_profile_id,
            history.root().display()
        );
        Ok(Self {
            config,
            history,
            token_cache: Arc::new(TokenCache::new()),
            tokenizer,
            orchestrator,
            transport_rx,
            completion_rx,
            delivery,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.token_cache
    }

    pub fn orchestrator(&self) -> &CompletionOrchestrator {
        &self.orchestrator
    }

    pub fn talk_switches(&self) -> &Arc<TalkSwitches> {
        self.delivery.talk_switches()
    }

    // ── Inbound ────────────────────────────────────────────────────

    /// Record an inbound line and queue a completion when it is eligible.
    ///
    /// Command lines are left to the command layer and not recorded.
    pub async fn handle_inbound(&mut self, line: InboundLine) -> Result<InboundOutcome> {
        if self.is_command(&line.text) {
            debug!("Command line from {} in {}, skipping", line.sender, line.source);
            return Ok(InboundOutcome::Command);
        }

        let key = line.key();
        let highlighted = self.is_highlight(&line);
        let entry = HistoryEntry::new(&line.sender, &line.text).with_highlight(highlighted);
        self.history.append(&key, entry)?;

        let eligible =
            highlighted || self.config.replies_without_highlight(&line.network, &line.source);
        if !eligible {
            return Ok(InboundOutcome::Recorded);
        }

        let handle = self.submit_completion(&key).await?;
        Ok(InboundOutcome::Submitted(handle))
    }

    /// Build a context from the conversation's active session and queue a
    /// completion for it.
    pub async fn submit_completion(&mut self, key: &ConversationKey) -> Result<RequestHandle> {
        let profile = self.config.active_profile()?.clone();
        let (session, reply_to, entries) = self.history.with_log(key, |log| {
            Ok((
                log.session().to_string(),
                log.reply_to().to_string(),
                log.entries().to_vec(),
            ))
        })?;

        let prompts = self.system_prompts(&profile);
        let built = ContextBuilder::new(
            Arc::clone(&self.tokenizer),
            Arc::clone(&self.token_cache),
            profile.inference.model.clone(),
        )
        .with_budget(profile.budget())
        .with_strategy(profile.trim_strategy)
        .with_bot_nickname(&self.config.bot_nickname)
        .build(&prompts, &entries)
        .await?;

        let request = profile.inference.to_request(built.messages);
        let target = RequestTarget::new(key.clone(), session).with_reply_to(reply_to);
        Ok(self.orchestrator.submit(target, request))
    }

    /// Profile or default system prompts, followed by the current date and
    /// the bot's name.
    pub fn system_prompts(&self, profile: &ModelProfile) -> Vec<String> {
        let mut prompts = self.config.system_prompts_for(profile);
        prompts.push(format!(
            "The current date is {}.",
            Local::now().format("%A, %B %-d, %Y")
        ));
        prompts.push(format!("Your name is {}.", self.config.bot_nickname));
        prompts
    }

    /// Direct messages always address the bot; channel lines must mention
    /// its nickname as a whole word.
    pub fn is_highlight(&self, line: &InboundLine) -> bool {
        !line.key().is_channel() || mentions_nickname(&line.text, &self.config.bot_nickname)
    }

    /// Whether `text`, after an optional `nick:` or `nick,` address, starts
    /// with the command prefix.
    pub fn is_command(&self, text: &str) -> bool {
        let prefix = &self.config.chat_command_prefix;
        !prefix.is_empty()
            && strip_address(text, &self.config.bot_nickname)
                .trim_start()
                .starts_with(prefix.as_str())
    }

    pub fn is_admin(&self, nickname: &str) -> bool {
        self.config.is_admin(nickname)
    }

    // ── Completion events ──────────────────────────────────────────

    pub fn tick(&mut self) -> Option<RequestHandle> {
        self.orchestrator.tick()
    }

    pub fn apply_transport_event(&mut self, event: TransportEvent) {
        self.orchestrator.apply(event);
    }

    /// Deliver lines or the final message and record the assistant's turn.
    pub fn handle_completion_event(&mut self, event: CompletionEvent) -> Result<()> {
        match event {
            CompletionEvent::Line {
                target,
                text,
                is_last,
                ..
            } => {
                if self.config.streaming_lines {
                    let delivery = if is_last {
                        Delivery::Final
                    } else {
                        Delivery::Partial
                    };
                    self.delivery.send(&target, &text, delivery)?;
                }
                Ok(())
            }
            CompletionEvent::Result {
                target, message, ..
            } => {
                if !message.is_empty() {
                    let entry = HistoryEntry::new(&self.config.bot_nickname, &message);
                    self.history
                        .with_session_log(&target.conversation, &target.session, |log| {
                            log.append(entry)
                        })?;
                }
                if !self.config.streaming_lines {
                    self.delivery.send(&target, &message, Delivery::Final)?;
                }
                Ok(())
            }
            CompletionEvent::Error { target, error, .. } => {
                let notice = RelayError::Transport(error).user_message();
                self.delivery.notice(&target, &notice)
            }
        }
    }

    /// Process everything that is ready without waiting: admit queued
    /// requests, route transport events and handle completion events.
    /// Returns the number of completion events handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let mut progressed = self.orchestrator.tick().is_some();
            while let Ok(event) = self.transport_rx.try_recv() {
                self.orchestrator.apply(event);
                progressed = true;
            }
            while let Ok(event) = self.completion_rx.try_recv() {
                self.dispatch_completion_event(event);
                handled += 1;
                progressed = true;
            }
            if !progressed {
                return handled;
            }
        }
    }

    fn dispatch_completion_event(&mut self, event: CompletionEvent) {
        let handle = event.handle();
        if let Err(e) = self.handle_completion_event(event) {
            error!("Failed to handle completion event for {handle}: {e}");
        }
    }

    // ── Admin operations ───────────────────────────────────────────

    pub fn erase_last(&self, key: &ConversationKey, n: usize) -> Result<usize> {
        self.history.erase_last(key, n)
    }

    /// Back up and remove the persisted log of the active session.
    pub fn erase_history(&self, key: &ConversationKey) -> Result<Option<PathBuf>> {
        self.history.erase_persisted(key)
    }

    pub fn edit_message(&self, key: &ConversationKey, offset: usize, content: &str) -> Result<()> {
        self.history.edit_at(key, offset, content)
    }

    pub fn switch_session(&self, key: &ConversationKey, session: &str) -> Result<()> {
        self.history.switch_session(key, session).map(|_| ())
    }

    /// Keep the active messages but write them under `session` from now on.
    pub fn rename_session(&self, key: &ConversationKey, session: &str) -> Result<()> {
        self.history.rename_session(key, session)
    }

    pub fn switch_profile(&mut self, id: &str) -> Result<()> {
        self.config.set_active_profile(id)?;
        info!("Switched model profile to {id}");
        Ok(())
    }

    pub fn set_talk(&self, key: &ConversationKey, enabled: bool) {
        self.talk_switches().set(key, enabled);
    }

    /// Flip talking for `key` and return the new setting.
    pub fn toggle_talk(&self, key: &ConversationKey) -> bool {
        let enabled = self.talk_switches().toggle(key);
        info!("Talk for {key} is now {}", if enabled { "on" } else { "off" });
        enabled
    }

    pub fn cancel(&mut self, key: &ConversationKey) -> Vec<RequestHandle> {
        self.orchestrator.cancel(key)
    }

    // ── Host loop ──────────────────────────────────────────────────

    /// Run until `inbound` closes and all outstanding requests finished.
    pub async fn run(&mut self, mut inbound: mpsc::UnboundedReceiver<InboundLine>) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbound_open = true;

        loop {
            if !inbound_open && self.orchestrator.is_idle() {
                self.pump();
                info!("Inbound closed and no requests outstanding, stopping");
                return Ok(());
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.orchestrator.tick();
                }
                line = inbound.recv(), if inbound_open => match line {
                    Some(line) => {
                        let key = line.key();
                        if let Err(e) = self.handle_inbound(line).await {
                            error!("Failed to handle line in {key}: {e}");
                        }
                    }
                    None => {
                        debug!("Inbound channel closed");
                        inbound_open = false;
                    }
                },
                Some(event) = self.transport_rx.recv() => {
                    self.orchestrator.apply(event);
                }
                Some(event) = self.completion_rx.recv() => {
                    self.dispatch_completion_event(event);
                }
            }
        }
    }
}

/// Whether `text` contains `nickname` as a whole word (ASCII
/// case-insensitive).
pub fn mentions_nickname(text: &str, nickname: &str) -> bool {
    if nickname.is_empty() {
        return false;
    }
    let text = text.to_ascii_lowercase();
    let nickname = nickname.to_ascii_lowercase();
    text.match_indices(&nickname).any(|(idx, _)| {
        let before = text.get(..idx).and_then(|s| s.chars().next_back());
        let after = text.get(idx + nickname.len()..).and_then(|s| s.chars().next());
        !before.is_some_and(is_nick_char) && !after.is_some_and(is_nick_char)
    })
}

fn is_nick_char(c: char) -> bool {
    c.is_alphanumeric() || NICK_SPECIAL_CHARS.contains(c)
}

/// Drop a leading `nick:` or `nick,` address.
fn strip_address<'a>(text: &'a str, nickname: &str) -> &'a str {
    let trimmed = text.trim_start();
    if nickname.is_empty() {
        return trimmed;
    }
    match (trimmed.get(..nickname.len()), trimmed.get(nickname.len()..)) {
        (Some(head), Some(rest))
            if head.eq_ignore_ascii_case(nickname) && rest.starts_with([':', ',']) =>
        {
            rest.get(1..).unwrap_or(rest)
        }
        _ => trimmed,
    }
}
