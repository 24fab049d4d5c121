//! Outgoing side: shapes text and hands it to the chat transport.
//!
//! [`DeliveryAdapter::send`] checks the destination's talk switch, strips an
//! unfinished trailing sentence from final text, splits into chunks that fit
//! the transport's line length and sends them in order.

pub mod text;

pub use text::{split_for_transport, strip_unfinished_sentence};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::completion::RequestTarget;
use crate::error::{RelayError, Result};
use crate::history::ConversationKey;

/// Default maximum characters per transport line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 350;

/// Default suffix marking a streamed line that is not the last one.
pub const DEFAULT_TYPING_SUFFIX: &str = " ...🖉";

/// Line-oriented chat transport collaborator.
pub trait ChatTransport: Send + Sync {
    /// Send one line to a channel or nickname.
    fn send_message(&self, target: &str, text: &str) -> std::result::Result<(), String>;

    /// Send one notice line.
    fn send_notice(&self, target: &str, text: &str) -> std::result::Result<(), String>;
}

/// Per-destination talk-enabled flags. Destinations default to enabled.
#[derive(Debug, Default)]
pub struct TalkSwitches {
    flags: Mutex<HashMap<ConversationKey, bool>>,
}

impl TalkSwitches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self, key: &ConversationKey) -> bool {
        self.flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(true)
    }

    pub fn set(&self, key: &ConversationKey, enabled: bool) {
        self.flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), enabled);
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&self, key: &ConversationKey) -> bool {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        let flag = flags.entry(key.clone()).or_insert(true);
        *flag = !*flag;
        *flag
    }
}

/// Whether a piece of text ends the reply or more is coming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// More lines follow; carries the typing suffix.
    Partial,
    /// Last text of the reply; unfinished sentences may be stripped.
    Final,
}

/// Shapes outgoing text and sends it through a [`ChatTransport`].
pub struct DeliveryAdapter {
    transport: Arc<dyn ChatTransport>,
    talk: Arc<TalkSwitches>,
    max_line_length: usize,
    strip_unfinished_sentences: bool,
    typing_suffix: String,
}

impl std::fmt::Debug for DeliveryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryAdapter")
            .field("max_line_length", &self.max_line_length)
            .field("strip_unfinished_sentences", &self.strip_unfinished_sentences)
            .field("typing_suffix", &self.typing_suffix)
            .finish_non_exhaustive()
    }
}

impl DeliveryAdapter {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            talk: Arc::new(TalkSwitches::new()),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            strip_unfinished_sentences: true,
            typing_suffix: DEFAULT_TYPING_SUFFIX.to_string(),
        }
    }

    pub fn with_talk_switches(mut self, talk: Arc<TalkSwitches>) -> Self {
        self.talk = talk;
        self
    }

    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max.max(1);
        self
    }

    pub fn with_strip_unfinished_sentences(mut self, strip: bool) -> Self {
        self.strip_unfinished_sentences = strip;
        self
    }

    pub fn with_typing_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.typing_suffix = suffix.into();
        self
    }

    pub fn talk_switches(&self) -> &Arc<TalkSwitches> {
        &self.talk
    }

    /// Deliver text to the target's reply destination. Returns the number
    /// of transport lines sent; suppressed or empty sends return 0.
    pub fn send(&self, target: &RequestTarget, text: &str, delivery: Delivery) -> Result<usize> {
        if !self.talk.is_enabled(&target.conversation) {
            info!(
                "Talk disabled for {}, suppressing {} chars",
                target.conversation,
                text.chars().count()
            );
            return Ok(0);
        }

        let mut text = text.trim();
        if delivery == Delivery::Final && self.strip_unfinished_sentences {
            text = strip_unfinished_sentence(text);
        }
        if text.is_empty() {
            return Ok(0);
        }

        let suffix = match delivery {
            Delivery::Partial => self.typing_suffix.as_str(),
            Delivery::Final => "",
        };
        let limit = self
            .max_line_length
            .saturating_sub(suffix.chars().count())
            .max(1);
        let mut chunks = split_for_transport(text, limit);
        if let Some(last) = chunks.last_mut() {
            last.push_str(suffix);
        }

        for chunk in &chunks {
            self.transport
                .send_message(&target.reply_to, chunk)
                .map_err(RelayError::Transport)?;
        }
        debug!("Delivered {} line(s) to {}", chunks.len(), target.reply_to);
        Ok(chunks.len())
    }

    /// Send a one-line notice, e.g. a failure report. Honors the talk switch.
    pub fn notice(&self, target: &RequestTarget, text: &str) -> Result<()> {
        if !self.talk.is_enabled(&target.conversation) {
            info!("Talk disabled for {}, suppressing notice", target.conversation);
            return Ok(());
        }
        let line = split_for_transport(text, self.max_line_length)
            .into_iter()
            .next()
            .unwrap_or_default();
        if line.is_empty() {
            return Ok(());
        }
        self.transport
            .send_notice(&target.reply_to, &line)
            .map_err(RelayError::Transport)
    }
}
