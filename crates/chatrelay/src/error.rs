//! Error taxonomy for the relay core.
//!
//! Collaborator seams (HTTP client, chat transport, tokenizer endpoint) report
//! failures as plain `String`s; they are wrapped into [`RelayError`] where they
//! cross into the core so callers can tell a persistence fault from a caller
//! mistake or an upstream outage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by history, context building, completion and delivery.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Reading, appending, rotating or erasing a persisted log failed.
    /// Never retried here.
    #[error("history I/O error at {}: {source}", path.display())]
    HistoryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An edit or erase addressed a message that does not exist.
    #[error("message offset {offset} out of range for history of {len} message(s)")]
    OffsetOutOfRange { offset: usize, len: usize },

    /// The tokenizer collaborator failed while sizing the context.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// The completion API or the chat transport reported a failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unknown model profile, unreadable or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RelayError::HistoryIo {
            path: path.into(),
            source,
        }
    }

    /// Short text suitable for a one-line notice to a chat user.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::HistoryIo { .. } => "history storage failed".to_string(),
            RelayError::OffsetOutOfRange { offset, len } => {
                format!("no message at offset {offset} (history has {len})")
            }
            RelayError::Tokenizer(_) => "could not size the conversation context".to_string(),
            RelayError::Transport(e) => format!("completion failed: {e}"),
            RelayError::Config(e) => e.clone(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RelayError>;
