//! Persistent, per-conversation message history.
//!
//! Every conversation (a channel or a direct-message peer on one network) owns
//! an append-only [`ConversationLog`], scoped to a named session. Logs are
//! persisted as one plain-text line per message and replayed on first access:
//!
//! ```text
//! data_dir/
//!   libera/
//!     #rust/
//!       History.log
//!       History.log.bk-1706000000
//!     alice/
//!       History.log
//! ```
//!
//! - [`entry`]: [`HistoryEntry`] and the persisted line grammar.
//! - [`log`]: [`ConversationLog`] with append, replay with rotation, erase,
//!   edit, session rename.
//! - [`store`]: [`HistoryStore`], a lazy registry of logs with a critical
//!   section per (network, source, session).

pub mod entry;
pub mod log;
pub mod store;

pub use entry::{HistoryEntry, extract_image_urls};
pub use log::ConversationLog;
pub use store::{HistoryStore, SharedLog};

use std::fmt;

/// Session used until a conversation is switched to another one.
pub const DEFAULT_SESSION: &str = "History";

/// Default number of replayed lines per log (rotation kicks in at twice this).
pub const DEFAULT_MAX_HISTORY_LINES: usize = 1000;

/// Stable identity of a conversation: network plus channel or peer name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub network: String,
    pub source: String,
}

impl ConversationKey {
    pub fn new(network: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            source: source.into(),
        }
    }

    /// Whether the source names a channel rather than a peer.
    pub fn is_channel(&self) -> bool {
        self.source.starts_with(['#', '&', '+', '!'])
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_classification() {
        assert!(ConversationKey::new("libera", "#rust").is_channel());
        assert!(ConversationKey::new("libera", "&local").is_channel());
        assert!(!ConversationKey::new("libera", "alice").is_channel());
    }

    #[test]
    fn display_joins_network_and_source() {
        let key = ConversationKey::new("libera", "#rust");
        assert_eq!(key.to_string(), "libera/#rust");
    }
}
