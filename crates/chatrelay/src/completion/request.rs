//! Request identity, lifecycle state and the per-request record.

use std::fmt;
use std::time::Instant;

use super::LineAssembler;
use crate::ChatRequest;
use crate::history::ConversationKey;

/// Opaque identifier for one submitted completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(pub(crate) u64);

impl RequestHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// `Queued → Dispatched → Streaming → Completed | Failed | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    /// Handed to the backend, no content yet.
    Dispatched,
    /// At least one delta received.
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Cancelled
        )
    }

    /// Occupies the single admission slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RequestState::Dispatched | RequestState::Streaming)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestState::Queued => "queued",
            RequestState::Dispatched => "dispatched",
            RequestState::Streaming => "streaming",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Where a request came from and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub conversation: ConversationKey,
    /// Session whose log receives the assistant turn.
    pub session: String,
    /// Channel or nickname replies are sent to.
    pub reply_to: String,
    pub is_channel: bool,
}

impl RequestTarget {
    pub fn new(conversation: ConversationKey, session: impl Into<String>) -> Self {
        let reply_to = conversation.source.clone();
        let is_channel = conversation.is_channel();
        Self {
            conversation,
            session: session.into(),
            reply_to,
            is_channel,
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = reply_to.into();
        self
    }
}

/// Everything the orchestrator tracks for one request until it reaches a
/// terminal state.
#[derive(Debug)]
pub struct CompletionRequestContext {
    pub handle: RequestHandle,
    pub target: RequestTarget,
    pub request: ChatRequest,
    pub state: RequestState,
    pub assembler: LineAssembler,
    pub submitted_at: Instant,
    pub dispatched_at: Option<Instant>,
}

impl CompletionRequestContext {
    pub fn new(handle: RequestHandle, target: RequestTarget, request: ChatRequest) -> Self {
        Self {
            handle,
            target,
            request,
            state: RequestState::Queued,
            assembler: LineAssembler::new(),
            submitted_at: Instant::now(),
            dispatched_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_classification() {
        assert!(RequestState::Dispatched.is_in_flight());
        assert!(RequestState::Streaming.is_in_flight());
        assert!(!RequestState::Queued.is_in_flight());
        for s in [RequestState::Completed, RequestState::Failed, RequestState::Cancelled] {
            assert!(s.is_terminal());
            assert!(!s.is_in_flight());
        }
    }

    #[test]
    fn target_defaults_reply_to_source() {
        let t = RequestTarget::new(ConversationKey::new("libera", "alice"), "History");
        assert_eq!(t.reply_to, "alice");
        assert!(!t.is_channel);
        assert_eq!(RequestHandle(7).to_string(), "req-7");
    }
}
