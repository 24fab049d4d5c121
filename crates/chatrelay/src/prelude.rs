//! Convenience re-exports for common `chatrelay` types.
//!
//! ```ignore
//! use chatrelay::prelude::*;
//! ```
//!
//! Covers what a host needs to wire up a relay: the client and backend,
//! config, the collaborator traits and the relay itself. Lower-level pieces
//! (line assembly, SSE parsing, log internals) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ApiClient, ChatMessage, ChatRequest, MessageRole, UsageInfo};

// ── Relay ───────────────────────────────────────────────────────────
pub use crate::relay::{InboundLine, InboundOutcome, Relay};

// ── Configuration and errors ────────────────────────────────────────
pub use crate::config::{InferenceParams, ModelProfile, RelayConfig};
pub use crate::error::{RelayError, Result};

// ── History ─────────────────────────────────────────────────────────
pub use crate::history::{ConversationKey, HistoryEntry, HistoryStore};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{
    ContextBuilder, EstimatingTokenizer, TokenBudget, TokenCache, Tokenizer, TrimStrategy,
};

// ── Completion and delivery ─────────────────────────────────────────
pub use crate::api::{HttpTokenizer, StreamingBackend};
pub use crate::completion::{
    CompletionBackend, CompletionEvent, CompletionOrchestrator, RequestHandle, RequestState,
    RequestTarget, TransportEvent,
};
pub use crate::delivery::{ChatTransport, Delivery, DeliveryAdapter};
