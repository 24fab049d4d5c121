//! Event kinds flowing into and out of the orchestrator.
//!
//! Backends report [`TransportEvent`]s on a channel; the orchestrator routes
//! them by handle and publishes [`CompletionEvent`]s to its subscribers.

use super::{RequestHandle, RequestTarget};
use crate::UsageInfo;

/// What a backend observed for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// Partial content.
    Delta(String),
    /// The stream ended normally.
    Finished {
        usage: Option<UsageInfo>,
        finish_reason: Option<String>,
    },
    /// The call failed. Terminal.
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub handle: RequestHandle,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn delta(handle: RequestHandle, text: impl Into<String>) -> Self {
        Self {
            handle,
            kind: TransportEventKind::Delta(text.into()),
        }
    }

    pub fn finished(
        handle: RequestHandle,
        usage: Option<UsageInfo>,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            handle,
            kind: TransportEventKind::Finished {
                usage,
                finish_reason,
            },
        }
    }

    pub fn error(handle: RequestHandle, error: impl Into<String>) -> Self {
        Self {
            handle,
            kind: TransportEventKind::Error(error.into()),
        }
    }
}

/// Lifecycle output of the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    /// A completed line of output. `is_last` marks the end of the stream;
    /// its text may be empty.
    Line {
        handle: RequestHandle,
        target: RequestTarget,
        text: String,
        is_last: bool,
    },
    /// The full assembled reply.
    Result {
        handle: RequestHandle,
        target: RequestTarget,
        message: String,
        usage: Option<UsageInfo>,
        finish_reason: Option<String>,
    },
    Error {
        handle: RequestHandle,
        target: RequestTarget,
        error: String,
    },
}

impl CompletionEvent {
    pub fn handle(&self) -> RequestHandle {
        match self {
            CompletionEvent::Line { handle, .. }
            | CompletionEvent::Result { handle, .. }
            | CompletionEvent::Error { handle, .. } => *handle,
        }
    }

    pub fn target(&self) -> &RequestTarget {
        match self {
            CompletionEvent::Line { target, .. }
            | CompletionEvent::Result { target, .. }
            | CompletionEvent::Error { target, .. } => target,
        }
    }
}
