//! Streaming completion lifecycle.
//!
//! The [`CompletionOrchestrator`] owns a FIFO of submitted requests and
//! admits one at a time. Backends report progress as [`TransportEvent`]s on a
//! channel; the orchestrator routes each event by [`RequestHandle`],
//! reassembles deltas into lines with a [`LineAssembler`], and publishes
//! [`CompletionEvent`]s to subscribers.

pub mod events;
pub mod lines;
pub mod orchestrator;
pub mod request;

pub use events::{CompletionEvent, TransportEvent, TransportEventKind};
pub use lines::LineAssembler;
pub use orchestrator::CompletionOrchestrator;
pub use request::{CompletionRequestContext, RequestHandle, RequestState, RequestTarget};

use tokio::sync::mpsc;

use crate::ChatRequest;

/// Sender half a backend reports transport events on.
pub type TransportSender = mpsc::UnboundedSender<TransportEvent>;

/// Issues streaming completion calls.
///
/// `start` must return without waiting for the call: all progress, including
/// failure to connect, is reported later through `events`, ending with
/// exactly one `Finished` or `Error` for the handle.
pub trait CompletionBackend: Send + Sync {
    fn start(&self, handle: RequestHandle, request: ChatRequest, events: TransportSender);
}
