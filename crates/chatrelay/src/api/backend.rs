//! [`CompletionBackend`] that streams from an OpenAI-compatible endpoint.

use std::sync::Arc;

use tracing::debug;

use super::streaming::{StreamEvent, extract_error, extract_finish_reason, extract_usage};
use crate::completion::{CompletionBackend, RequestHandle, TransportEvent, TransportSender};
use crate::{ApiClient, ChatRequest};

/// Spawns one tokio task per request and forwards stream events as
/// [`TransportEvent`]s.
#[derive(Debug, Clone)]
pub struct StreamingBackend {
    client: Arc<ApiClient>,
}

impl StreamingBackend {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

impl CompletionBackend for StreamingBackend {
    fn start(&self, handle: RequestHandle, request: ChatRequest, events: TransportSender) {
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            let result = client
                .chat_stream_live(&request, |ev| {
                    if let StreamEvent::TextDelta(text) = ev {
                        // The receiver is gone once the host shuts down.
                        let _ = events.send(TransportEvent::delta(handle, text.clone()));
                    }
                })
                .await;

            let terminal = match result {
                Ok(stream) => match extract_error(&stream) {
                    Some(e) => TransportEvent::error(handle, e),
                    None => TransportEvent::finished(
                        handle,
                        extract_usage(&stream),
                        extract_finish_reason(&stream),
                    ),
                },
                Err(e) => TransportEvent::error(handle, e),
            };
            if events.send(terminal).is_err() {
                debug!("Transport channel closed before {handle} finished");
            }
        });
    }
}
