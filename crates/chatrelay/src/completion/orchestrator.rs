//! Single-admission request queue and event router.
//!
//! At most one request is `Dispatched`/`Streaming` at a time. The host calls
//! [`tick`](CompletionOrchestrator::tick) on a fixed interval to admit the next
//! queued request, and feeds every [`TransportEvent`] received on the channel
//! returned by [`new`](CompletionOrchestrator::new) into
//! [`apply`](CompletionOrchestrator::apply). Neither call blocks on I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::{
    CompletionBackend, CompletionEvent, CompletionRequestContext, RequestHandle, RequestState,
    RequestTarget, TransportEvent, TransportEventKind, TransportSender,
};
use crate::ChatRequest;
use crate::history::ConversationKey;

/// Terminal states remembered for [`CompletionOrchestrator::state`] lookups.
const RECENT_TERMINAL_CAPACITY: usize = 64;

pub struct CompletionOrchestrator {
    backend: Arc<dyn CompletionBackend>,
    transport_tx: TransportSender,
    subscribers: Vec<mpsc::UnboundedSender<CompletionEvent>>,
    queue: VecDeque<RequestHandle>,
    requests: HashMap<RequestHandle, CompletionRequestContext>,
    active: Option<RequestHandle>,
    recent: VecDeque<(RequestHandle, RequestState)>,
    next_id: u64,
}

impl std::fmt::Debug for CompletionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionOrchestrator")
            .field("queued", &self.queue.len())
            .field("active", &self.active)
            .field("tracked", &self.requests.len())
            .finish_non_exhaustive()
    }
}

impl CompletionOrchestrator {
    /// Create an orchestrator and the receiver its backend reports on.
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            backend,
            transport_tx,
            subscribers: Vec::new(),
            queue: VecDeque::new(),
            requests: HashMap::new(),
            active: None,
            recent: VecDeque::new(),
            next_id: 1,
        };
        (orchestrator, transport_rx)
    }

    /// Receive every [`CompletionEvent`] published from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<CompletionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Enqueue a request. It is dispatched by a later [`tick`](Self::tick).
    pub fn submit(&mut self, target: RequestTarget, request: ChatRequest) -> RequestHandle {
        let handle = RequestHandle(self.next_id);
        self.next_id += 1;

        debug!(
            "Queued {handle} for {} (model={}, messages={}, queue depth {})",
            target.conversation,
            request.model,
            request.messages.len(),
            self.queue.len() + 1
        );
        self.requests
            .insert(handle, CompletionRequestContext::new(handle, target, request));
        self.queue.push_back(handle);
        handle
    }

    /// Admit the head of the queue if nothing is in flight. Returns the
    /// dispatched handle.
    pub fn tick(&mut self) -> Option<RequestHandle> {
        if self.active.is_some() {
            return None;
        }
        let handle = self.queue.pop_front()?;
        let ctx = self.requests.get_mut(&handle)?;

        ctx.state = RequestState::Dispatched;
        ctx.dispatched_at = Some(Instant::now());
        self.active = Some(handle);
        info!(
            "Dispatching {handle} for {} after {:.1}s in queue",
            ctx.target.conversation,
            ctx.submitted_at.elapsed().as_secs_f64()
        );

        let mut request = ctx.request.clone();
        request.stream = true;
        self.backend
            .start(handle, request, self.transport_tx.clone());
        Some(handle)
    }

    /// Route one transport event. Events for unknown or cancelled handles
    /// are logged and dropped.
    pub fn apply(&mut self, event: TransportEvent) {
        let handle = event.handle;
        let Some(ctx) = self.requests.get_mut(&handle) else {
            debug!("No request found for {handle}, dropping {:?}", event.kind);
            return;
        };
        if !ctx.state.is_in_flight() {
            warn!("Event for {handle} in state {}, dropping", ctx.state);
            return;
        }

        match event.kind {
            TransportEventKind::Delta(text) => {
                trace!("{handle} delta: {} bytes", text.len());
                ctx.state = RequestState::Streaming;
                let target = ctx.target.clone();
                for line in ctx.assembler.push(&text) {
                    self.publish(CompletionEvent::Line {
                        handle,
                        target: target.clone(),
                        text: line,
                        is_last: false,
                    });
                }
            }
            TransportEventKind::Finished {
                usage,
                finish_reason,
            } => {
                let last = ctx.assembler.finish();
                let message = ctx.assembler.full_text().trim().to_string();
                let target = ctx.target.clone();
                let elapsed = ctx.dispatched_at.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
                info!(
                    "{handle} completed in {elapsed:.1}s: {} chars, finish_reason={}, tokens prompt={} completion={}",
                    message.chars().count(),
                    finish_reason.as_deref().unwrap_or("-"),
                    usage.as_ref().and_then(|u| u.prompt_tokens).unwrap_or(0),
                    usage.as_ref().and_then(|u| u.completion_tokens).unwrap_or(0),
                );

                self.publish(CompletionEvent::Line {
                    handle,
                    target: target.clone(),
                    text: last,
                    is_last: true,
                });
                self.publish(CompletionEvent::Result {
                    handle,
                    target,
                    message,
                    usage,
                    finish_reason,
                });
                self.finalize(handle, RequestState::Completed);
            }
            TransportEventKind::Error(e) => {
                error!("{handle} failed for {}: {e}", ctx.target.conversation);
                let target = ctx.target.clone();
                self.publish(CompletionEvent::Error {
                    handle,
                    target,
                    error: e,
                });
                self.finalize(handle, RequestState::Failed);
            }
        }
    }

    /// Drop every queued or in-flight request for `conversation`. Further
    /// events for them are ignored; lines already published stay published.
    pub fn cancel(&mut self, conversation: &ConversationKey) -> Vec<RequestHandle> {
        let mut cancelled: Vec<RequestHandle> = self
            .requests
            .values()
            .filter(|ctx| &ctx.target.conversation == conversation)
            .map(|ctx| ctx.handle)
            .collect();
        cancelled.sort();

        for handle in &cancelled {
            self.queue.retain(|h| h != handle);
            self.finalize(*handle, RequestState::Cancelled);
        }
        if !cancelled.is_empty() {
            info!("Cancelled {} request(s) for {conversation}", cancelled.len());
        }
        cancelled
    }

    /// Current state of a request, including recently finished ones.
    pub fn state(&self, handle: RequestHandle) -> Option<RequestState> {
        if let Some(ctx) = self.requests.get(&handle) {
            return Some(ctx.state);
        }
        self.recent
            .iter()
            .rev()
            .find(|(h, _)| *h == handle)
            .map(|(_, s)| *s)
    }

    /// The request holding the admission slot.
    pub fn in_flight(&self) -> Option<RequestHandle> {
        self.active
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    fn finalize(&mut self, handle: RequestHandle, state: RequestState) {
        self.requests.remove(&handle);
        if self.active == Some(handle) {
            self.active = None;
        }
        if self.recent.len() == RECENT_TERMINAL_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back((handle, state));
        debug!("{handle} is {state}");
    }

    fn publish(&mut self, event: CompletionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use std::sync::Mutex;

    /// Records starts; the test drives events by hand.
    #[derive(Default)]
    struct RecordingBackend {
        started: Mutex<Vec<(RequestHandle, ChatRequest)>>,
    }

    impl CompletionBackend for RecordingBackend {
        fn start(&self, handle: RequestHandle, request: ChatRequest, _events: TransportSender) {
            self.started.lock().unwrap().push((handle, request));
        }
    }

    /// Replies to every request with the scripted deltas, then finishes.
    struct ScriptedBackend {
        deltas: Vec<&'static str>,
    }

    impl CompletionBackend for ScriptedBackend {
        fn start(&self, handle: RequestHandle, _request: ChatRequest, events: TransportSender) {
            for d in &self.deltas {
                events.send(TransportEvent::delta(handle, *d)).unwrap();
            }
            events.send(TransportEvent::finished(handle, None, Some("stop".into()))).unwrap();
        }
    }

    fn target(source: &str) -> RequestTarget {
        RequestTarget::new(ConversationKey::new("libera", source), "History")
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user(text)],
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<CompletionEvent>) -> Vec<CompletionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn single_admission_in_fifo_order() {
        let backend = Arc::new(RecordingBackend::default());
        let (mut orch, _rx) = CompletionOrchestrator::new(backend.clone());

        let r1 = orch.submit(target("#a"), request("1"));
        let r2 = orch.submit(target("#a"), request("2"));
        let r3 = orch.submit(target("#b"), request("3"));

        assert_eq!(orch.tick(), Some(r1));
        assert_eq!(orch.tick(), None);
        assert_eq!(orch.state(r1), Some(RequestState::Dispatched));
        assert_eq!(orch.state(r2), Some(RequestState::Queued));

        orch.apply(TransportEvent::finished(r1, None, None));
        assert_eq!(orch.state(r1), Some(RequestState::Completed));
        assert_eq!(orch.tick(), Some(r2));
        assert_eq!(orch.tick(), None);

        orch.apply(TransportEvent::error(r2, "HTTP 500"));
        assert_eq!(orch.state(r2), Some(RequestState::Failed));
        assert_eq!(orch.tick(), Some(r3));

        let started: Vec<_> = backend.started.lock().unwrap().iter().map(|(h, _)| *h).collect();
        assert_eq!(started, vec![r1, r2, r3]);
        assert!(backend.started.lock().unwrap().iter().all(|(_, r)| r.stream));
    }

    #[test]
    fn deltas_become_lines_then_result() {
        let (mut orch, _rx) = CompletionOrchestrator::new(Arc::new(RecordingBackend::default()));
        let mut events = orch.subscribe();
        let h = orch.submit(target("#a"), request("hi"));
        orch.tick();

        orch.apply(TransportEvent::delta(h, "Hello "));
        assert_eq!(orch.state(h), Some(RequestState::Streaming));
        orch.apply(TransportEvent::delta(h, "world.\n"));
        orch.apply(TransportEvent::delta(h, "Bye"));
        orch.apply(TransportEvent::finished(h, None, Some("stop".into())));

        let got = drain(&mut events);
        assert_eq!(got.len(), 3);
        assert!(matches!(&got[0], CompletionEvent::Line { text, is_last: false, .. } if text == "Hello world."));
        assert!(matches!(&got[1], CompletionEvent::Line { text, is_last: true, .. } if text == "Bye"));
        match &got[2] {
            CompletionEvent::Result { message, finish_reason, target, .. } => {
                assert_eq!(message, "Hello world.\nBye");
                assert_eq!(finish_reason.as_deref(), Some("stop"));
                assert_eq!(target.reply_to, "#a");
            }
            other => panic!("expected result, got {other:?}"),
        }
        assert!(orch.is_idle());
    }

    #[test]
    fn error_publishes_error_only() {
        let (mut orch, _rx) = CompletionOrchestrator::new(Arc::new(RecordingBackend::default()));
        let mut events = orch.subscribe();
        let h = orch.submit(target("#a"), request("hi"));
        orch.tick();
        orch.apply(TransportEvent::error(h, "rate limited"));

        let got = drain(&mut events);
        assert_eq!(got.len(), 1);
        assert!(matches!(&got[0], CompletionEvent::Error { error, .. } if error == "rate limited"));
        assert_eq!(orch.in_flight(), None);
    }

    #[test]
    fn unknown_handles_are_ignored() {
        let (mut orch, _rx) = CompletionOrchestrator::new(Arc::new(RecordingBackend::default()));
        let mut events = orch.subscribe();
        orch.apply(TransportEvent::delta(RequestHandle(99), "ghost\n"));
        orch.apply(TransportEvent::finished(RequestHandle(99), None, None));
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn events_before_dispatch_are_ignored() {
        let (mut orch, _rx) = CompletionOrchestrator::new(Arc::new(RecordingBackend::default()));
        let mut events = orch.subscribe();
        let h = orch.submit(target("#a"), request("hi"));
        orch.apply(TransportEvent::delta(h, "early\n"));
        assert!(drain(&mut events).is_empty());
        assert_eq!(orch.state(h), Some(RequestState::Queued));
    }

    #[test]
    fn cancel_removes_conversation_requests() {
        let (mut orch, _rx) = CompletionOrchestrator::new(Arc::new(RecordingBackend::default()));
        let mut events = orch.subscribe();
        let a1 = orch.submit(target("#a"), request("1"));
        let a2 = orch.submit(target("#a"), request("2"));
        let b1 = orch.submit(target("#b"), request("3"));
        orch.tick();
        orch.apply(TransportEvent::delta(a1, "partial line\n"));
        assert_eq!(drain(&mut events).len(), 1);

        let cancelled = orch.cancel(&ConversationKey::new("libera", "#a"));
        assert_eq!(cancelled, vec![a1, a2]);
        assert_eq!(orch.state(a1), Some(RequestState::Cancelled));
        assert_eq!(orch.state(a2), Some(RequestState::Cancelled));

        // Late events for the cancelled stream are dropped.
        orch.apply(TransportEvent::delta(a1, "more\n"));
        orch.apply(TransportEvent::finished(a1, None, None));
        assert!(drain(&mut events).is_empty());

        assert_eq!(orch.tick(), Some(b1));
        assert_eq!(orch.queued_len(), 0);
    }

    #[tokio::test]
    async fn backend_events_arrive_on_transport_channel() {
        let backend = Arc::new(ScriptedBackend {
            deltas: vec!["one\ntw", "o\n", "three"],
        });
        let (mut orch, mut transport_rx) = CompletionOrchestrator::new(backend);
        let mut events = orch.subscribe();
        let h = orch.submit(target("alice"), request("count"));
        orch.tick();

        while let Some(ev) = transport_rx.recv().await {
            orch.apply(ev);
            if orch.is_idle() {
                break;
            }
        }

        let lines: Vec<(String, bool)> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                CompletionEvent::Line { text, is_last, handle, .. } if handle == h => Some((text, is_last)),
                _ => None,
            })
            .collect();
        assert_eq!(
            lines,
            vec![
                ("one".to_string(), false),
                ("two".to_string(), false),
                ("three".to_string(), true)
            ]
        );
    }
}
