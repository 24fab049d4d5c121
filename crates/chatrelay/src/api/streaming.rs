//! Server-Sent Events (SSE) streaming for OpenAI-compatible chat completions.
//!
//! [`ApiClient::chat_stream_live`] reads the response incrementally and hands
//! every parsed [`StreamEvent`] to a callback as it arrives, so callers can
//! forward text before the model has finished.

use crate::{ApiClient, ChatRequest, StreamOptions, UsageInfo};
use serde::Deserialize;
use tracing::{debug, trace, warn};

/// A single event from an SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// Token usage information (sent in the final chunk).
    Usage(UsageInfo),
    /// The model stopped, with the reported reason.
    Finish(String),
    /// The stream is complete.
    Done,
    /// The server reported an error inside the stream.
    Error(String),
}

/// Raw SSE data chunk.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageInfo>,
    error: Option<StreamError>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamError {
    message: String,
}

impl ApiClient {
    /// Send a streaming chat request, invoking `on_event` for each event as
    /// it arrives off the wire. The full event list is also returned.
    pub async fn chat_stream_live(
        &self,
        body: &ChatRequest,
        mut on_event: impl FnMut(&StreamEvent),
    ) -> Result<Vec<StreamEvent>, String> {
        let mut body = body.clone();
        body.stream = true;
        body.stream_options = Some(StreamOptions {
            include_usage: true,
        });

        debug!(
            "Sending streaming chat request: model={}, messages={}, max_tokens={:?}",
            body.model,
            body.messages.len(),
            body.max_tokens
        );

        let mut req = self.http().post(self.url()).json(&body);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let mut resp = req
            .send()
            .await
            .map_err(|e| format!("streaming request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("API HTTP {status}: {text}"));
        }

        let mut events = Vec::new();
        // Bytes, not text: a chunk may end inside a multi-byte character.
        let mut buffer: Vec<u8> = Vec::new();
        let mut done = false;

        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| format!("failed to read streaming chunk: {e}"))?
        {
            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                let line = String::from_utf8_lossy(&line);
                if parse_sse_line(line.trim(), &mut events, &mut on_event) {
                    done = true;
                    break;
                }
            }

            if done {
                break;
            }
        }

        // Process any remaining data in the buffer.
        let remaining = String::from_utf8_lossy(&buffer).trim().to_string();
        if !done && !remaining.is_empty() {
            parse_sse_line(&remaining, &mut events, &mut on_event);
        }

        if !events.iter().any(|e| matches!(e, StreamEvent::Done)) {
            let ev = StreamEvent::Done;
            on_event(&ev);
            events.push(ev);
        }

        debug!("Live stream completed with {} events", events.len());
        Ok(events)
    }
}

/// Handle one SSE line. Returns `true` on the `[DONE]` sentinel.
fn parse_sse_line(
    line: &str,
    events: &mut Vec<StreamEvent>,
    on_event: &mut impl FnMut(&StreamEvent),
) -> bool {
    if line.is_empty() || line.starts_with(':') {
        return false;
    }
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return false;
    };
    if data == "[DONE]" {
        let ev = StreamEvent::Done;
        on_event(&ev);
        events.push(ev);
        return true;
    }
    let before = events.len();
    parse_sse_data(data, events);
    for ev in &events[before..] {
        on_event(ev);
    }
    false
}

/// Parse a single SSE `data:` payload into stream events.
fn parse_sse_data(data: &str, events: &mut Vec<StreamEvent>) {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(err) = chunk.error {
                events.push(StreamEvent::Error(err.message));
                return;
            }
            if let Some(choices) = chunk.choices {
                for choice in choices {
                    if let Some(delta) = choice.delta
                        && let Some(content) = delta.content
                        && !content.is_empty()
                    {
                        events.push(StreamEvent::TextDelta(content));
                    }
                    if let Some(reason) = choice.finish_reason {
                        trace!("Stream finish_reason: {reason}");
                        events.push(StreamEvent::Finish(reason));
                    }
                }
            }
            if let Some(usage) = chunk.usage {
                events.push(StreamEvent::Usage(usage));
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e}, data: {data}");
        }
    }
}

/// Extract usage info from stream events (if present).
pub fn extract_usage(events: &[StreamEvent]) -> Option<UsageInfo> {
    events.iter().rev().find_map(|e| match e {
        StreamEvent::Usage(usage) => Some(usage.clone()),
        _ => None,
    })
}

/// The last reported finish reason, if any.
pub fn extract_finish_reason(events: &[StreamEvent]) -> Option<String> {
    events.iter().rev().find_map(|e| match e {
        StreamEvent::Finish(reason) => Some(reason.clone()),
        _ => None,
    })
}

/// The first in-stream error, if any.
pub fn extract_error(events: &[StreamEvent]) -> Option<String> {
    events.iter().find_map(|e| match e {
        StreamEvent::Error(msg) => Some(msg.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(lines: &[&str]) -> (Vec<StreamEvent>, Vec<StreamEvent>) {
        let mut events = Vec::new();
        let mut seen = Vec::new();
        for line in lines {
            if parse_sse_line(line, &mut events, &mut |e: &StreamEvent| seen.push(e.clone())) {
                break;
            }
        }
        (events, seen)
    }

    #[test]
    fn parses_openai_chunks() {
        let (events, seen) = parse_all(&[
            r#"data: {"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            ": keep-alive",
            "",
            r#"data:{"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":2,"total_tokens":11}}"#,
            "data: [DONE]",
            r#"data: {"choices":[{"delta":{"content":"ignored"}}]}"#,
        ]);

        assert_eq!(events, seen);
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta(delta) => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");
        assert_eq!(extract_finish_reason(&events).as_deref(), Some("stop"));
        assert_eq!(extract_usage(&events).unwrap().total_tokens, Some(11));
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn in_stream_error_is_reported() {
        let (events, _) = parse_all(&[r#"data: {"error":{"message":"context length exceeded"}}"#]);
        assert_eq!(extract_error(&events).as_deref(), Some("context length exceeded"));
    }

    #[test]
    fn garbage_is_skipped() {
        let (events, _) = parse_all(&["data: not json", "event: ping"]);
        assert!(events.is_empty());
    }

    #[test]
    fn extract_usage_returns_none_when_missing() {
        let events = vec![StreamEvent::TextDelta("hi".into()), StreamEvent::Done];
        assert!(extract_usage(&events).is_none());
        assert!(extract_finish_reason(&events).is_none());
    }
}
