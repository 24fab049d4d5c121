//! HTTP side of the relay: the completion stream and the tokenizer endpoint.
//!
//! - [`streaming`]: SSE parser producing [`StreamEvent`](streaming::StreamEvent)
//!   values, and [`ApiClient::chat_stream_live`](crate::ApiClient::chat_stream_live).
//! - [`backend`]: [`StreamingBackend`], the production
//!   [`CompletionBackend`](crate::completion::CompletionBackend).
//! - [`tokenize`]: [`HttpTokenizer`] for llama.cpp-style `/tokenize`.

pub mod backend;
pub mod streaming;
pub mod tokenize;

pub use backend::StreamingBackend;
pub use streaming::StreamEvent;
pub use tokenize::HttpTokenizer;
