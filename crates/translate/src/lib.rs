//! Template-driven wire translation for the Switchboard LLM gateway.
//!
//! Nothing in this crate knows any concrete provider. Every mapping between
//! the unified shapes and a provider's JSON is driven by the dotted paths in
//! the merged config: requests are built by [`path::set_path`] assignments
//! into a generic `serde_json::Value` tree, responses are read back with
//! [`path::get_path`] descents, and SSE streams are decoded event by event
//! into unified chunks.

pub mod chat_request;
pub mod chat_response;
pub mod embedding;
pub mod path;
pub mod sse;

pub use chat_request::{build_chat_request, ProviderRequest};
pub use chat_response::{parse_chat_response, ResponseAccumulator, StreamCollector};
pub use embedding::{build_embedding_request, parse_embedding_response};
pub use sse::chat_chunk_stream;
