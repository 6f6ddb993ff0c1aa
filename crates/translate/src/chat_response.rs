//! Provider chat response → unified shapes.
//!
//! Non-streaming bodies are decoded in one pass with [`parse_chat_response`].
//! SSE streams go through a [`StreamCollector`], which turns each `data:`
//! event into at most one unified chunk while accumulating tool-call
//! fragments and the finish reason for the terminal chunk.

use std::collections::BTreeMap;

use serde_json::Value;

use sb_domain::chat::{FinishReason, ToolCall, UnifiedChatChunk, UnifiedChatResponse};
use sb_domain::config::ChatResponsePaths;
use sb_domain::error::{Error, Result};

use crate::path::get_path;

/// SSE stream terminator payload.
pub const DONE_SENTINEL: &str = "[DONE]";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Non-streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decode a complete (non-streaming) provider response body.
///
/// Missing content with tool calls present yields an empty content string;
/// neither present is an [`Error::InvalidResponse`].
pub fn parse_chat_response(paths: &ChatResponsePaths, body: &Value) -> Result<UnifiedChatResponse> {
    let choice = get_path(body, &paths.choices)
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| {
            Error::InvalidResponse(format!("no choices array at '{}'", paths.choices))
        })?;

    let content = get_path(choice, &paths.content).and_then(Value::as_str);
    let tool_calls = if paths.tool_calls.is_empty() {
        None
    } else {
        get_path(choice, &paths.tool_calls)
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(parse_wire_tool_call).collect())
            .filter(|calls: &Vec<ToolCall>| !calls.is_empty())
    };

    if content.is_none() && tool_calls.is_none() {
        return Err(Error::InvalidResponse(format!(
            "neither content at '{}' nor tool calls at '{}' present",
            paths.content, paths.tool_calls
        )));
    }

    let finish_reason = get_path(choice, &paths.finish_reason)
        .and_then(Value::as_str)
        .map(FinishReason::from)
        .unwrap_or_else(|| infer_finish_reason(tool_calls.as_deref()));

    Ok(UnifiedChatResponse {
        content: content.unwrap_or("").to_string(),
        finish_reason,
        tool_calls,
    })
}

/// Decode one element of a response tool-calls array.
///
/// The element shape (`id`, `function.name`, `function.arguments`) is the
/// OpenAI-compatible contract; `arguments` arriving as an object instead of
/// a JSON string is re-serialized.
fn parse_wire_tool_call(wire: &Value) -> Option<ToolCall> {
    let id = wire.get("id")?.as_str()?.to_string();
    let function = wire.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = match function.get("arguments") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "{}".to_string(),
    };
    Some(ToolCall { id, name, arguments })
}

fn infer_finish_reason(tool_calls: Option<&[ToolCall]>) -> FinishReason {
    if tool_calls.is_some_and(|calls| !calls.is_empty()) {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream decode state.
///
/// Feeds on raw `data:` payloads. Content deltas come back as chunks
/// immediately; tool-call fragments (split across events, keyed by `index`)
/// and the finish reason accumulate until the `[DONE]` sentinel, at which
/// point [`StreamCollector::terminal_chunk`] produces the single final
/// chunk. [`StreamCollector::into_response`] yields the aggregate for the
/// cache.
pub struct StreamCollector {
    paths: ChatResponsePaths,
    content: String,
    finish_reason: Option<FinishReason>,
    tool_calls: BTreeMap<u64, PartialToolCall>,
    done: bool,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamCollector {
    pub fn new(paths: ChatResponsePaths) -> Self {
        Self {
            paths,
            content: String::new(),
            finish_reason: None,
            tool_calls: BTreeMap::new(),
            done: false,
        }
    }

    /// Process one event payload; returns a chunk when the event carried a
    /// content delta. Malformed JSON is logged and skipped, not fatal.
    pub fn handle_event(&mut self, data: &str) -> Option<UnifiedChatChunk> {
        if data == DONE_SENTINEL {
            self.done = true;
            return None;
        }

        let event: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, "skipping malformed SSE event");
                return None;
            }
        };

        let choice = get_path(&event, &self.paths.choices)
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())?;

        if let Some(reason) = get_path(choice, &self.paths.finish_reason).and_then(Value::as_str) {
            self.finish_reason = Some(FinishReason::from(reason));
        }

        if let Some(fragments) =
            get_path(choice, &self.paths.delta_tool_calls).and_then(Value::as_array)
        {
            for fragment in fragments {
                self.absorb_tool_fragment(fragment);
            }
        }

        let delta = get_path(choice, &self.paths.delta_content)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())?;
        self.content.push_str(delta);
        Some(UnifiedChatChunk {
            content_delta: Some(delta.to_string()),
            ..Default::default()
        })
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The final chunk of the stream. Always carries a finish reason; when
    /// the provider never sent one it is inferred from the collected state.
    pub fn terminal_chunk(&self) -> UnifiedChatChunk {
        UnifiedChatChunk {
            content_delta: None,
            finish_reason: Some(self.effective_finish_reason()),
            tool_calls: self.collected_tool_calls(),
        }
    }

    /// Fold the collected stream into a complete response for the cache.
    pub fn into_response(self) -> UnifiedChatResponse {
        let finish_reason = self.effective_finish_reason();
        let tool_calls = self.collected_tool_calls();
        UnifiedChatResponse {
            content: self.content,
            finish_reason,
            tool_calls,
        }
    }

    fn absorb_tool_fragment(&mut self, fragment: &Value) {
        let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
        let partial = self.tool_calls.entry(index).or_default();
        if let Some(id) = fragment.get("id").and_then(Value::as_str) {
            partial.id = id.to_string();
        }
        if let Some(function) = fragment.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                partial.name = name.to_string();
            }
            if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                partial.arguments.push_str(arguments);
            }
        }
    }

    fn effective_finish_reason(&self) -> FinishReason {
        self.finish_reason.clone().unwrap_or_else(|| {
            if self.tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            }
        })
    }

    fn collected_tool_calls(&self) -> Option<Vec<ToolCall>> {
        if self.tool_calls.is_empty() {
            return None;
        }
        Some(
            self.tool_calls
                .values()
                .map(|partial| ToolCall {
                    id: partial.id.clone(),
                    name: partial.name.clone(),
                    arguments: partial.arguments.clone(),
                })
                .collect(),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk-side aggregation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Folds delivered chunks back into a complete response.
///
/// Used by the chat coordinator to rebuild the cacheable response while
/// forwarding chunks to the consumer; [`ResponseAccumulator::finish`]
/// returns `None` unless a terminal chunk (one carrying a finish reason)
/// was seen, so truncated streams never produce a cache value.
#[derive(Default)]
pub struct ResponseAccumulator {
    content: String,
    finish_reason: Option<FinishReason>,
    tool_calls: Option<Vec<ToolCall>>,
}

impl ResponseAccumulator {
    pub fn push(&mut self, chunk: &UnifiedChatChunk) {
        if let Some(delta) = &chunk.content_delta {
            self.content.push_str(delta);
        }
        if let Some(reason) = &chunk.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        if let Some(calls) = &chunk.tool_calls {
            self.tool_calls = Some(calls.clone());
        }
    }

    pub fn finish(self) -> Option<UnifiedChatResponse> {
        Some(UnifiedChatResponse {
            content: self.content,
            finish_reason: self.finish_reason?,
            tool_calls: self.tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn openai_paths() -> ChatResponsePaths {
        serde_json::from_value(json!({
            "choices": "choices",
            "content": "message.content",
            "toolCalls": "message.tool_calls",
            "finishReason": "finish_reason"
        }))
        .unwrap()
    }

    #[test]
    fn parse_plain_response() {
        let body = json!({
            "choices": [{
                "message": { "role": "assistant", "content": "pong" },
                "finish_reason": "stop"
            }]
        });
        let resp = parse_chat_response(&openai_paths(), &body).unwrap();
        assert_eq!(resp.content, "pong");
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert!(resp.tool_calls.is_none());
    }

    #[test]
    fn parse_tool_call_response_allows_missing_content() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "t1",
                        "type": "function",
                        "function": { "name": "mul", "arguments": "{\"a\":2}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_chat_response(&openai_paths(), &body).unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        let calls = resp.tool_calls.unwrap();
        assert_eq!(calls[0].name, "mul");
        assert_eq!(calls[0].arguments, "{\"a\":2}");
    }

    #[test]
    fn parse_rejects_empty_choice() {
        let body = json!({ "choices": [{ "message": {} }] });
        let err = parse_chat_response(&openai_paths(), &body).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn parse_rejects_missing_choices() {
        let body = json!({ "error": "overloaded" });
        let err = parse_chat_response(&openai_paths(), &body).unwrap_err();
        assert!(err.to_string().contains("choices"));
    }

    #[test]
    fn parse_object_arguments_are_reserialized() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "t1",
                        "function": { "name": "mul", "arguments": { "a": 2 } }
                    }]
                }
            }]
        });
        let resp = parse_chat_response(&openai_paths(), &body).unwrap();
        assert_eq!(resp.tool_calls.unwrap()[0].arguments, "{\"a\":2}");
    }

    #[test]
    fn collector_emits_content_deltas() {
        let mut collector = StreamCollector::new(openai_paths());
        let chunk = collector
            .handle_event(r#"{"choices":[{"delta":{"content":"po"}}]}"#)
            .unwrap();
        assert_eq!(chunk.content_delta.as_deref(), Some("po"));
        assert!(chunk.finish_reason.is_none());

        collector.handle_event(r#"{"choices":[{"delta":{"content":"ng"}}]}"#);
        collector.handle_event(r#"{"choices":[{"finish_reason":"stop"}]}"#);
        collector.handle_event(DONE_SENTINEL);
        assert!(collector.is_done());

        let terminal = collector.terminal_chunk();
        assert_eq!(terminal.finish_reason, Some(FinishReason::Stop));

        let resp = collector.into_response();
        assert_eq!(resp.content, "pong");
        assert_eq!(resp.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn collector_reassembles_split_tool_calls() {
        let mut collector = StreamCollector::new(openai_paths());
        let events = [
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"t1","type":"function","function":{"name":"mul"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"2,\"b\":3}"}}]}]}}"#,
            r#"{"choices":[{"finish_reason":"tool_calls"}]}"#,
        ];
        for event in events {
            assert!(collector.handle_event(event).is_none());
        }
        collector.handle_event(DONE_SENTINEL);

        let terminal = collector.terminal_chunk();
        assert_eq!(terminal.finish_reason, Some(FinishReason::ToolCalls));
        let calls = terminal.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[0].name, "mul");
        assert_eq!(calls[0].arguments, "{\"a\":2,\"b\":3}");

        let resp = collector.into_response();
        assert_eq!(resp.tool_calls.unwrap()[0].arguments, "{\"a\":2,\"b\":3}");
    }

    #[test]
    fn collector_orders_parallel_tool_calls_by_index() {
        let mut collector = StreamCollector::new(openai_paths());
        collector.handle_event(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"t2","function":{"name":"b","arguments":"{}"}}]}}]}"#,
        );
        collector.handle_event(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"t1","function":{"name":"a","arguments":"{}"}}]}}]}"#,
        );
        collector.handle_event(DONE_SENTINEL);

        let calls = collector.terminal_chunk().tool_calls.unwrap();
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[1].id, "t2");
    }

    #[test]
    fn collector_skips_malformed_events() {
        let mut collector = StreamCollector::new(openai_paths());
        assert!(collector.handle_event("{not json").is_none());
        let chunk = collector
            .handle_event(r#"{"choices":[{"delta":{"content":"ok"}}]}"#)
            .unwrap();
        assert_eq!(chunk.content_delta.as_deref(), Some("ok"));
    }

    #[test]
    fn collector_infers_finish_reason_when_absent() {
        let mut collector = StreamCollector::new(openai_paths());
        collector.handle_event(r#"{"choices":[{"delta":{"content":"hi"}}]}"#);
        collector.handle_event(DONE_SENTINEL);
        assert_eq!(collector.terminal_chunk().finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn accumulator_requires_terminal_chunk() {
        let mut acc = ResponseAccumulator::default();
        acc.push(&UnifiedChatChunk {
            content_delta: Some("partial".into()),
            ..Default::default()
        });
        assert!(acc.finish().is_none());
    }

    #[test]
    fn accumulator_round_trips_stream() {
        let mut acc = ResponseAccumulator::default();
        for delta in ["po", "ng"] {
            acc.push(&UnifiedChatChunk {
                content_delta: Some(delta.into()),
                ..Default::default()
            });
        }
        acc.push(&UnifiedChatChunk {
            content_delta: None,
            finish_reason: Some(FinishReason::Stop),
            tool_calls: None,
        });
        let resp = acc.finish().unwrap();
        assert_eq!(resp.content, "pong");
        assert_eq!(resp.finish_reason, FinishReason::Stop);
    }
}
