use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages and tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation emitted by the model (provider-agnostic).
///
/// `arguments` is the raw JSON text as produced by the provider; it is not
/// parsed here because streaming providers deliver it in fragments and the
/// host decides when (and whether) to decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A message in the conversation (provider-agnostic).
///
/// `content` may be empty when an assistant message carries only tool calls.
/// `tool_calls` is only valid on assistant messages; `tool_call_id` only on
/// tool messages, pairing the reply with an earlier assistant tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// An assistant turn that requested tool invocations.
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    /// A tool's reply, paired to the assistant call that requested it.
    pub fn tool_reply(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unified request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct UnifiedChatRequest {
    /// Caller-supplied identifier scoping the cache to one dialog thread.
    pub conversation_id: String,
    /// Conversation messages, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Sampling temperature. `None` falls back to the merged config.
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter. `None` falls back to the merged config.
    pub top_p: Option<f32>,
    /// Maximum tokens in the response. `None` falls back to the merged config.
    pub max_tokens: Option<u32>,
    /// When `true`, inject the template's JSON-mode parameter.
    pub force_json_output: bool,
    /// Advisory delivery preference; never part of the cache identity.
    pub stream: bool,
}

impl UnifiedChatRequest {
    /// Check the structural invariants the coordinators rely on.
    ///
    /// Returns [`Error::InvalidArgument`] naming the offending field:
    /// non-empty conversation id, non-empty messages, tool calls only on
    /// assistant messages, tool replies only on tool messages and only when
    /// an earlier assistant turn issued the matching call id.
    pub fn validate(&self) -> Result<()> {
        if self.conversation_id.is_empty() {
            return Err(Error::InvalidArgument("conversation_id is empty".into()));
        }
        if self.messages.is_empty() {
            return Err(Error::InvalidArgument("messages is empty".into()));
        }

        let mut seen_call_ids: Vec<&str> = Vec::new();
        for (i, msg) in self.messages.iter().enumerate() {
            if msg.tool_calls.is_some() && msg.role != Role::Assistant {
                return Err(Error::InvalidArgument(format!(
                    "message {i}: tool_calls on non-assistant role"
                )));
            }
            if msg.tool_call_id.is_some() && msg.role != Role::Tool {
                return Err(Error::InvalidArgument(format!(
                    "message {i}: tool_call_id on non-tool role"
                )));
            }
            match msg.role {
                Role::System if i > 0 => {
                    return Err(Error::InvalidArgument(format!(
                        "message {i}: system message only allowed at the start"
                    )));
                }
                Role::Assistant => {
                    if let Some(calls) = &msg.tool_calls {
                        seen_call_ids.extend(calls.iter().map(|c| c.id.as_str()));
                    }
                }
                Role::Tool => {
                    let id = msg.tool_call_id.as_deref().unwrap_or("");
                    if id.is_empty() {
                        return Err(Error::InvalidArgument(format!(
                            "message {i}: tool reply without tool_call_id"
                        )));
                    }
                    if !seen_call_ids.contains(&id) {
                        return Err(Error::InvalidArgument(format!(
                            "message {i}: tool reply '{id}' has no matching assistant tool call"
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unified response and stream chunks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for FinishReason {
    fn from(s: String) -> Self {
        match s.as_str() {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            _ => FinishReason::Other(s),
        }
    }
}

impl From<&str> for FinishReason {
    fn from(s: &str) -> Self {
        FinishReason::from(s.to_string())
    }
}

impl From<FinishReason> for String {
    fn from(r: FinishReason) -> Self {
        r.as_str().to_string()
    }
}

/// A complete, provider-agnostic chat completion.
///
/// Serializable because it doubles as the cache value: a stored response is
/// returned directly to non-streaming callers and sliced into a
/// pseudo-stream for streaming callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedChatResponse {
    /// Assistant message text (empty when only tool calls were produced).
    pub content: String,
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// One unit of a streaming completion.
///
/// Only the terminal chunk carries `finish_reason` (and `tool_calls`, when
/// the model invoked any).
#[derive(Debug, Clone, Default)]
pub struct UnifiedChatChunk {
    pub content_delta: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub tool_calls: Option<Vec<ToolCall>>,
}
