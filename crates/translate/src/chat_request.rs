//! Unified chat request → provider HTTP request.
//!
//! The body starts as a deep copy of the merged static parameters and is
//! filled in by dotted-path assignments, so a template can put any standard
//! field anywhere in the provider's JSON shape.

use serde_json::{json, Value};

use sb_domain::chat::{ChatMessage, Role, ToolDefinition, UnifiedChatRequest};
use sb_domain::config::MergedConfig;

use crate::path::set_path;

/// A ready-to-send provider call: POST `url` with `headers` and JSON `body`.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Build the provider chat request for `req`.
///
/// `stream` is passed separately from `req.stream` because the coordinator
/// decides the actual delivery mode (a cache-hit pseudo-stream never gets
/// here, and a non-streaming coalesced call forces `false`).
pub fn build_chat_request(cfg: &MergedConfig, req: &UnifiedChatRequest, stream: bool) -> ProviderRequest {
    let paths = &cfg.request_paths;
    let mut body = cfg.static_parameters.clone();

    set_path(&mut body, &paths.model, json!(cfg.chat_model));

    let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();
    set_path(&mut body, &paths.messages, Value::Array(messages));

    if let Some(tools) = req.tools.as_deref().filter(|t| !t.is_empty()) {
        let tools_path = if cfg.tool_paths.root.is_empty() {
            &paths.tools
        } else {
            &cfg.tool_paths.root
        };
        if !tools_path.is_empty() {
            let wire_tools: Vec<Value> = tools.iter().map(|t| tool_to_wire(cfg, t)).collect();
            set_path(&mut body, tools_path, Value::Array(wire_tools));
            if !paths.tool_choice.is_empty() {
                set_path(&mut body, &paths.tool_choice, json!("auto"));
            }
        }
    }

    // Request-level sampling parameters win over the merged defaults.
    if let Some(temperature) = req.temperature.or(cfg.temperature) {
        if !paths.temperature.is_empty() {
            set_path(&mut body, &paths.temperature, json!(temperature));
        }
    }
    if let Some(top_p) = req.top_p.or(cfg.top_p) {
        if !paths.top_p.is_empty() {
            set_path(&mut body, &paths.top_p, json!(top_p));
        }
    }
    if let Some(max_tokens) = req.max_tokens.or(cfg.max_tokens) {
        if !paths.max_tokens.is_empty() {
            set_path(&mut body, &paths.max_tokens, json!(max_tokens));
        }
    }

    if req.force_json_output {
        if let Some(json_mode) = &cfg.json_mode {
            set_path(&mut body, &json_mode.path, json_mode.value.clone());
        }
    }

    set_path(&mut body, &paths.stream, json!(stream));

    ProviderRequest {
        url: cfg.chat_endpoint.clone(),
        headers: build_headers(cfg),
        body,
    }
}

/// Merged custom headers plus the auth header.
///
/// The auth header overrides a same-named custom header, and is omitted
/// entirely when the key is empty (local providers). Sorted by name so the
/// output is deterministic.
pub(crate) fn build_headers(cfg: &MergedConfig) -> Vec<(String, String)> {
    let mut headers = cfg.headers.clone();
    if !cfg.api_key.is_empty() {
        let value = if cfg.auth_scheme.is_empty() {
            cfg.api_key.clone()
        } else {
            format!("{} {}", cfg.auth_scheme, cfg.api_key)
        };
        headers.insert(cfg.auth_header.clone(), value);
    }
    let mut headers: Vec<(String, String)> = headers.into_iter().collect();
    headers.sort();
    headers
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Translate one unified message to the provider message object.
///
/// The element shape (`tool_calls` array with `{id, type, function}`,
/// `tool_call_id` on tool replies) is the OpenAI-compatible message
/// contract; only the *location* of the messages array is template-driven.
fn message_to_wire(msg: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": role_to_str(msg.role),
        "content": msg.content,
    });

    if let Some(calls) = msg.tool_calls.as_deref().filter(|c| !c.is_empty()) {
        let wire_calls: Vec<Value> = calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments },
                })
            })
            .collect();
        wire["tool_calls"] = Value::Array(wire_calls);
    }

    if let Some(id) = &msg.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }

    wire
}

/// Build one tool definition element via the template's tool paths.
fn tool_to_wire(cfg: &MergedConfig, tool: &ToolDefinition) -> Value {
    let paths = &cfg.tool_paths;
    let mut wire = json!({});
    set_path(&mut wire, &paths.type_path, json!("function"));
    set_path(&mut wire, &paths.function_name, json!(tool.name));
    set_path(&mut wire, &paths.function_description, json!(tool.description));
    set_path(&mut wire, &paths.function_parameters, tool.parameters.clone());
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::chat::ToolCall;
    use sb_domain::config::{MergedConfig, ProviderTemplate, UserConfig};

    fn merged(user: UserConfig) -> MergedConfig {
        let template: ProviderTemplate = serde_json::from_value(json!({
            "providerName": "acme",
            "chatApi": {
                "endpoint": "https://api.acme.example/v1/chat/completions",
                "defaultModel": "acme-large",
                "requestPaths": {
                    "model": "model",
                    "messages": "messages",
                    "stream": "stream",
                    "temperature": "temperature",
                    "topP": "top_p",
                    "maxTokens": "max_tokens",
                    "tools": "tools",
                    "toolChoice": "tool_choice"
                },
                "responsePaths": {
                    "choices": "choices",
                    "content": "message.content",
                    "toolCalls": "message.tool_calls",
                    "finishReason": "finish_reason"
                },
                "jsonMode": { "path": "response_format", "value": { "type": "json_object" } }
            },
            "staticParameters": { "options": { "seed": 7 } }
        }))
        .unwrap();
        MergedConfig::new("acme", &template, &user)
    }

    fn basic_request() -> UnifiedChatRequest {
        UnifiedChatRequest {
            conversation_id: "c1".into(),
            messages: vec![ChatMessage::system("S"), ChatMessage::user("ping")],
            ..Default::default()
        }
    }

    #[test]
    fn body_places_model_messages_and_stream() {
        let cfg = merged(UserConfig {
            api_key: "sk-1".into(),
            ..Default::default()
        });
        let out = build_chat_request(&cfg, &basic_request(), false);

        assert_eq!(out.url, "https://api.acme.example/v1/chat/completions");
        assert_eq!(out.body["model"], json!("acme-large"));
        assert_eq!(out.body["stream"], json!(false));
        assert_eq!(out.body["messages"][0], json!({ "role": "system", "content": "S" }));
        assert_eq!(out.body["messages"][1], json!({ "role": "user", "content": "ping" }));
        // Static parameters survive as siblings.
        assert_eq!(out.body["options"]["seed"], json!(7));
    }

    #[test]
    fn auth_header_joins_scheme_and_key() {
        let cfg = merged(UserConfig {
            api_key: "sk-1".into(),
            ..Default::default()
        });
        let out = build_chat_request(&cfg, &basic_request(), false);
        assert!(out
            .headers
            .contains(&("Authorization".to_string(), "Bearer sk-1".to_string())));
    }

    #[test]
    fn empty_key_omits_auth_header() {
        let cfg = merged(UserConfig::default());
        let out = build_chat_request(&cfg, &basic_request(), false);
        assert!(out.headers.iter().all(|(name, _)| name != "Authorization"));
    }

    #[test]
    fn assistant_tool_calls_become_function_array() {
        let cfg = merged(UserConfig::default());
        let mut req = basic_request();
        req.messages.push(ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "t1".into(),
            name: "mul".into(),
            arguments: "{\"a\":2}".into(),
        }]));
        req.messages.push(ChatMessage::tool_reply("t1", "4"));

        let out = build_chat_request(&cfg, &req, false);
        let assistant = &out.body["messages"][2];
        assert_eq!(assistant["tool_calls"][0]["id"], json!("t1"));
        assert_eq!(assistant["tool_calls"][0]["type"], json!("function"));
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], json!("mul"));
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            json!("{\"a\":2}")
        );
        let reply = &out.body["messages"][3];
        assert_eq!(reply["role"], json!("tool"));
        assert_eq!(reply["tool_call_id"], json!("t1"));
    }

    #[test]
    fn tools_and_tool_choice_are_placed() {
        let cfg = merged(UserConfig::default());
        let mut req = basic_request();
        req.tools = Some(vec![ToolDefinition {
            name: "mul".into(),
            description: "multiply".into(),
            parameters: json!({ "type": "object" }),
        }]);

        let out = build_chat_request(&cfg, &req, false);
        assert_eq!(out.body["tools"][0]["type"], json!("function"));
        assert_eq!(out.body["tools"][0]["function"]["name"], json!("mul"));
        assert_eq!(
            out.body["tools"][0]["function"]["parameters"],
            json!({ "type": "object" })
        );
        assert_eq!(out.body["tool_choice"], json!("auto"));
    }

    #[test]
    fn request_parameters_override_merged_defaults() {
        let cfg = merged(UserConfig {
            temperature: Some(0.5),
            ..Default::default()
        });
        let mut req = basic_request();
        req.temperature = Some(0.0);
        req.max_tokens = Some(256);

        let out = build_chat_request(&cfg, &req, false);
        assert_eq!(out.body["temperature"], json!(0.0));
        assert_eq!(out.body["max_tokens"], json!(256));
        assert_eq!(out.body.get("top_p"), None);
    }

    #[test]
    fn force_json_injects_template_value() {
        let cfg = merged(UserConfig::default());
        let mut req = basic_request();
        req.force_json_output = true;

        let out = build_chat_request(&cfg, &req, false);
        assert_eq!(out.body["response_format"], json!({ "type": "json_object" }));
    }

    #[test]
    fn stream_flag_follows_argument_not_request() {
        let cfg = merged(UserConfig::default());
        let mut req = basic_request();
        req.stream = true;
        let out = build_chat_request(&cfg, &req, false);
        assert_eq!(out.body["stream"], json!(false));
    }
}
