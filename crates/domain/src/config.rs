//! Configuration model: provider templates, user configs, and their merge
//! product.
//!
//! A [`ProviderTemplate`] describes *how an API works* (endpoints, auth
//! shape, dotted wire paths); a [`UserConfig`] describes *which API the user
//! picked and how* (key, overrides, limits). [`MergedConfig`] is the
//! read-only combination built lazily per request; every downstream
//! consumer (translators, executor, cache key builders) reads only the
//! merged value and never reaches back to the raw documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider template
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declarative description of one provider's HTTP API, loaded from a JSON
/// template file. Unknown providers work iff a valid template is supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTemplate {
    pub provider_name: String,
    #[serde(default)]
    pub provider_url: String,
    #[serde(default)]
    pub http: HttpTemplate,
    pub chat_api: ChatApiTemplate,
    #[serde(default)]
    pub embedding_api: Option<EmbeddingApiTemplate>,
    /// Provider-specific JSON subtree merged verbatim into every request
    /// body before the standard fields are placed.
    #[serde(default = "empty_object")]
    pub static_parameters: Value,
    #[serde(default)]
    pub retry: RetryTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTemplate {
    #[serde(default = "d_auth_header")]
    pub auth_header: String,
    #[serde(default = "d_auth_scheme")]
    pub auth_scheme: String,
    /// Default headers sent with every request; user custom headers merge
    /// over these, user winning on duplicate names.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Local providers (Ollama and friends) set this so an empty API key is
    /// accepted and no auth header is sent.
    #[serde(default)]
    pub allow_empty_api_key: bool,
}

impl Default for HttpTemplate {
    fn default() -> Self {
        Self {
            auth_header: d_auth_header(),
            auth_scheme: d_auth_scheme(),
            headers: HashMap::new(),
            allow_empty_api_key: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatApiTemplate {
    pub endpoint: String,
    pub default_model: String,
    #[serde(default)]
    pub default_parameters: DefaultParameters,
    pub request_paths: ChatRequestPaths,
    pub response_paths: ChatResponsePaths,
    #[serde(default)]
    pub tool_paths: ToolPaths,
    /// Parameter injected when the caller forces JSON output; absent when
    /// the provider has no such switch.
    #[serde(default)]
    pub json_mode: Option<JsonMode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultParameters {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Dotted paths into the provider's request JSON. Empty optional paths mean
/// the provider has no such parameter and the translator skips it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestPaths {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub temperature: String,
    #[serde(default)]
    pub top_p: String,
    #[serde(default)]
    pub max_tokens: String,
    #[serde(default)]
    pub tools: String,
    #[serde(default)]
    pub tool_choice: String,
}

/// Dotted paths into the provider's response JSON. `choices` is resolved on
/// the body root; the rest are resolved on the first choice element. The
/// delta paths cover the streaming variant of the same fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponsePaths {
    #[serde(default)]
    pub choices: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: String,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default = "d_delta_content")]
    pub delta_content: String,
    #[serde(default = "d_delta_tool_calls")]
    pub delta_tool_calls: String,
}

/// Dotted paths used to build each tool definition element. `root`
/// overrides `request_paths.tools` as the array location when non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPaths {
    #[serde(default)]
    pub root: String,
    #[serde(rename = "type", default = "d_tool_type")]
    pub type_path: String,
    #[serde(default = "d_tool_name")]
    pub function_name: String,
    #[serde(default = "d_tool_description")]
    pub function_description: String,
    #[serde(default = "d_tool_parameters")]
    pub function_parameters: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            root: String::new(),
            type_path: d_tool_type(),
            function_name: d_tool_name(),
            function_description: d_tool_description(),
            function_parameters: d_tool_parameters(),
        }
    }
}

/// `path := value` injected into the request body when JSON output is forced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonMode {
    pub path: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingApiTemplate {
    pub endpoint: String,
    pub default_model: String,
    #[serde(default = "d_max_batch_size")]
    pub max_batch_size: usize,
    pub request_paths: EmbeddingRequestPaths,
    pub response_paths: EmbeddingResponsePaths,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRequestPaths {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingResponsePaths {
    #[serde(default)]
    pub data_list: String,
    #[serde(default)]
    pub embedding: String,
    #[serde(default)]
    pub index: String,
}

/// Retry knobs consumed by the HTTP executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryTemplate {
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryTemplate {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            initial_delay_ms: d_initial_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
        }
    }
}

impl ProviderTemplate {
    /// Validate the template against the fixed schema: every required path
    /// field present and non-empty. The error names the file and field so
    /// the host UI can point at the exact problem.
    pub fn validate(&self, file: &str) -> Result<()> {
        require(file, "providerName", &self.provider_name)?;
        require(file, "chatApi.endpoint", &self.chat_api.endpoint)?;
        require(file, "chatApi.defaultModel", &self.chat_api.default_model)?;

        let rp = &self.chat_api.request_paths;
        require(file, "chatApi.requestPaths.model", &rp.model)?;
        require(file, "chatApi.requestPaths.messages", &rp.messages)?;
        require(file, "chatApi.requestPaths.stream", &rp.stream)?;

        let sp = &self.chat_api.response_paths;
        require(file, "chatApi.responsePaths.choices", &sp.choices)?;
        require(file, "chatApi.responsePaths.content", &sp.content)?;
        require(file, "chatApi.responsePaths.finishReason", &sp.finish_reason)?;

        if let Some(jm) = &self.chat_api.json_mode {
            require(file, "chatApi.jsonMode.path", &jm.path)?;
        }

        if let Some(embed) = &self.embedding_api {
            require(file, "embeddingApi.endpoint", &embed.endpoint)?;
            require(file, "embeddingApi.defaultModel", &embed.default_model)?;
            require(file, "embeddingApi.requestPaths.model", &embed.request_paths.model)?;
            require(file, "embeddingApi.requestPaths.input", &embed.request_paths.input)?;
            require(
                file,
                "embeddingApi.responsePaths.dataList",
                &embed.response_paths.data_list,
            )?;
            require(
                file,
                "embeddingApi.responsePaths.embedding",
                &embed.response_paths.embedding,
            )?;
            require(file, "embeddingApi.responsePaths.index", &embed.response_paths.index)?;
            if embed.max_batch_size == 0 {
                return Err(Error::ConfigurationInvalid {
                    file: file.into(),
                    field: "embeddingApi.maxBatchSize".into(),
                    message: "must be at least 1".into(),
                });
            }
        }
        Ok(())
    }
}

fn require(file: &str, field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::ConfigurationInvalid {
            file: file.into(),
            field: field.into(),
            message: "required field is missing or empty".into(),
        });
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-provider user overrides, loaded from a JSON config file and written
/// back by the host's configuration UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub chat_endpoint: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub embedding_endpoint: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Maximum concurrent upstream HTTP calls for this provider.
    #[serde(default = "d_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    /// Deep-merged over the template's `staticParameters`; user wins on
    /// leaf conflicts.
    #[serde(default = "empty_object")]
    pub static_parameters_override: Value,
    #[serde(default = "d_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            chat_endpoint: None,
            chat_model: None,
            embedding_endpoint: None,
            embedding_model: None,
            temperature: None,
            top_p: None,
            concurrency_limit: d_concurrency_limit(),
            custom_headers: HashMap::new(),
            static_parameters_override: empty_object(),
            cache_ttl_secs: d_cache_ttl_secs(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merged config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only merge of one template with its user config, built per request.
///
/// The API key is copied here verbatim for in-memory use; it must never
/// appear in cache keys or log output.
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub provider_id: String,
    pub provider_name: String,
    pub api_key: String,
    pub auth_header: String,
    pub auth_scheme: String,
    pub headers: HashMap<String, String>,
    pub chat_endpoint: String,
    pub chat_model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_paths: ChatRequestPaths,
    pub response_paths: ChatResponsePaths,
    pub tool_paths: ToolPaths,
    pub json_mode: Option<JsonMode>,
    pub static_parameters: Value,
    pub embedding: Option<MergedEmbedding>,
    pub retry: RetryTemplate,
    pub concurrency_limit: usize,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct MergedEmbedding {
    pub endpoint: String,
    pub model: String,
    pub max_batch_size: usize,
    pub request_paths: EmbeddingRequestPaths,
    pub response_paths: EmbeddingResponsePaths,
}

impl MergedConfig {
    /// Apply the merge policy: user override wins for endpoints, models,
    /// and parameters; shallow header merge with user winning on duplicate
    /// names; deep merge for static parameters.
    pub fn new(provider_id: &str, template: &ProviderTemplate, user: &UserConfig) -> Self {
        let mut headers = template.http.headers.clone();
        headers.extend(user.custom_headers.clone());

        let mut static_parameters = template.static_parameters.clone();
        deep_merge(&mut static_parameters, &user.static_parameters_override);

        let defaults = &template.chat_api.default_parameters;
        let embedding = template.embedding_api.as_ref().map(|api| MergedEmbedding {
            endpoint: user
                .embedding_endpoint
                .clone()
                .unwrap_or_else(|| api.endpoint.clone()),
            model: user
                .embedding_model
                .clone()
                .unwrap_or_else(|| api.default_model.clone()),
            max_batch_size: api.max_batch_size,
            request_paths: api.request_paths.clone(),
            response_paths: api.response_paths.clone(),
        });

        Self {
            provider_id: provider_id.to_string(),
            provider_name: template.provider_name.clone(),
            api_key: user.api_key.clone(),
            auth_header: template.http.auth_header.clone(),
            auth_scheme: template.http.auth_scheme.clone(),
            headers,
            chat_endpoint: user
                .chat_endpoint
                .clone()
                .unwrap_or_else(|| template.chat_api.endpoint.clone()),
            chat_model: user
                .chat_model
                .clone()
                .unwrap_or_else(|| template.chat_api.default_model.clone()),
            temperature: user.temperature.or(defaults.temperature),
            top_p: user.top_p.or(defaults.top_p),
            max_tokens: defaults.max_tokens,
            request_paths: template.chat_api.request_paths.clone(),
            response_paths: template.chat_api.response_paths.clone(),
            tool_paths: template.chat_api.tool_paths.clone(),
            json_mode: template.chat_api.json_mode.clone(),
            static_parameters,
            embedding,
            retry: template.retry,
            concurrency_limit: user.concurrency_limit.max(1),
            cache_ttl: Duration::from_secs(user.cache_ttl_secs),
        }
    }
}

/// Recursive object merge: overlay wins on leaf conflicts, sibling keys at
/// every level are preserved. Non-object overlay values replace the base
/// value wholesale.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
fn d_auth_header() -> String {
    "Authorization".into()
}
fn d_auth_scheme() -> String {
    "Bearer".into()
}
fn d_delta_content() -> String {
    "delta.content".into()
}
fn d_delta_tool_calls() -> String {
    "delta.tool_calls".into()
}
fn d_tool_type() -> String {
    "type".into()
}
fn d_tool_name() -> String {
    "function.name".into()
}
fn d_tool_description() -> String {
    "function.description".into()
}
fn d_tool_parameters() -> String {
    "function.parameters".into()
}
fn d_max_batch_size() -> usize {
    16
}
fn d_max_attempts() -> u32 {
    3
}
fn d_initial_delay_ms() -> u64 {
    500
}
fn d_max_delay_ms() -> u64 {
    8_000
}
fn d_concurrency_limit() -> usize {
    4
}
fn d_cache_ttl_secs() -> u64 {
    120
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn openai_style_template() -> ProviderTemplate {
        serde_json::from_value(json!({
            "providerName": "acme",
            "providerUrl": "https://acme.example",
            "http": {
                "authHeader": "Authorization",
                "authScheme": "Bearer",
                "headers": { "X-Acme-Beta": "on" }
            },
            "chatApi": {
                "endpoint": "https://api.acme.example/v1/chat/completions",
                "defaultModel": "acme-large",
                "defaultParameters": { "temperature": 0.7 },
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
                "jsonMode": {
                    "path": "response_format",
                    "value": { "type": "json_object" }
                }
            },
            "embeddingApi": {
                "endpoint": "https://api.acme.example/v1/embeddings",
                "defaultModel": "acme-embed",
                "maxBatchSize": 10,
                "requestPaths": { "model": "model", "input": "input" },
                "responsePaths": { "dataList": "data", "embedding": "embedding", "index": "index" }
            },
            "staticParameters": { "options": { "seed": 7 } }
        }))
        .unwrap()
    }

    #[test]
    fn template_parses_and_validates() {
        let template = openai_style_template();
        assert!(template.validate("acme.json").is_ok());
        assert_eq!(template.provider_name, "acme");
        assert_eq!(template.chat_api.request_paths.top_p, "top_p");
        assert_eq!(template.embedding_api.as_ref().unwrap().max_batch_size, 10);
        // Streaming delta paths fall back to the OpenAI-compatible shape.
        assert_eq!(template.chat_api.response_paths.delta_content, "delta.content");
    }

    #[test]
    fn validation_names_file_and_field() {
        let mut template = openai_style_template();
        template.chat_api.request_paths.messages = String::new();
        let err = template.validate("acme.json").unwrap_err();
        match err {
            Error::ConfigurationInvalid { file, field, .. } => {
                assert_eq!(file, "acme.json");
                assert_eq!(field, "chatApi.requestPaths.messages");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validation_checks_embedding_block_when_present() {
        let mut template = openai_style_template();
        template.embedding_api.as_mut().unwrap().response_paths.index = String::new();
        let err = template.validate("acme.json").unwrap_err();
        assert!(err.to_string().contains("embeddingApi.responsePaths.index"));
    }

    #[test]
    fn merge_user_overrides_win() {
        let template = openai_style_template();
        let user = UserConfig {
            api_key: "sk-test".into(),
            chat_endpoint: Some("http://localhost:8080/v1/chat/completions".into()),
            chat_model: Some("acme-small".into()),
            temperature: Some(0.1),
            custom_headers: HashMap::from([("X-Acme-Beta".to_string(), "off".to_string())]),
            ..Default::default()
        };
        let merged = MergedConfig::new("acme", &template, &user);
        assert_eq!(merged.chat_endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(merged.chat_model, "acme-small");
        assert_eq!(merged.temperature, Some(0.1));
        assert_eq!(merged.headers.get("X-Acme-Beta").unwrap(), "off");
    }

    #[test]
    fn merge_falls_back_to_template_defaults() {
        let template = openai_style_template();
        let user = UserConfig {
            api_key: "sk-test".into(),
            ..Default::default()
        };
        let merged = MergedConfig::new("acme", &template, &user);
        assert_eq!(merged.chat_model, "acme-large");
        assert_eq!(merged.temperature, Some(0.7));
        assert_eq!(merged.top_p, None);
        assert_eq!(merged.cache_ttl, Duration::from_secs(120));
        assert_eq!(merged.concurrency_limit, 4);
        assert_eq!(merged.embedding.as_ref().unwrap().model, "acme-embed");
    }

    #[test]
    fn merge_deep_merges_static_parameters() {
        let template = openai_style_template();
        let user = UserConfig {
            api_key: "sk-test".into(),
            static_parameters_override: json!({ "options": { "num_ctx": 4096 }, "keep_alive": "5m" }),
            ..Default::default()
        };
        let merged = MergedConfig::new("acme", &template, &user);
        assert_eq!(merged.static_parameters["options"]["seed"], json!(7));
        assert_eq!(merged.static_parameters["options"]["num_ctx"], json!(4096));
        assert_eq!(merged.static_parameters["keep_alive"], json!("5m"));
    }

    #[test]
    fn deep_merge_overlay_leaf_wins() {
        let mut base = json!({ "a": { "b": 1, "c": 2 }, "d": 3 });
        deep_merge(&mut base, &json!({ "a": { "b": 9 }, "e": 4 }));
        assert_eq!(base, json!({ "a": { "b": 9, "c": 2 }, "d": 3, "e": 4 }));
    }

    #[test]
    fn deep_merge_replaces_mismatched_shapes() {
        let mut base = json!({ "a": { "b": 1 } });
        deep_merge(&mut base, &json!({ "a": [1, 2] }));
        assert_eq!(base, json!({ "a": [1, 2] }));
    }

    #[test]
    fn user_config_defaults_from_empty_document() {
        let user: UserConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(user.concurrency_limit, 4);
        assert_eq!(user.cache_ttl_secs, 120);
        assert!(user.api_key.is_empty());
        assert!(user.static_parameters_override.as_object().unwrap().is_empty());
    }

    #[test]
    fn concurrency_limit_is_clamped_to_one() {
        let template = openai_style_template();
        let user = UserConfig {
            concurrency_limit: 0,
            ..Default::default()
        };
        let merged = MergedConfig::new("acme", &template, &user);
        assert_eq!(merged.concurrency_limit, 1);
    }
}
