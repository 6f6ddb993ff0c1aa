//! Shared harness for gateway integration tests: a Switchboard wired to a
//! temp settings directory whose template points at a wiremock server.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use sb_gateway::{DirSettings, Switchboard};

pub struct Harness {
    pub gateway: Arc<Switchboard>,
    _settings_dir: TempDir,
}

/// An OpenAI-compatible template aimed at the stub server, with fast retry
/// delays so tests stay quick.
pub fn stub_template(server_uri: &str) -> Value {
    json!({
        "providerName": "stub",
        "http": { "authHeader": "Authorization", "authScheme": "Bearer" },
        "chatApi": {
            "endpoint": format!("{server_uri}/v1/chat/completions"),
            "defaultModel": "stub-model",
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
            }
        },
        "embeddingApi": {
            "endpoint": format!("{server_uri}/v1/embeddings"),
            "defaultModel": "stub-embed",
            "maxBatchSize": 10,
            "requestPaths": { "model": "model", "input": "input" },
            "responsePaths": { "dataList": "data", "embedding": "embedding", "index": "index" }
        },
        "retry": { "maxAttempts": 3, "initialDelayMs": 10, "maxDelayMs": 200 }
    })
}

pub async fn gateway_for(server_uri: &str) -> Harness {
    gateway_custom(stub_template(server_uri), json!({ "apiKey": "sk-test" })).await
}

pub async fn gateway_custom(template: Value, user_config: Value) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("templates")).unwrap();
    std::fs::create_dir_all(dir.path().join("configs")).unwrap();
    std::fs::write(
        dir.path().join("templates/stub.json"),
        serde_json::to_string_pretty(&template).unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("configs/stub.json"),
        serde_json::to_string_pretty(&user_config).unwrap(),
    )
    .unwrap();

    let gateway = Switchboard::new(Arc::new(DirSettings::new(dir.path())))
        .await
        .unwrap();
    Harness {
        gateway: Arc::new(gateway),
        _settings_dir: dir,
    }
}
