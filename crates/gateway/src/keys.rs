//! Cache key construction.
//!
//! Keys must be deterministic across processes and must never contain API
//! keys or header values. Chat keys scope to provider, model, and a hashed
//! conversation id:
//!
//! ```text
//! chat:{provider}:{model}:conv:{sha256(conversation_id)[..16]}:{payload_hash}
//! embed:{provider}:{model}:{sha256(normalized_input)}
//! ```
//!
//! The chat payload hash covers a canonical serialization of everything
//! that changes the provider's answer (messages, tools, sampling
//! parameters, JSON-mode flag, merged static parameters) and deliberately
//! excludes the stream flag, so streaming and non-streaming renditions of
//! the same question share one entry. Canonical means `serde_json`'s
//! default sorted object keys; nothing here depends on insertion order.

use serde_json::json;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use sb_domain::chat::UnifiedChatRequest;
use sb_domain::config::MergedConfig;

/// Key for one chat request under the given merged config.
pub fn chat_cache_key(cfg: &MergedConfig, req: &UnifiedChatRequest) -> String {
    let payload = json!({
        "messages": req.messages,
        "tools": req.tools,
        "forceJsonOutput": req.force_json_output,
        "temperature": req.temperature.or(cfg.temperature),
        "topP": req.top_p.or(cfg.top_p),
        "maxTokens": req.max_tokens.or(cfg.max_tokens),
        "staticParameters": cfg.static_parameters,
    });
    format!(
        "{}{}",
        conversation_prefix(cfg, &req.conversation_id),
        sha256_hex(&payload.to_string())
    )
}

/// Everything cached for one conversation under the given provider/model
/// starts with this prefix; conversation invalidation deletes by it.
pub fn conversation_prefix(cfg: &MergedConfig, conversation_id: &str) -> String {
    format!(
        "chat:{}:{}:conv:{}:",
        cfg.provider_name,
        cfg.chat_model,
        &sha256_hex(conversation_id)[..16]
    )
}

/// Key for one embedding input. `normalized` must already have passed
/// through [`normalize_input`].
pub fn embedding_cache_key(cfg: &MergedConfig, model: &str, normalized: &str) -> String {
    format!(
        "embed:{}:{}:{}",
        cfg.provider_name,
        model,
        sha256_hex(normalized)
    )
}

/// In-flight coalescing key for one embedding batch: two concurrent
/// requests for the same set of inputs share one upstream call.
pub fn embedding_batch_key(input_keys: &[String]) -> String {
    format!("embed-batch:{}", sha256_hex(&input_keys.join("\n")))
}

/// Normalization applied to embedding inputs before hashing and
/// de-duplication: Unicode NFC, then trim. The provider still receives the
/// original text; this only defines cache identity.
pub fn normalize_input(text: &str) -> String {
    let composed: String = text.nfc().collect();
    composed.trim().to_string()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}
