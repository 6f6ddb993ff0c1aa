//! Embedding request/response translation.

use serde_json::{json, Value};

use sb_domain::config::{MergedConfig, MergedEmbedding};
use sb_domain::embedding::Embedding;
use sb_domain::error::{Error, Result};

use crate::chat_request::{build_headers, ProviderRequest};
use crate::path::{get_path, set_path};

/// Build the provider embedding request for one batch of inputs.
///
/// `model` is the effective model (request override already applied by the
/// coordinator). Inputs are sent verbatim; normalization only affects cache
/// identity, never the wire.
pub fn build_embedding_request(
    cfg: &MergedConfig,
    embedding: &MergedEmbedding,
    model: &str,
    inputs: &[String],
) -> ProviderRequest {
    let mut body = json!({});
    set_path(&mut body, &embedding.request_paths.model, json!(model));
    set_path(&mut body, &embedding.request_paths.input, json!(inputs));

    ProviderRequest {
        url: embedding.endpoint.clone(),
        headers: build_headers(cfg),
        body,
    }
}

/// Decode a provider embedding response into vectors sorted by the
/// provider's batch index.
///
/// The returned indices are positions within the *sent batch*; the
/// coordinator maps them back to original request positions.
pub fn parse_embedding_response(embedding: &MergedEmbedding, body: &Value) -> Result<Vec<Embedding>> {
    let paths = &embedding.response_paths;
    let entries = get_path(body, &paths.data_list)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidResponse(format!("no data array at '{}'", paths.data_list)))?;

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let index = get_path(entry, &paths.index)
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::InvalidResponse(format!("missing index at '{}'", paths.index)))?;
        let vector = get_path(entry, &paths.embedding)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                Error::InvalidResponse(format!("missing embedding at '{}'", paths.embedding))
            })?
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    Error::InvalidResponse("non-numeric embedding component".into())
                })
            })
            .collect::<Result<Vec<f32>>>()?;
        out.push(Embedding {
            index: index as usize,
            vector,
        });
    }

    out.sort_by_key(|e| e.index);
    Ok(out)
}
