use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A request for text embeddings.
#[derive(Debug, Clone, Default)]
pub struct UnifiedEmbeddingRequest {
    /// Input texts to embed, in caller order.
    pub inputs: Vec<String>,
    /// Model override. When `None`, the merged config's embedding model is used.
    pub model: Option<String>,
}

impl UnifiedEmbeddingRequest {
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(Error::InvalidArgument("inputs is empty".into()));
        }
        Ok(())
    }
}

/// One embedding vector, tagged with the position of the input it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub index: usize,
    pub vector: Vec<f32>,
}

/// An embeddings response; `data[i].index == i` always holds, so the list is
/// in the original input order even when inputs contained duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedEmbeddingResponse {
    pub data: Vec<Embedding>,
}
