//! Embedding coordinator.
//!
//! Inputs are normalized and de-duplicated first, then probed against the
//! per-input cache; only the misses go upstream, chunked to the template's
//! batch limit and dispatched concurrently under the provider semaphore.
//! Results always come back in the original input order, duplicates
//! sharing one vector.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sb_domain::embedding::{Embedding, UnifiedEmbeddingRequest, UnifiedEmbeddingResponse};
use sb_domain::error::{Error, Result};
use sb_translate::{build_embedding_request, parse_embedding_response};

use crate::cache::TtlCache;
use crate::executor::{HttpExecutor, REQUEST_TIMEOUT};
use crate::inflight::InflightMap;
use crate::keys;
use crate::semaphores::SemaphoreMap;
use crate::settings::SettingsStore;

pub struct EmbeddingManager {
    settings: Arc<SettingsStore>,
    executor: Arc<HttpExecutor>,
    cache: Arc<TtlCache<Vec<f32>>>,
    inflight: Arc<InflightMap<Vec<Vec<f32>>>>,
    semaphores: Arc<SemaphoreMap>,
}

impl EmbeddingManager {
    pub fn new(
        settings: Arc<SettingsStore>,
        executor: Arc<HttpExecutor>,
        cache: Arc<TtlCache<Vec<f32>>>,
        semaphores: Arc<SemaphoreMap>,
    ) -> Self {
        Self {
            settings,
            executor,
            cache,
            inflight: Arc::new(InflightMap::new()),
            semaphores,
        }
    }

    pub async fn get_embeddings(
        &self,
        request: &UnifiedEmbeddingRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedEmbeddingResponse> {
        request.validate()?;
        let cfg = self.settings.merged_active()?;
        let embedding_cfg = cfg
            .embedding
            .clone()
            .ok_or_else(|| Error::ConfigurationIncomplete {
                provider: cfg.provider_id.clone(),
                field: "embeddingApi".into(),
            })?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| embedding_cfg.model.clone());

        let normalized: Vec<String> = request
            .inputs
            .iter()
            .map(|text| keys::normalize_input(text))
            .collect();
        let (slot_of_input, representatives) = assign_slots(&normalized);

        // One cache key and at most one upstream computation per unique
        // normalized input.
        let unique_keys: Vec<String> = representatives
            .iter()
            .map(|&input| keys::embedding_cache_key(&cfg, &model, &normalized[input]))
            .collect();
        let mut vectors: Vec<Option<Vec<f32>>> = unique_keys
            .iter()
            .map(|key| self.cache.try_get(key))
            .collect();

        let miss_slots: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(slot, _)| slot)
            .collect();

        if !miss_slots.is_empty() {
            tracing::debug!(
                provider = %cfg.provider_id,
                inputs = request.inputs.len(),
                unique = representatives.len(),
                misses = miss_slots.len(),
                "embedding fan-out"
            );

            let batches = miss_slots
                .chunks(embedding_cfg.max_batch_size)
                .map(<[usize]>::to_vec);
            let futures = batches.map(|batch| {
                let inputs: Vec<String> = batch
                    .iter()
                    .map(|&slot| request.inputs[representatives[slot]].clone())
                    .collect();
                let batch_keys: Vec<String> =
                    batch.iter().map(|&slot| unique_keys[slot].clone()).collect();
                let inflight_key = keys::embedding_batch_key(&batch_keys);

                let work = {
                    let executor = Arc::clone(&self.executor);
                    let cache = Arc::clone(&self.cache);
                    let semaphore = self
                        .semaphores
                        .for_provider(&cfg.provider_id, cfg.concurrency_limit);
                    let cfg = Arc::clone(&cfg);
                    let embedding_cfg = embedding_cfg.clone();
                    let model = model.clone();
                    async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| Error::Cancelled)?;

                        let provider_request =
                            build_embedding_request(&cfg, &embedding_cfg, &model, &inputs);
                        let response = executor
                            .execute(
                                &provider_request,
                                &cfg.retry,
                                Some(REQUEST_TIMEOUT),
                                &CancellationToken::new(),
                            )
                            .await?;
                        let body: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|error| Error::InvalidResponse(error.to_string()))?;
                        let parsed = parse_embedding_response(&embedding_cfg, &body)?;
                        if parsed.len() != inputs.len() {
                            return Err(Error::InvalidResponse(format!(
                                "sent {} inputs, got {} embeddings",
                                inputs.len(),
                                parsed.len()
                            )));
                        }
                        let vectors: Vec<Vec<f32>> =
                            parsed.into_iter().map(|entry| entry.vector).collect();
                        for (key, vector) in batch_keys.iter().zip(&vectors) {
                            cache.set(key.clone(), vector.clone(), cfg.cache_ttl);
                        }
                        Ok(vectors)
                    }
                };

                let inflight = Arc::clone(&self.inflight);
                async move {
                    let batch_vectors = inflight.join_or_run(&inflight_key, work).await?;
                    Ok::<_, Error>((batch, batch_vectors))
                }
            });

            let results = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                results = futures_util::future::join_all(futures) => results,
            };
            for result in results {
                let (batch, batch_vectors) = result?;
                if batch_vectors.len() != batch.len() {
                    return Err(Error::InvalidResponse(
                        "coalesced batch size mismatch".into(),
                    ));
                }
                for (slot, vector) in batch.into_iter().zip(batch_vectors) {
                    vectors[slot] = Some(vector);
                }
            }
        }

        let data = slot_of_input
            .iter()
            .enumerate()
            .map(|(index, &slot)| {
                vectors[slot]
                    .clone()
                    .map(|vector| Embedding { index, vector })
                    .ok_or_else(|| Error::InvalidResponse("missing embedding vector".into()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(UnifiedEmbeddingResponse { data })
    }
}

/// De-duplicate normalized inputs: returns, per input, the slot of its
/// unique value, and per slot the index of the first input carrying it.
fn assign_slots(normalized: &[String]) -> (Vec<usize>, Vec<usize>) {
    let mut slot_by_text: HashMap<&str, usize> = HashMap::new();
    let mut slot_of_input = Vec::with_capacity(normalized.len());
    let mut representatives = Vec::new();

    for (input, text) in normalized.iter().enumerate() {
        let slot = *slot_by_text.entry(text.as_str()).or_insert_with(|| {
            representatives.push(input);
            representatives.len() - 1
        });
        slot_of_input.push(slot);
    }
    (slot_of_input, representatives)
}
