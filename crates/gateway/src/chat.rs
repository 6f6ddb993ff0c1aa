//! Chat coordinator: the end-to-end pipeline for one chat request.
//!
//! Lookup order is cache → in-flight map → upstream. Non-streaming misses
//! coalesce onto a single upstream call per cache key; streaming misses
//! each own their connection but still write the aggregated response to the
//! cache when the stream finishes cleanly. A cache hit on a streaming call
//! is replayed as a pseudo-stream so the consumer keeps its incremental
//! interface.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use sb_domain::chat::{UnifiedChatChunk, UnifiedChatRequest, UnifiedChatResponse};
use sb_domain::error::{Error, Result};
use sb_domain::stream::ChatStream;
use sb_translate::{build_chat_request, chat_chunk_stream, parse_chat_response, ResponseAccumulator};

use crate::cache::TtlCache;
use crate::executor::{HttpExecutor, REQUEST_TIMEOUT};
use crate::inflight::InflightMap;
use crate::keys;
use crate::semaphores::SemaphoreMap;
use crate::settings::SettingsStore;

/// Streaming calls have no overall deadline, only this gap limit between
/// consecutive body chunks.
pub(crate) const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Pseudo-stream replay slice size, in characters. Fixed so that replay is
/// deterministic; slicing walks char boundaries, never bytes.
const PSEUDO_STREAM_SLICE_CHARS: usize = 48;

pub struct ChatManager {
    settings: Arc<SettingsStore>,
    executor: Arc<HttpExecutor>,
    cache: Arc<TtlCache<UnifiedChatResponse>>,
    inflight: Arc<InflightMap<UnifiedChatResponse>>,
    semaphores: Arc<SemaphoreMap>,
}

impl ChatManager {
    pub fn new(
        settings: Arc<SettingsStore>,
        executor: Arc<HttpExecutor>,
        cache: Arc<TtlCache<UnifiedChatResponse>>,
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

    /// Non-streaming completion: cache hit, in-flight join, or fresh
    /// upstream call (which populates the cache on success).
    pub async fn get_completion(
        &self,
        request: &UnifiedChatRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedChatResponse> {
        request.validate()?;
        let cfg = self.settings.merged_active()?;
        let key = keys::chat_cache_key(&cfg, request);

        if let Some(hit) = self.cache.try_get(&key) {
            tracing::debug!(provider = %cfg.provider_id, "chat cache hit");
            return Ok(hit);
        }

        let work = {
            let executor = Arc::clone(&self.executor);
            let cache = Arc::clone(&self.cache);
            let semaphore = self
                .semaphores
                .for_provider(&cfg.provider_id, cfg.concurrency_limit);
            let cfg = Arc::clone(&cfg);
            let request = request.clone();
            let key = key.clone();
            async move {
                // The permit is taken inside the shared work, so callers
                // that coalesce onto it never consume one.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Cancelled)?;

                tracing::debug!(provider = %cfg.provider_id, model = %cfg.chat_model, "chat request");
                let provider_request = build_chat_request(&cfg, &request, false);
                // The shared call outlives any single waiter; waiters cancel
                // their await, never the upstream request itself.
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
                let unified = parse_chat_response(&cfg.response_paths, &body)?;
                cache.set(key, unified.clone(), cfg.cache_ttl);
                Ok(unified)
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.inflight.join_or_run(&key, work) => result,
        }
    }

    /// Streaming completion. A cache hit replays as a pseudo-stream without
    /// any I/O; a miss opens an SSE connection and forwards chunks while
    /// aggregating them for the cache.
    pub async fn stream_completion(
        &self,
        request: &UnifiedChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatStream> {
        request.validate()?;
        let cfg = self.settings.merged_active()?;
        let key = keys::chat_cache_key(&cfg, request);

        if let Some(hit) = self.cache.try_get(&key) {
            tracing::debug!(provider = %cfg.provider_id, "chat cache hit, replaying as pseudo-stream");
            return Ok(pseudo_stream(hit));
        }

        let semaphore = self
            .semaphores
            .for_provider(&cfg.provider_id, cfg.concurrency_limit);
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = semaphore.acquire_owned() => permit.map_err(|_| Error::Cancelled)?,
        };

        tracing::debug!(provider = %cfg.provider_id, model = %cfg.chat_model, "chat stream request");
        let provider_request = build_chat_request(&cfg, request, true);
        let response = self
            .executor
            .execute(&provider_request, &cfg.retry, None, cancel)
            .await?;

        let chunks = chat_chunk_stream(response, cfg.response_paths.clone(), INACTIVITY_TIMEOUT);
        Ok(forward_stream(
            chunks,
            Arc::clone(&self.cache),
            key,
            cfg.cache_ttl,
            cancel.clone(),
            permit,
        ))
    }

    /// Batch variant: every request goes through the normal pipeline; the
    /// per-provider semaphore bounds how many are upstream at once, and one
    /// failure never aborts its siblings.
    pub async fn get_completions(
        &self,
        requests: &[UnifiedChatRequest],
        cancel: &CancellationToken,
    ) -> Vec<Result<UnifiedChatResponse>> {
        futures_util::future::join_all(
            requests
                .iter()
                .map(|request| self.get_completion(request, cancel)),
        )
        .await
    }

    /// Drop every cached entry for one conversation under the active
    /// provider and model. Idempotent; the bool reports whether anything
    /// was actually removed.
    pub fn invalidate_conversation(&self, conversation_id: &str) -> Result<bool> {
        if conversation_id.is_empty() {
            return Err(Error::InvalidArgument("conversation_id is empty".into()));
        }
        let cfg = self.settings.merged_active()?;
        let prefix = keys::conversation_prefix(&cfg, conversation_id);
        let removed = self.cache.invalidate_prefix(&prefix);
        tracing::debug!(provider = %cfg.provider_id, removed, "conversation cache invalidated");
        Ok(removed > 0)
    }
}

/// Replay a cached response as a deterministic chunk sequence: fixed-size
/// character slices, then one terminal chunk with the cached finish reason
/// and tool calls. Concatenating the deltas always reproduces the cached
/// content exactly.
fn pseudo_stream(response: UnifiedChatResponse) -> ChatStream {
    Box::pin(async_stream::stream! {
        let UnifiedChatResponse { content, finish_reason, tool_calls } = response;

        let mut slice = String::new();
        let mut count = 0usize;
        for ch in content.chars() {
            slice.push(ch);
            count += 1;
            if count == PSEUDO_STREAM_SLICE_CHARS {
                yield Ok(UnifiedChatChunk {
                    content_delta: Some(std::mem::take(&mut slice)),
                    ..Default::default()
                });
                count = 0;
            }
        }
        if !slice.is_empty() {
            yield Ok(UnifiedChatChunk {
                content_delta: Some(slice),
                ..Default::default()
            });
        }

        yield Ok(UnifiedChatChunk {
            content_delta: None,
            finish_reason: Some(finish_reason),
            tool_calls,
        });
    })
}

/// Forward provider chunks to the consumer while rebuilding the complete
/// response. Only a cleanly finished stream (terminal chunk seen) writes to
/// the cache; cancellations, truncations, and mid-stream failures never do.
/// The semaphore permit is held until the stream ends or is dropped.
fn forward_stream(
    inner: ChatStream,
    cache: Arc<TtlCache<UnifiedChatResponse>>,
    key: String,
    ttl: Duration,
    cancel: CancellationToken,
    permit: OwnedSemaphorePermit,
) -> ChatStream {
    Box::pin(async_stream::stream! {
        let _permit = permit;
        let mut inner = inner;
        let mut accumulator = Some(ResponseAccumulator::default());

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    yield Err(Error::Cancelled);
                    return;
                }
                item = inner.next() => item,
            };

            match item {
                Some(Ok(chunk)) => {
                    if let Some(acc) = accumulator.as_mut() {
                        acc.push(&chunk);
                    }
                    let terminal = chunk.finish_reason.is_some();
                    yield Ok(chunk);
                    if terminal {
                        if let Some(response) = accumulator.take().and_then(ResponseAccumulator::finish) {
                            cache.set(key.clone(), response, ttl);
                        }
                        return;
                    }
                }
                Some(Err(error)) => {
                    yield Err(error);
                    return;
                }
                None => return,
            }
        }
    })
}
