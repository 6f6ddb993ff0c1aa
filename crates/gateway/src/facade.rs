//! Public facade and composition root.
//!
//! [`Switchboard`] is the only type a host needs to hold. It is built once
//! at startup, is safe to share across tasks, and guards every operation
//! behind the configuration check: with no fully configured provider, calls
//! fail fast with [`Error::NotConfigured`] and perform no I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sb_domain::chat::{ChatMessage, ToolDefinition, UnifiedChatRequest, UnifiedChatResponse};
use sb_domain::config::UserConfig;
use sb_domain::embedding::{UnifiedEmbeddingRequest, UnifiedEmbeddingResponse};
use sb_domain::error::{Error, Result};
use sb_domain::stream::ChatStream;

use crate::cache::TtlCache;
use crate::chat::ChatManager;
use crate::embedding::EmbeddingManager;
use crate::executor::HttpExecutor;
use crate::semaphores::SemaphoreMap;
use crate::settings::{SettingsPersistence, SettingsStore};

pub struct Switchboard {
    settings: Arc<SettingsStore>,
    chat: ChatManager,
    embedding: EmbeddingManager,
    semaphores: Arc<SemaphoreMap>,
    /// Host-owned feature flag, independent of provider configuration.
    embedding_enabled: AtomicBool,
}

impl Switchboard {
    /// One-shot composition root: loads settings through the host's
    /// persistence layer and assembles the shared HTTP client, caches,
    /// in-flight maps, and coordinators.
    pub async fn new(persistence: Arc<dyn SettingsPersistence>) -> Result<Self> {
        let settings = Arc::new(SettingsStore::load(persistence).await?);
        let executor = Arc::new(HttpExecutor::new()?);
        let semaphores = Arc::new(SemaphoreMap::new());

        let chat = ChatManager::new(
            Arc::clone(&settings),
            Arc::clone(&executor),
            Arc::new(TtlCache::new()),
            Arc::clone(&semaphores),
        );
        let embedding = EmbeddingManager::new(
            Arc::clone(&settings),
            executor,
            Arc::new(TtlCache::new()),
            Arc::clone(&semaphores),
        );

        Ok(Self {
            settings,
            chat,
            embedding,
            semaphores,
            embedding_enabled: AtomicBool::new(true),
        })
    }

    // ── Chat ───────────────────────────────────────────────────────

    pub async fn get_completion(
        &self,
        request: UnifiedChatRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedChatResponse> {
        self.guard()?;
        self.chat.get_completion(&request, cancel).await
    }

    pub async fn stream_completion(
        &self,
        request: UnifiedChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatStream> {
        self.guard()?;
        self.chat.stream_completion(&request, cancel).await
    }

    /// Convenience wrapper for tool-calling turns.
    pub async fn get_completion_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        conversation_id: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<UnifiedChatResponse> {
        let request = UnifiedChatRequest {
            conversation_id: conversation_id.into(),
            messages,
            tools: (!tools.is_empty()).then_some(tools),
            ..Default::default()
        };
        self.get_completion(request, cancel).await
    }

    /// Batch variant; the result list is parallel to the input list and
    /// each element succeeds or fails on its own.
    pub async fn get_completions(
        &self,
        requests: Vec<UnifiedChatRequest>,
        cancel: &CancellationToken,
    ) -> Vec<Result<UnifiedChatResponse>> {
        if let Err(error) = self.guard() {
            return requests.iter().map(|_| Err(error.clone())).collect();
        }
        self.chat.get_completions(&requests, cancel).await
    }

    /// Drop cached completions for one conversation under the active
    /// provider and model. Idempotent; `Ok(false)` means nothing matched.
    pub async fn invalidate_conversation_cache(
        &self,
        conversation_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        self.guard()?;
        self.chat.invalidate_conversation(conversation_id)
    }

    // ── Embeddings ─────────────────────────────────────────────────

    pub async fn get_embeddings(
        &self,
        request: UnifiedEmbeddingRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedEmbeddingResponse> {
        if !self.is_embedding_enabled() {
            return Err(Error::EmbeddingDisabled);
        }
        self.guard()?;
        self.embedding.get_embeddings(&request, cancel).await
    }

    pub fn is_embedding_enabled(&self) -> bool {
        self.embedding_enabled.load(Ordering::Relaxed)
    }

    /// Host save handler; flips the feature flag without touching provider
    /// configuration.
    pub fn set_embedding_enabled(&self, enabled: bool) {
        self.embedding_enabled.store(enabled, Ordering::Relaxed);
    }

    // ── Configuration ──────────────────────────────────────────────

    /// Persist a user config and reload settings, so the next request
    /// observes the new values (including a changed concurrency limit).
    pub async fn write_user_config(&self, provider_id: &str, config: &UserConfig) -> Result<()> {
        self.settings.write_user_config(provider_id, config).await?;
        self.semaphores.clear();
        Ok(())
    }

    /// All known provider ids, sorted.
    pub fn provider_ids(&self) -> Vec<String> {
        self.settings.provider_ids()
    }

    fn guard(&self) -> Result<()> {
        if self.settings.is_active() {
            Ok(())
        } else {
            Err(Error::NotConfigured)
        }
    }
}
