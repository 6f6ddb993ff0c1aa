//! Switchboard: a provider-agnostic LLM gateway library.
//!
//! The host hands the composition root ([`Switchboard::new`]) a
//! [`SettingsPersistence`] implementation and gets back a thread-safe facade
//! for chat completions (streaming or not) and text embeddings. Everything
//! provider-specific is declared in JSON templates; the gateway supplies the
//! short-lived result cache, in-flight de-duplication, retries, bounded
//! concurrency, and cancellation.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use sb_gateway::{DirSettings, Switchboard};
//! use sb_domain::chat::{ChatMessage, UnifiedChatRequest};
//!
//! # async fn run() -> sb_domain::Result<()> {
//! let settings = Arc::new(DirSettings::new("/etc/myapp/llm"));
//! let gateway = Switchboard::new(settings).await?;
//!
//! let request = UnifiedChatRequest {
//!     conversation_id: "thread-1".into(),
//!     messages: vec![ChatMessage::user("ping")],
//!     ..Default::default()
//! };
//! let response = gateway.get_completion(request, &CancellationToken::new()).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod chat;
pub mod embedding;
pub mod executor;
pub mod facade;
pub mod inflight;
pub mod keys;
pub mod semaphores;
pub mod settings;

pub use facade::Switchboard;
pub use settings::{DirSettings, SettingsDocument, SettingsPersistence, SettingsStore};
