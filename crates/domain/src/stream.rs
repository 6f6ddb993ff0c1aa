use std::pin::Pin;

use crate::chat::UnifiedChatChunk;
use crate::error::Result;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The chunk stream handed to streaming chat consumers.
///
/// A failure mid-stream is delivered as one final `Err` element; chunks
/// already emitted are not retracted.
pub type ChatStream = BoxStream<'static, Result<UnifiedChatChunk>>;
