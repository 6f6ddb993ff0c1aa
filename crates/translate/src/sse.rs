//! SSE plumbing for streaming chat responses.
//!
//! The provider body arrives as arbitrary byte chunks; an [`EventBuffer`]
//! reframes them into complete events (blank-line delimited, `data:` lines
//! only), and [`chat_chunk_stream`] drives a [`StreamCollector`] over the
//! payloads to produce the unified chunk stream handed to the consumer.
//!
//! Stream-ending rules:
//! - `data: [DONE]` → emit the terminal chunk (finish reason + tool calls)
//!   and finish cleanly.
//! - body ends without `[DONE]` → emit whatever decoded, then one
//!   [`Error::StreamTruncated`].
//! - no bytes for the inactivity window → [`Error::Timeout`].

use std::time::Duration;

use sb_domain::config::ChatResponsePaths;
use sb_domain::error::Error;
use sb_domain::stream::ChatStream;

use crate::chat_response::StreamCollector;

/// Rolling reframing buffer for an SSE body.
///
/// Byte chunks land wherever the transport cuts them; events only exist
/// once a blank-line delimiter has arrived. `event:`, `id:`, and `retry:`
/// lines are dropped; an event with several `data:` lines yields one
/// payload with the lines joined by a newline, per the SSE framing rules.
struct EventBuffer {
    pending: String,
}

impl EventBuffer {
    fn new() -> Self {
        Self {
            pending: String::new(),
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Pop the next complete event's payload, or `None` until one is fully
    /// buffered. Events carrying no `data:` line at all are skipped.
    fn next_payload(&mut self) -> Option<String> {
        while let Some(end) = self.pending.find("\n\n") {
            let block: String = self.pending.drain(..end + 2).collect();
            if let Some(payload) = event_payload(&block) {
                return Some(payload);
            }
        }
        None
    }

    /// Treat whatever remains as one final, unterminated event. Called when
    /// the body closes.
    fn flush(&mut self) -> Option<String> {
        let block = std::mem::take(&mut self.pending);
        event_payload(&block)
    }
}

/// Join the `data:` lines of one event block into its payload.
fn event_payload(block: &str) -> Option<String> {
    let data_lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .collect();
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

/// Decode a provider SSE response into a stream of unified chunks.
///
/// Chunks are yielded in provider order. The consumer drives pace and can
/// cancel by dropping the stream; dropping before the terminal chunk counts
/// as failure upstream (the coordinator only caches cleanly finished
/// streams).
pub fn chat_chunk_stream(
    response: reqwest::Response,
    paths: ChatResponsePaths,
    inactivity_timeout: Duration,
) -> ChatStream {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = EventBuffer::new();
        let mut collector = StreamCollector::new(paths);

        loop {
            let next = tokio::time::timeout(inactivity_timeout, response.chunk()).await;
            match next {
                Err(_) => {
                    yield Err(Error::Timeout(format!(
                        "no stream activity for {}s",
                        inactivity_timeout.as_secs()
                    )));
                    return;
                }
                Ok(Err(error)) => {
                    yield Err(Error::Network(error.to_string()));
                    return;
                }
                Ok(Ok(Some(bytes))) => {
                    buffer.extend(&bytes);
                    while let Some(payload) = buffer.next_payload() {
                        if let Some(chunk) = collector.handle_event(&payload) {
                            yield Ok(chunk);
                        }
                        if collector.is_done() {
                            yield Ok(collector.terminal_chunk());
                            return;
                        }
                    }
                }
                Ok(Ok(None)) => {
                    // Body closed; a trailing block without its blank-line
                    // delimiter still counts as one last event.
                    if let Some(payload) = buffer.flush() {
                        if let Some(chunk) = collector.handle_event(&payload) {
                            yield Ok(chunk);
                        }
                    }
                    if collector.is_done() {
                        yield Ok(collector.terminal_chunk());
                    } else {
                        yield Err(Error::StreamTruncated(
                            "stream ended before [DONE]".into(),
                        ));
                    }
                    return;
                }
            }
        }
    };

    Box::pin(stream)
}
