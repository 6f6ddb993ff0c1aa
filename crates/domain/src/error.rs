/// Shared error type used across all Switchboard crates.
///
/// One variant per failure kind; context (endpoint, HTTP status, retry
/// hints) lives in fields rather than in a type hierarchy. The enum is
/// `Clone` because a coalesced in-flight result is shared between waiters.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// No provider has a valid template and a usable API key.
    #[error("Framework is not configured")]
    NotConfigured,

    #[error("unknown provider '{provider}'")]
    ConfigurationMissing { provider: String },

    #[error("invalid template '{file}', field '{field}': {message}")]
    ConfigurationInvalid {
        file: String,
        field: String,
        message: String,
    },

    #[error("provider '{provider}' configuration is missing '{field}'")]
    ConfigurationIncomplete { provider: String, field: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("network: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// HTTP 429, split out from [`Error::Http`] so the host can show a
    /// dedicated message and the executor can honor `Retry-After`.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    /// HTTP 401/403.
    #[error("authentication failed (HTTP {status}): {message}")]
    AuthFailed { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The SSE body ended before the `[DONE]` sentinel.
    #[error("stream truncated: {0}")]
    StreamTruncated(String),

    #[error("Embedding is disabled by settings")]
    EmbeddingDisabled,

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the HTTP executor may retry after this failure.
    ///
    /// Network faults, timeouts, 408, 429, and 5xx are transient; every
    /// other kind is either a caller bug or a configuration problem that
    /// retrying cannot fix.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) | Error::RateLimited { .. } => true,
            Error::Http { status, .. } => *status == 408 || (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Mask substrings that look like API keys or bearer tokens in a message.
/// Applied before any error text reaches a log line or the host UI, so raw
/// secrets never leak out of the in-memory config.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}
