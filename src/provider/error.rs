//! Provider error types with retry classification.
//!
//! Distinguishes between transient errors (should retry) and permanent
//! errors (should not retry). Context overflow is its own class: it is never
//! retried here, the agent layer compacts the history and retries once.

use std::time::Duration;

/// Error from LLM provider calls.
#[derive(Debug, Clone)]
pub struct LlmError {
    /// The kind of error
    pub kind: LlmErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
    /// Suggested retry delay (from Retry-After header or calculated)
    pub retry_after: Option<Duration>,
}

impl LlmError {
    /// Create a rate limit error.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: LlmErrorKind::RateLimited,
            status_code: Some(429),
            message: message.into(),
            retry_after,
        }
    }

    /// Create a server error.
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ServerError,
            status_code: Some(status_code),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a client error (bad request, unsupported model, etc.).
    pub fn client_error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ClientError,
            status_code: Some(status_code),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create an authentication error.
    pub fn auth_error(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::AuthError,
            status_code: Some(401),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a network error.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::NetworkError,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a response parse error.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ParseError,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a context overflow error.
    pub fn context_overflow(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ContextOverflow,
            status_code: Some(400),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Check if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Get the suggested delay before retry.
    ///
    /// Returns the `retry_after` if set, otherwise exponential backoff with
    /// jitter based on error kind and attempt number.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }

        let base_delay = match self.kind {
            LlmErrorKind::RateLimited => Duration::from_secs(5),
            LlmErrorKind::ServerError => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        };

        let multiplier = 2u64.saturating_pow(attempt);
        let delay_secs = base_delay.as_secs().saturating_mul(multiplier);

        // Up to 25% jitter, then capped at 60 seconds total.
        let jitter_range = delay_secs / 4;
        let jitter = if jitter_range > 0 {
            rand::random::<u64>() % jitter_range
        } else {
            0
        };

        Duration::from_secs((delay_secs + jitter).min(60))
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Classification of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Rate limited (429) - transient, retried with backoff
    RateLimited,
    /// Server error (500, 502, 503, 504) - transient, retried
    ServerError,
    /// Network error (connection failed, timeout) - transient, retried
    NetworkError,
    /// Client error (bad request, unsupported model) - permanent
    ClientError,
    /// Authentication failure (401, 403) - permanent
    AuthError,
    /// The prompt exceeds the model's context window - handled by compaction
    ContextOverflow,
    /// Response parsing error - permanent
    ParseError,
}

impl LlmErrorKind {
    /// Check if this error kind is transient (should retry).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmErrorKind::RateLimited => write!(f, "Rate limited"),
            LlmErrorKind::ServerError => write!(f, "Server error"),
            LlmErrorKind::NetworkError => write!(f, "Network error"),
            LlmErrorKind::ClientError => write!(f, "Client error"),
            LlmErrorKind::AuthError => write!(f, "Auth error"),
            LlmErrorKind::ContextOverflow => write!(f, "Context overflow"),
            LlmErrorKind::ParseError => write!(f, "Parse error"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Maximum total time to spend retrying
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Check if the given error should be retried under this config.
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_transient()
    }
}

/// Parse an HTTP status code into an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        401 | 403 => LlmErrorKind::AuthError,
        500 | 502 | 503 | 504 => LlmErrorKind::ServerError,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}
