//! Retry wrapper for transient provider failures.

use std::future::Future;
use std::time::Instant;

use super::error::{LlmError, RetryConfig};

/// Run `op` with capped exponential backoff on transient errors.
///
/// Non-transient errors propagate immediately. The total retry budget is
/// bounded by both `max_retries` and `max_retry_duration`.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !config.should_retry(&error, attempt) {
                    return Err(error);
                }
                let delay = error.suggested_delay(attempt);
                if started.elapsed() + delay > config.max_retry_duration {
                    tracing::warn!(error = %error, "retry budget exhausted");
                    return Err(error);
                }
                attempt += 1;
                tracing::warn!(
                    error = %error,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Provider wrapper applying [`with_retry`] to every call.
pub struct RetryingProvider<P> {
    inner: P,
    config: RetryConfig,
}

impl<P: super::LlmProvider> RetryingProvider<P> {
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait::async_trait]
impl<P: super::LlmProvider> super::LlmProvider for RetryingProvider<P> {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(
        &self,
        messages: &[crate::schema::Message],
        options: &super::GenerateOptions,
    ) -> Result<String, LlmError> {
        with_retry(&self.config, || self.inner.generate(messages, options)).await
    }

    async fn generate_stream(
        &self,
        messages: &[crate::schema::Message],
        options: &super::GenerateOptions,
    ) -> Result<super::TextStream, LlmError> {
        // the stream itself is not restartable; only its start is retried
        with_retry(&self.config, || self.inner.generate_stream(messages, options)).await
    }

    async fn generate_stream_response(
        &self,
        messages: &[crate::schema::Message],
        options: &super::GenerateOptions,
    ) -> Result<super::LlmResponse, LlmError> {
        with_retry(&self.config, || {
            self.inner.generate_stream_response(messages, options)
        })
        .await
    }

    fn cost(&self) -> super::CostRecord {
        self.inner.cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(300),
        };
        let result = with_retry(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::network_error("reset").clone_with_zero_delay())
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<(), _> = with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::auth_error("bad key")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    impl LlmError {
        fn clone_with_zero_delay(mut self) -> Self {
            self.retry_after = Some(Duration::from_millis(0));
            self
        }
    }
}
