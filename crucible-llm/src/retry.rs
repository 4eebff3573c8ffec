//! Bounded retry of transient gateway failures.

use crate::GatewayResult;
use crucible_core::RetryConfig;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Retries an operation while it fails with a transient error.
///
/// Non-transient failures (timeouts, missing models, bad responses) are
/// returned on the first attempt.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Policy that runs the operation exactly once.
    pub fn none() -> Self {
        Self::new(RetryConfig::disabled())
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying up to `max_retries` times with exponential
    /// backoff between attempts.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, operation: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        self.run(operation_name, None, operation).await
    }

    /// Like [`execute`](Self::execute), but a fired `cancel` token ends the
    /// backoff wait and returns the last failure. An attempt already in
    /// flight is never interrupted.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        self.run(operation_name, Some(cancel), operation).await
    }

    async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for_attempt(attempt);
                    attempt += 1;
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient gateway failure, retrying"
                    );
                    match cancel {
                        Some(token) => tokio::select! {
                            _ = token.cancelled() => {
                                tracing::debug!(
                                    operation = operation_name,
                                    attempt,
                                    "Retry abandoned after cancellation"
                                );
                                return Err(err);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Shorthand for `RetryPolicy::new(config.clone()).execute(..)`.
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    RetryPolicy::new(config.clone())
        .execute(operation_name, operation)
        .await
}
