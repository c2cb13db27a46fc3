//! Bounded retry with backoff, as a wrapper around any metadata source
//!
//! The orchestrator never retries on its own. Callers that want retries wrap
//! their source:
//!
//! ```rust,ignore
//! let source = RetryingSource::new(SpannerSource::new(query_set), RetryPolicy::from_config(&retry));
//! ```

use spanmeta_catalog::{ExtractError, MetadataSource};
use spanmeta_core::{MetadataRow, RetryConfig, Target};
use std::time::Duration;

/// Exponential backoff policy for transient extraction errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// Single attempt
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Source that retries transient failures of an inner source
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: MetadataSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait::async_trait]
impl<S: MetadataSource> MetadataSource for RetryingSource<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn extract(&self, target: &Target) -> Result<Vec<MetadataRow>, ExtractError> {
        let mut attempt = 1;

        loop {
            match self.inner.extract(target).await {
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    tracing::warn!(
                        database = %target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "extraction failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spanmeta_catalog::{mock::sample_table_rows, MockSource};

    fn target() -> Target {
        Target::new("project-one", "i1", "d1")
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(350));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts(), 1);
        assert_eq!(RetryPolicy::default().max_attempts(), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let mock = MockSource::new();
        mock.add_rows(&target(), sample_table_rows("Singers")).await;
        mock.fail_first(&target(), 2, ExtractError::ConnectionError("connection reset".into()))
            .await;

        let source = RetryingSource::new(mock.clone(), fast(3));
        assert_eq!(source.name(), "Mock");
        assert_eq!(source.extract(&target()).await.unwrap().len(), 2);
        assert_eq!(mock.call_count(&target()).await, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mock = MockSource::new();
        mock.add_error(&target(), ExtractError::ConnectionError("connection reset".into()))
            .await;

        let source = RetryingSource::new(mock.clone(), fast(2));
        assert!(source.extract(&target()).await.is_err());
        assert_eq!(mock.call_count(&target()).await, 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let mock = MockSource::new();
        mock.add_error(&target(), ExtractError::query("TABLES", "status: PermissionDenied"))
            .await;

        let source = RetryingSource::new(mock.clone(), fast(4));
        assert!(source.extract(&target()).await.is_err());
        assert_eq!(mock.call_count(&target()).await, 1);
    }

    #[tokio::test]
    async fn single_attempt_policy_passes_through() {
        let mock = MockSource::new();
        mock.fail_first(&target(), 1, ExtractError::ConnectionError("connection reset".into()))
            .await;

        let source = RetryingSource::new(mock.clone(), RetryPolicy::none());
        assert!(source.extract(&target()).await.is_err());
        assert_eq!(source.inner().call_count(&target()).await, 1);
    }
}
