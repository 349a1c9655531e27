//! Bounded retry with backoff around one outbound fetch

use crate::config::{BackoffKind, RetryConfig};
use crate::error::{RelayError, Result};
use crate::fetcher::{Fetcher, UpstreamRequest, UpstreamResponse};
use crate::metrics::RelayMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy for outbound fetches
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,
    /// Backoff durations in milliseconds before each retry
    pub backoff_ms: Vec<u64>,
    /// Statuses treated as transient overload
    pub transient_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// Build a policy, precomputing the backoff schedule
    ///
    /// Linear: base, 2*base, 3*base, ... Exponential: base, 2*base, 4*base, ...
    pub fn new(
        max_attempts: usize,
        base_ms: u64,
        kind: BackoffKind,
        transient_statuses: Vec<u16>,
    ) -> Self {
        let retries = max_attempts.saturating_sub(1);
        let backoff_ms = (0..retries)
            .map(|i| match kind {
                BackoffKind::Linear => base_ms.saturating_mul(i as u64 + 1),
                BackoffKind::Exponential => base_ms.saturating_mul(2u64.saturating_pow(i as u32)),
            })
            .collect();

        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff_ms,
            transient_statuses,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.backoff_base_ms,
            config.backoff,
            config.transient_statuses.clone(),
        )
    }

    pub fn is_transient_status(&self, status: u16) -> bool {
        self.transient_statuses.contains(&status)
    }

    /// Whether another attempt may follow attempt number `attempt` (0-based)
    pub fn should_retry(&self, attempt: usize, error: &RelayError) -> bool {
        attempt + 1 < self.max_attempts && error.is_transient()
    }

    /// Delay before the retry that follows attempt `attempt`
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let ms = self
            .backoff_ms
            .get(attempt)
            .copied()
            .unwrap_or_else(|| self.backoff_ms.last().copied().unwrap_or(0));
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Runs fetches under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryController {
    fetcher: Arc<dyn Fetcher>,
    policy: RetryPolicy,
    metrics: Arc<RelayMetrics>,
}

impl RetryController {
    pub fn new(fetcher: Arc<dyn Fetcher>, policy: RetryPolicy, metrics: Arc<RelayMetrics>) -> Self {
        RetryController {
            fetcher,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One attempt; transient statuses become errors so the loop can see them
    async fn try_fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        self.metrics.record_upstream_fetch();
        let response = self.fetcher.fetch(request).await?;
        let status = response.status.as_u16();
        if self.policy.is_transient_status(status) {
            return Err(RelayError::TransientStatus { status });
        }
        Ok(response)
    }

    /// Fetch with retries
    ///
    /// # Returns
    /// * `Ok(UpstreamResponse)` for the first non-transient answer, whatever
    ///   its status (success, partial content, 404, ...)
    /// * `Err(RelayError)` with the last error once attempts are exhausted
    pub async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        let mut attempt = 0;

        loop {
            match self.try_fetch(request).await {
                Ok(response) => {
                    if attempt > 0 {
                        debug!(
                            "Fetch succeeded after {} retries: url={}",
                            attempt, request.url
                        );
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if !self.policy.should_retry(attempt, &e) {
                        debug!(
                            "Giving up on url={} after {} attempts: {}",
                            request.url,
                            attempt + 1,
                            e
                        );
                        self.metrics.record_failed_fetch();
                        return Err(e);
                    }

                    let backoff = self.policy.backoff_duration(attempt);
                    warn!(
                        "Fetch failed for url={} (attempt {}/{}), retrying after {:?}: {}",
                        request.url,
                        attempt + 1,
                        self.policy.max_attempts,
                        backoff,
                        e
                    );
                    self.metrics.record_retry();
                    sleep(backoff).await;

                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_schedule() {
        let policy = RetryPolicy::new(3, 1000, BackoffKind::Linear, vec![429, 503]);
        assert_eq!(policy.backoff_ms, vec![1000, 2000]);
        assert_eq!(policy.backoff_duration(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff_duration(9), Duration::from_millis(2000));
    }

    #[test]
    fn test_exponential_schedule() {
        let policy = RetryPolicy::new(4, 100, BackoffKind::Exponential, vec![503]);
        assert_eq!(policy.backoff_ms, vec![100, 200, 400]);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::new(1, 100, BackoffKind::Linear, vec![503]);
        assert!(policy.backoff_ms.is_empty());
        assert!(!policy.should_retry(0, &RelayError::Transport("x".into())));
        assert_eq!(policy.backoff_duration(0), Duration::ZERO);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(3, 10, BackoffKind::Linear, vec![503]);
        let transport = RelayError::Transport("refused".into());
        let corrupt = RelayError::StoreError("disk full".into());

        assert!(policy.should_retry(0, &transport));
        assert!(policy.should_retry(1, &transport));
        assert!(!policy.should_retry(2, &transport));
        assert!(!policy.should_retry(0, &corrupt));
    }

    #[test]
    fn test_transient_statuses() {
        let policy = RetryPolicy::default();
        assert!(policy.is_transient_status(429));
        assert!(policy.is_transient_status(503));
        assert!(!policy.is_transient_status(500));
        assert!(!policy.is_transient_status(404));
    }
}
