//! Policy-based retries
//!
//! Bounded exponential backoff with jitter. Server hints (`Retry-After`)
//! take precedence over the computed delay, still capped by `max_delay`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::GatewayError;

/// When and how long to wait before trying a failed operation again.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Relative jitter applied to each computed delay; `0.0` disables it.
    pub jitter: f64,
    /// Errors that are worth another attempt.
    pub retry_on: fn(&GatewayError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
            retry_on: GatewayError::is_retryable,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new()
            .with_max_attempts(config.max_attempts)
            .with_initial_delay(Duration::from_millis(config.initial_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_jitter(config.jitter)
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy used by the router: only throttling is retried, since a
    /// handshake transport failure may already have reached the provider.
    pub fn rate_limit_only() -> Self {
        Self::default().with_retry_condition(|e| matches!(e, GatewayError::RateLimited { .. }))
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Toggle the default 10% jitter.
    pub const fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = if enabled { 0.1 } else { 0.0 };
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter = factor.clamp(0.0, 1.0);
        self
    }

    pub fn with_retry_condition(mut self, condition: fn(&GatewayError) -> bool) -> Self {
        self.retry_on = condition;
        self
    }

    pub fn should_retry(&self, error: &GatewayError) -> bool {
        (self.retry_on)(error)
    }

    /// Backoff before retry number `attempt + 1` (0-based), capped and
    /// jittered.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        if self.jitter <= 0.0 || capped <= 0.0 {
            return Duration::from_millis(capped as u64);
        }
        let spread = capped * self.jitter;
        let jittered = capped + rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(jittered.max(0.0) as u64)
    }

    /// Delay before the next attempt, honoring a server hint when present.
    pub fn delay_for(&self, error: &GatewayError, attempt: u32) -> Duration {
        error
            .retry_after()
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or_else(|| self.calculate_delay(attempt))
    }
}

/// Runs an operation under a `RetryPolicy`.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `operation` until it succeeds, fails with an error the policy
    /// does not retry, or runs out of attempts. The last error is returned.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if attempt + 1 >= max_attempts || !self.policy.should_retry(&error) {
                return Err(error);
            }
            let delay = self.policy.delay_for(&error, attempt);
            tracing::debug!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
