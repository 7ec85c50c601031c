//! Exponential backoff retrier.
//!
//! Attempt 0 runs immediately. After a qualifying failure of attempt `n` the
//! retrier sleeps `base_delay * 2^n` and tries again, until `max_attempts`
//! retries have been spent. There is no ceiling on the delay and no jitter:
//! callers raising `max_attempts` far above the default should lower
//! `base_delay` accordingly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ApiError, Result};

/// Decides whether a failure is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&ApiError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
  /// Retries after the initial attempt
  pub max_attempts: u32,
  pub base_delay: Duration,
  qualifies: RetryPredicate,
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self {
      max_attempts,
      base_delay,
      qualifies: Arc::new(ApiError::is_transient),
    }
  }

  /// A policy that never retries.
  pub fn none() -> Self {
    Self::new(0, Duration::ZERO)
  }

  pub fn from_config(config: &RetryConfig) -> Self {
    Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
  }

  pub fn with_predicate<F>(mut self, qualifies: F) -> Self
  where
    F: Fn(&ApiError) -> bool + Send + Sync + 'static,
  {
    self.qualifies = Arc::new(qualifies);
    self
  }

  pub fn qualifies(&self, error: &ApiError) -> bool {
    (self.qualifies)(error)
  }

  /// Sleep before the retry that follows failed attempt `attempt`.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    self
      .base_delay
      .saturating_mul(2u32.saturating_pow(attempt))
  }

  /// Apply a per-call override on top of this policy.
  pub fn merge(&self, overrides: &RetryOverride) -> Self {
    Self {
      max_attempts: overrides.max_attempts.unwrap_or(self.max_attempts),
      base_delay: overrides.base_delay.unwrap_or(self.base_delay),
      qualifies: overrides
        .qualifies
        .clone()
        .unwrap_or_else(|| Arc::clone(&self.qualifies)),
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from_config(&RetryConfig::default())
  }
}

impl fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("max_attempts", &self.max_attempts)
      .field("base_delay", &self.base_delay)
      .finish_non_exhaustive()
  }
}

/// Per-call adjustments to the client's default policy. Unset fields inherit.
#[derive(Clone, Default)]
pub struct RetryOverride {
  pub max_attempts: Option<u32>,
  pub base_delay: Option<Duration>,
  pub qualifies: Option<RetryPredicate>,
}

impl RetryOverride {
  pub fn attempts(max_attempts: u32) -> Self {
    Self {
      max_attempts: Some(max_attempts),
      ..Self::default()
    }
  }

  pub fn base_delay(mut self, base_delay: Duration) -> Self {
    self.base_delay = Some(base_delay);
    self
  }

  pub fn qualifies<F>(mut self, qualifies: F) -> Self
  where
    F: Fn(&ApiError) -> bool + Send + Sync + 'static,
  {
    self.qualifies = Some(Arc::new(qualifies));
    self
  }
}

impl fmt::Debug for RetryOverride {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryOverride")
      .field("max_attempts", &self.max_attempts)
      .field("base_delay", &self.base_delay)
      .field("qualifies", &self.qualifies.as_ref().map(|_| ".."))
      .finish()
  }
}

/// Run `operation` under `policy`. The closure receives the attempt number.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut attempt = 0u32;
  loop {
    match operation(attempt).await {
      Ok(value) => return Ok(value),
      Err(error) if attempt < policy.max_attempts && policy.qualifies(&error) => {
        let delay = policy.delay_for(attempt);
        tracing::warn!(
          attempt = attempt + 1,
          max_attempts = policy.max_attempts,
          delay_ms = delay_millis(delay),
          error = %error,
          "request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(error) => return Err(error),
    }
  }
}

/// Milliseconds for logging, pinned at `u64::MAX` for saturated delays.
fn delay_millis(delay: Duration) -> u64 {
  u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
