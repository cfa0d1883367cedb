//! Retry, delay and network policies for the [`Retryer`](crate::Retryer).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound of the default exponential backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

const BASE_BACKOFF_MS: u64 = 1000;

/// The default retry delay: `min(1000ms * 2^failure_count, 30s)`.
pub fn default_retry_delay(failure_count: u32) -> Duration {
  // 2^5 * 1000 already exceeds the cap; avoid overflowing the shift.
  if failure_count >= 5 {
    return MAX_BACKOFF;
  }
  Duration::from_millis(BASE_BACKOFF_MS << failure_count).min(MAX_BACKOFF)
}

/// Decides whether a failed attempt is retried.
///
/// The predicate and the count are evaluated against the number of failures
/// that were already retried, before the current one is counted.
///
/// Only `Err` results are subject to the policy. A work function that panics,
/// while creating its future or while it is polled, resolves the retryer as
/// [`RetryError::Panicked`](crate::RetryError::Panicked) and is never retried,
/// not even under `Forever`.
pub enum Retry<E> {
  /// Never retry; the first failure is terminal.
  Never,
  /// Retry until the work succeeds.
  Forever,
  /// Retry at most `n` times, for `n + 1` attempts in total.
  Times(u32),
  /// Retry while the predicate returns `true` for `(failure_count, error)`.
  If(Arc<dyn Fn(u32, &E) -> bool + Send + Sync>),
}

impl<E> Retry<E> {
  pub fn when(predicate: impl Fn(u32, &E) -> bool + Send + Sync + 'static) -> Self {
    Retry::If(Arc::new(predicate))
  }

  pub(crate) fn should_retry(&self, failure_count: u32, error: &E) -> bool {
    match self {
      Retry::Never => false,
      Retry::Forever => true,
      Retry::Times(n) => failure_count < *n,
      Retry::If(predicate) => predicate(failure_count, error),
    }
  }
}

impl<E> From<bool> for Retry<E> {
  fn from(retry: bool) -> Self {
    if retry {
      Retry::Forever
    } else {
      Retry::Never
    }
  }
}

impl<E> From<u32> for Retry<E> {
  fn from(times: u32) -> Self {
    Retry::Times(times)
  }
}

impl<E> Clone for Retry<E> {
  fn clone(&self) -> Self {
    match self {
      Retry::Never => Retry::Never,
      Retry::Forever => Retry::Forever,
      Retry::Times(n) => Retry::Times(*n),
      Retry::If(predicate) => Retry::If(predicate.clone()),
    }
  }
}

impl<E> fmt::Debug for Retry<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Retry::Never => write!(f, "Never"),
      Retry::Forever => write!(f, "Forever"),
      Retry::Times(n) => f.debug_tuple("Times").field(n).finish(),
      Retry::If(_) => write!(f, "If(..)"),
    }
  }
}

/// How long to wait before the next attempt.
pub enum RetryDelay<E> {
  /// Exponential backoff, see [`default_retry_delay`].
  Backoff,
  Fixed(Duration),
  /// Computed from `(failure_count, error)`.
  With(Arc<dyn Fn(u32, &E) -> Duration + Send + Sync>),
}

impl<E> RetryDelay<E> {
  pub fn with(delay: impl Fn(u32, &E) -> Duration + Send + Sync + 'static) -> Self {
    RetryDelay::With(Arc::new(delay))
  }

  pub(crate) fn delay_for(&self, failure_count: u32, error: &E) -> Duration {
    match self {
      RetryDelay::Backoff => default_retry_delay(failure_count),
      RetryDelay::Fixed(delay) => *delay,
      RetryDelay::With(delay) => delay(failure_count, error),
    }
  }
}

impl<E> Default for RetryDelay<E> {
  fn default() -> Self {
    RetryDelay::Backoff
  }
}

impl<E> From<Duration> for RetryDelay<E> {
  fn from(delay: Duration) -> Self {
    RetryDelay::Fixed(delay)
  }
}

impl<E> Clone for RetryDelay<E> {
  fn clone(&self) -> Self {
    match self {
      RetryDelay::Backoff => RetryDelay::Backoff,
      RetryDelay::Fixed(delay) => RetryDelay::Fixed(*delay),
      RetryDelay::With(delay) => RetryDelay::With(delay.clone()),
    }
  }
}

impl<E> fmt::Debug for RetryDelay<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RetryDelay::Backoff => write!(f, "Backoff"),
      RetryDelay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
      RetryDelay::With(_) => write!(f, "With(..)"),
    }
  }
}

/// Controls how connectivity gates execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum NetworkMode {
  /// Requires connectivity to start and to continue after a failure.
  #[default]
  Online,
  /// Ignores connectivity entirely.
  Always,
  /// Starts regardless of connectivity; retries wait for connectivity.
  OfflineFirst,
}

impl NetworkMode {
  /// Whether a fresh execution may start given the current connectivity.
  pub fn can_start(&self, online: bool) -> bool {
    match self {
      NetworkMode::Online => online,
      NetworkMode::Always | NetworkMode::OfflineFirst => true,
    }
  }

  /// Whether connectivity allows continuing after a failed attempt.
  pub fn can_continue(&self, online: bool) -> bool {
    matches!(self, NetworkMode::Always) || online
  }
}
