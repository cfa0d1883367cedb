use std::sync::Arc;

use thiserror::Error;

/// The error a [`Retryer`](crate::Retryer) resolves with when it is cancelled.
///
/// The flags carry the caller's intent through to whoever observes the
/// outcome: `revert` asks the owner to roll back to its previous state,
/// `silent` asks it not to surface the cancellation to its observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("operation was cancelled")]
pub struct CancelledError {
  pub revert: bool,
  pub silent: bool,
}

/// The terminal failure of a [`Retryer`](crate::Retryer).
///
/// Failures that are still being retried never surface; only the outcome that
/// ended the retry loop reaches the caller.
#[derive(Debug, Error)]
pub enum RetryError<E> {
  /// The retryer was cancelled before it resolved.
  #[error(transparent)]
  Cancelled(CancelledError),
  /// The work failed and the retry policy declined another attempt, or retrying
  /// had been cancelled. Holds the error of the last attempt.
  #[error("work failed: {0}")]
  Failed(Arc<E>),
  /// The work function panicked. Panics are never retried.
  #[error("work panicked: {0}")]
  Panicked(String),
}

impl<E> RetryError<E> {
  /// Returns `true` if this outcome was produced by [`Retryer::cancel`](crate::Retryer::cancel).
  pub fn is_cancelled(&self) -> bool {
    matches!(self, RetryError::Cancelled(_))
  }

  /// Returns the cancellation flags, if this is a cancellation.
  pub fn as_cancelled(&self) -> Option<&CancelledError> {
    match self {
      RetryError::Cancelled(cancelled) => Some(cancelled),
      _ => None,
    }
  }

  /// Returns the error raised by the work function, if this is an execution failure.
  pub fn as_failed(&self) -> Option<&E> {
    match self {
      RetryError::Failed(error) => Some(&**error),
      _ => None,
    }
  }
}

// Manual impl so that `E` does not need to be `Clone`; the payload is shared.
impl<E> Clone for RetryError<E> {
  fn clone(&self) -> Self {
    match self {
      RetryError::Cancelled(cancelled) => RetryError::Cancelled(*cancelled),
      RetryError::Failed(error) => RetryError::Failed(Arc::clone(error)),
      RetryError::Panicked(message) => RetryError::Panicked(message.clone()),
    }
  }
}

/// Errors that can occur when building a [`Retryer`](crate::Retryer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// No work function was configured.
  #[error("a retryer requires a work function")]
  MissingWork,
  /// No `Runtime` was configured and the default `tokio` feature is not enabled,
  /// or no Tokio runtime is running.
  #[error("a retryer requires a runtime or the 'tokio' feature inside a tokio runtime")]
  RuntimeRequired,
}
