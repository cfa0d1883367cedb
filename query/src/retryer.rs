//! The retry-with-backoff executor.
//!
//! A [`Retryer`] drives one unit of asynchronous work to a single terminal
//! outcome. Failed attempts are retried according to a [`Retry`] policy after a
//! [`RetryDelay`]; between attempts execution pauses while the host is offline
//! or unfocused, and resumes when the [`Availability`] source reports a change,
//! when [`Retryer::continue_execution`] is called, or when the retryer resolves.
//!
//! Resolution happens exactly once. Success, failure and cancellation all race
//! for the same guarded transition; whoever loses is a no-op.

use crate::error::{CancelledError, RetryError};
use crate::listener::Unsubscribe;
use crate::policy::{NetworkMode, Retry, RetryDelay};
use crate::runtime::Runtime;
use crate::signal::{Availability, SignalListener};
use crate::sync::{Gate, SettleSlot};

use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;

/// The terminal outcome of a retryer.
pub type Outcome<T, E> = Result<Arc<T>, RetryError<E>>;

pub(crate) type WorkFn<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
pub(crate) type Hook = Arc<dyn Fn() + Send + Sync>;

/// Options for [`Retryer::cancel`], carried into the resulting [`CancelledError`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelOptions {
  pub revert: bool,
  pub silent: bool,
}

impl From<CancelOptions> for CancelledError {
  fn from(options: CancelOptions) -> Self {
    CancelledError {
      revert: options.revert,
      silent: options.silent,
    }
  }
}

pub(crate) struct RetryConfig<T, E> {
  pub(crate) work: WorkFn<T, E>,
  pub(crate) abort: Option<Hook>,
  pub(crate) on_success: Option<Arc<dyn Fn(&T) + Send + Sync>>,
  pub(crate) on_error: Option<Arc<dyn Fn(&RetryError<E>) + Send + Sync>>,
  pub(crate) on_fail: Option<Arc<dyn Fn(u32, &E) + Send + Sync>>,
  pub(crate) on_pause: Option<Hook>,
  pub(crate) on_continue: Option<Hook>,
  pub(crate) retry: Retry<E>,
  pub(crate) retry_delay: RetryDelay<E>,
  pub(crate) network_mode: NetworkMode,
  pub(crate) availability: Arc<dyn Availability>,
  pub(crate) runtime: Arc<dyn Runtime>,
}

#[derive(Default)]
struct RetryState {
  resolved: bool,
  failure_count: u32,
  retry_cancelled: bool,
  pause_gate: Option<Arc<Gate>>,
}

struct RetryShared<T, E> {
  config: RetryConfig<T, E>,
  state: Mutex<RetryState>,
  outcome: SettleSlot<Outcome<T, E>>,
}

impl<T, E> RetryShared<T, E>
where
  T: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  fn is_resolved(&self) -> bool {
    self.state.lock().resolved
  }

  fn can_start(&self) -> bool {
    self.config.network_mode.can_start(self.config.availability.is_online())
  }

  fn can_continue(&self) -> bool {
    can_continue(&*self.config.availability, self.config.network_mode)
  }

  /// The single terminal transition. Returns `false` if already resolved.
  fn resolve(&self, outcome: Outcome<T, E>) -> bool {
    let gate = {
      let mut state = self.state.lock();
      if state.resolved {
        return false;
      }
      state.resolved = true;
      state.pause_gate.take()
    };

    // Waiters and a suspended loop are released before user callbacks run, so
    // a panicking callback cannot strand them.
    self.outcome.settle(outcome.clone());
    if let Some(gate) = gate {
      gate.release();
    }

    match &outcome {
      Ok(value) => {
        if let Some(on_success) = &self.config.on_success {
          on_success(&**value);
        }
      }
      Err(error) => {
        if let Some(on_error) = &self.config.on_error {
          on_error(error);
        }
      }
    }
    true
  }

  async fn run(self: Arc<Self>) {
    if !self.can_start() {
      self.pause().await;
    }

    loop {
      if self.is_resolved() {
        return;
      }

      // Invoking the work function happens inside the guarded future so a
      // panic while creating the attempt is caught the same as one while polling.
      let attempt = AssertUnwindSafe(async { (self.config.work)().await })
        .catch_unwind()
        .await;

      let error = match attempt {
        Ok(Ok(value)) => {
          self.resolve(Ok(Arc::new(value)));
          return;
        }
        Ok(Err(error)) => Arc::new(error),
        Err(panic) => {
          let message = panic_message(panic.as_ref());
          tracing::warn!(%message, "retryer work panicked");
          self.resolve(Err(RetryError::Panicked(message)));
          return;
        }
      };

      // Policies are user code; evaluate them without holding the lock.
      let previous_failures = self.state.lock().failure_count;
      let should_retry = self.config.retry.should_retry(previous_failures, &error);
      let delay = self.config.retry_delay.delay_for(previous_failures, &error);

      let failure_count = {
        let mut state = self.state.lock();
        if state.resolved {
          return;
        }
        if state.retry_cancelled || !should_retry {
          None
        } else {
          state.failure_count += 1;
          Some(state.failure_count)
        }
      };

      let Some(failure_count) = failure_count else {
        tracing::debug!(failures = previous_failures, "attempt failed, giving up");
        self.resolve(Err(RetryError::Failed(error)));
        return;
      };

      tracing::debug!(failure_count, ?delay, "attempt failed, retrying");
      if let Some(on_fail) = &self.config.on_fail {
        on_fail(failure_count, &*error);
      }

      if !delay.is_zero() {
        self.config.runtime.sleep(delay).await;
      }

      if self.is_resolved() {
        return;
      }
      if !self.can_continue() {
        self.pause().await;
      }

      let (resolved, retry_cancelled) = {
        let state = self.state.lock();
        (state.resolved, state.retry_cancelled)
      };
      if resolved {
        return;
      }
      if retry_cancelled {
        self.resolve(Err(RetryError::Failed(error)));
        return;
      }
    }
  }

  async fn pause(&self) {
    let gate = Arc::new(Gate::new());
    {
      let mut state = self.state.lock();
      if state.resolved {
        return;
      }
      state.pause_gate = Some(gate.clone());
    }

    tracing::debug!("retryer paused");
    if let Some(on_pause) = &self.config.on_pause {
      on_pause();
    }

    let subscription = SubscriptionGuard(self.config.availability.subscribe(self.resume_listener(&gate)));
    // The signal may have flipped between the decision to pause and subscribing.
    if self.can_continue() {
      gate.release();
    }
    gate.wait().await;
    drop(subscription);

    let resolved = {
      let mut state = self.state.lock();
      state.pause_gate = None;
      state.resolved
    };
    if !resolved {
      tracing::debug!("retryer continued");
      if let Some(on_continue) = &self.config.on_continue {
        on_continue();
      }
    }
  }

  fn resume_listener(&self, gate: &Arc<Gate>) -> Arc<SignalListener> {
    let gate = gate.clone();
    let availability = Arc::downgrade(&self.config.availability);
    let network_mode = self.config.network_mode;
    Arc::new(move || {
      if let Some(availability) = availability.upgrade() {
        if can_continue(&*availability, network_mode) {
          gate.release();
        }
      }
    })
  }
}

fn can_continue(availability: &dyn Availability, network_mode: NetworkMode) -> bool {
  availability.is_focused() && network_mode.can_continue(availability.is_online())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

// Unsubscribes when the pause ends, or when the loop future is dropped mid-pause.
struct SubscriptionGuard(Unsubscribe);

impl Drop for SubscriptionGuard {
  fn drop(&mut self) {
    self.0.unsubscribe();
  }
}

/// A handle to a running retry loop. Clones control the same loop.
pub struct Retryer<T, E> {
  shared: Arc<RetryShared<T, E>>,
}

impl<T, E> Retryer<T, E>
where
  T: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Starts a configured retry loop on its runtime.
  pub(crate) fn start(config: RetryConfig<T, E>) -> Self {
    let shared = Arc::new(RetryShared {
      config,
      state: Mutex::new(RetryState::default()),
      outcome: SettleSlot::new(),
    });
    let runtime = shared.config.runtime.clone();
    runtime.spawn(Box::pin(shared.clone().run()));
    Self { shared }
  }

  /// A future resolving to the terminal outcome. Any number may be awaited.
  pub fn result(&self) -> RetryFuture<T, E> {
    RetryFuture {
      shared: self.shared.clone(),
    }
  }

  /// The outcome, if the retryer has already settled.
  pub fn try_result(&self) -> Option<Outcome<T, E>> {
    self.shared.outcome.get()
  }

  /// Resolves the retryer as cancelled and calls the abort hook.
  ///
  /// An attempt already running is not interrupted by the loop; the abort hook
  /// is how the work itself learns it should stop. Returns `false`, doing
  /// nothing, if the retryer had already resolved.
  pub fn cancel(&self, options: CancelOptions) -> bool {
    let cancelled = self.shared.resolve(Err(RetryError::Cancelled(options.into())));
    if cancelled {
      tracing::debug!(revert = options.revert, silent = options.silent, "retryer cancelled");
      if let Some(abort) = &self.shared.config.abort {
        abort();
      }
    }
    cancelled
  }

  /// Makes the next failure terminal instead of retried.
  ///
  /// Does not interrupt a running attempt or a delay that is elapsing.
  pub fn cancel_retry(&self) {
    self.shared.state.lock().retry_cancelled = true;
  }

  /// Undoes [`cancel_retry`](Self::cancel_retry) if no decision has been made yet.
  pub fn continue_retry(&self) {
    self.shared.state.lock().retry_cancelled = false;
  }

  /// Releases the pause gate now, regardless of availability.
  ///
  /// If a pause was active the returned future resolves to `Some` outcome once
  /// the retryer settles. Without an active pause it is ready at once with
  /// `None`.
  pub fn continue_execution(&self) -> Continuation<T, E> {
    let gate = self.shared.state.lock().pause_gate.clone();
    let pending = gate.map(|gate| {
      gate.release();
      self.result()
    });
    Continuation { pending }
  }

  pub fn is_resolved(&self) -> bool {
    self.shared.is_resolved()
  }

  pub fn is_paused(&self) -> bool {
    self.shared.state.lock().pause_gate.is_some()
  }

  /// Failures that have been retried so far.
  pub fn failure_count(&self) -> u32 {
    self.shared.state.lock().failure_count
  }

  /// Whether the network mode allows a fresh execution to start right now.
  pub fn can_start(&self) -> bool {
    self.shared.can_start()
  }
}

impl<T, E> Clone for Retryer<T, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T, E> fmt::Debug for Retryer<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.shared.state.lock();
    f.debug_struct("Retryer")
      .field("resolved", &state.resolved)
      .field("failure_count", &state.failure_count)
      .field("retry_cancelled", &state.retry_cancelled)
      .field("paused", &state.pause_gate.is_some())
      .field("network_mode", &self.shared.config.network_mode)
      .finish_non_exhaustive()
  }
}

impl<T, E> IntoFuture for Retryer<T, E>
where
  T: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  type Output = Outcome<T, E>;
  type IntoFuture = RetryFuture<T, E>;

  fn into_future(self) -> Self::IntoFuture {
    self.result()
  }
}

/// Resolves to a retryer's terminal outcome.
pub struct RetryFuture<T, E> {
  shared: Arc<RetryShared<T, E>>,
}

impl<T, E> Future for RetryFuture<T, E> {
  type Output = Outcome<T, E>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.shared.outcome.poll_settled(cx)
  }
}

impl<T, E> fmt::Debug for RetryFuture<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryFuture").finish_non_exhaustive()
  }
}

/// Returned by [`Retryer::continue_execution`].
pub struct Continuation<T, E> {
  pending: Option<RetryFuture<T, E>>,
}

impl<T, E> Continuation<T, E> {
  /// Whether a pause was active and got released.
  pub fn was_paused(&self) -> bool {
    self.pending.is_some()
  }
}

impl<T, E> Future for Continuation<T, E> {
  type Output = Option<Outcome<T, E>>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    match &mut self.get_mut().pending {
      Some(result) => Pin::new(result).poll(cx).map(Some),
      None => Poll::Ready(None),
    }
  }
}

impl<T, E> fmt::Debug for Continuation<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Continuation")
      .field("was_paused", &self.was_paused())
      .finish()
  }
}
