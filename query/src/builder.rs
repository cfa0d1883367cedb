use crate::context::ExecutionContext;
use crate::error::{BuildError, RetryError};
use crate::policy::{NetworkMode, Retry, RetryDelay};
use crate::retryer::{Hook, RetryConfig, Retryer, WorkFn};
use crate::runtime::Runtime;
use crate::signal::{Availability, AvailabilityManager};

use core::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;

/// A builder for configuring and starting a [`Retryer`].
///
/// ```no_run
/// # async fn demo() {
/// use fibre_query::{Retry, RetryDelay, RetryerBuilder};
/// use std::time::Duration;
///
/// let retryer = RetryerBuilder::<String, std::io::Error>::new()
///   .work(|| async { Ok("payload".to_string()) })
///   .retry(Retry::Times(5))
///   .retry_delay(RetryDelay::Fixed(Duration::from_millis(250)))
///   .spawn()
///   .unwrap();
///
/// let value = retryer.result().await.unwrap();
/// assert_eq!(*value, "payload");
/// # }
/// ```
pub struct RetryerBuilder<T, E> {
  work: Option<WorkFn<T, E>>,
  abort: Option<Hook>,
  on_success: Option<Arc<dyn Fn(&T) + Send + Sync>>,
  on_error: Option<Arc<dyn Fn(&RetryError<E>) + Send + Sync>>,
  on_fail: Option<Arc<dyn Fn(u32, &E) + Send + Sync>>,
  on_pause: Option<Hook>,
  on_continue: Option<Hook>,
  retry: Option<Retry<E>>,
  retry_delay: RetryDelay<E>,
  network_mode: NetworkMode,
  context: ExecutionContext,
  availability: Option<Arc<dyn Availability>>,
  runtime: Option<Arc<dyn Runtime>>,
}

impl<T, E> fmt::Debug for RetryerBuilder<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryerBuilder")
      .field("has_work", &self.work.is_some())
      .field("retry", &self.retry)
      .field("retry_delay", &self.retry_delay)
      .field("network_mode", &self.network_mode)
      .field("context", &self.context)
      .field("has_runtime", &self.runtime.is_some())
      .finish_non_exhaustive()
  }
}

impl<T, E> Default for RetryerBuilder<T, E> {
  fn default() -> Self {
    Self {
      work: None,
      abort: None,
      on_success: None,
      on_error: None,
      on_fail: None,
      on_pause: None,
      on_continue: None,
      retry: None,
      retry_delay: RetryDelay::Backoff,
      network_mode: NetworkMode::default(),
      context: ExecutionContext::default(),
      availability: None,
      runtime: None,
    }
  }
}

impl<T, E> RetryerBuilder<T, E>
where
  T: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the unit of work. It is called once per attempt.
  pub fn work<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.work = Some(Arc::new(move || f().boxed()));
    self
  }

  /// Sets the hook that interrupts in-flight work when the retryer is cancelled.
  pub fn abort(mut self, abort: impl Fn() + Send + Sync + 'static) -> Self {
    self.abort = Some(Arc::new(abort));
    self
  }

  pub fn on_success(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
    self.on_success = Some(Arc::new(f));
    self
  }

  /// Called once with the terminal error, cancellation included.
  pub fn on_error(mut self, f: impl Fn(&RetryError<E>) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Arc::new(f));
    self
  }

  /// Called with `(failure_count, error)` for every failure that will be retried.
  pub fn on_fail(mut self, f: impl Fn(u32, &E) + Send + Sync + 'static) -> Self {
    self.on_fail = Some(Arc::new(f));
    self
  }

  pub fn on_pause(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
    self.on_pause = Some(Arc::new(f));
    self
  }

  pub fn on_continue(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
    self.on_continue = Some(Arc::new(f));
    self
  }

  /// Sets the retry policy. Defaults to the execution context's default.
  pub fn retry(mut self, retry: impl Into<Retry<E>>) -> Self {
    self.retry = Some(retry.into());
    self
  }

  pub fn retry_delay(mut self, delay: impl Into<RetryDelay<E>>) -> Self {
    self.retry_delay = delay.into();
    self
  }

  pub fn network_mode(mut self, mode: NetworkMode) -> Self {
    self.network_mode = mode;
    self
  }

  pub fn context(mut self, context: ExecutionContext) -> Self {
    self.context = context;
    self
  }

  /// Sets the connectivity and focus source. Without one the retryer behaves
  /// as if always online and focused.
  pub fn availability(mut self, availability: Arc<dyn Availability>) -> Self {
    self.availability = Some(availability);
    self
  }

  pub fn runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
    self.runtime = Some(runtime);
    self
  }

  /// Validates the configuration and starts the retry loop.
  pub fn spawn(self) -> Result<Retryer<T, E>, BuildError> {
    let work = self.work.ok_or(BuildError::MissingWork)?;
    let runtime = match self.runtime {
      Some(runtime) => runtime,
      None => default_runtime()?,
    };
    let retry = self.retry.unwrap_or_else(|| self.context.default_retry());
    let availability = self
      .availability
      .unwrap_or_else(|| Arc::new(AvailabilityManager::new()));

    Ok(Retryer::start(RetryConfig {
      work,
      abort: self.abort,
      on_success: self.on_success,
      on_error: self.on_error,
      on_fail: self.on_fail,
      on_pause: self.on_pause,
      on_continue: self.on_continue,
      retry,
      retry_delay: self.retry_delay,
      network_mode: self.network_mode,
      availability,
      runtime,
    }))
  }
}

#[cfg(feature = "tokio")]
fn default_runtime() -> Result<Arc<dyn Runtime>, BuildError> {
  crate::runtime::TokioRuntime::try_current()
    .map(|runtime| Arc::new(runtime) as Arc<dyn Runtime>)
    .ok_or(BuildError::RuntimeRequired)
}

#[cfg(not(feature = "tokio"))]
fn default_runtime() -> Result<Arc<dyn Runtime>, BuildError> {
  Err(BuildError::RuntimeRequired)
}
