use std::time::Duration;

use futures_util::future::BoxFuture;

/// The asynchronous primitives the engine needs from its host.
///
/// `spawn` runs retry loops and eviction timers in the background; `sleep`
/// provides retry delays and timer expiry. Implement this to run on a runtime
/// other than Tokio, or to drive time by hand in tests.
pub trait Runtime: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: BoxFuture<'static, ()>);

  /// Returns a future that completes after `duration`.
  fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioRuntime(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioRuntime {
  /// Creates a runtime bound to the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Like [`TokioRuntime::new`], but returns `None` outside of a Tokio runtime.
  pub fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }

  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl Default for TokioRuntime {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(feature = "tokio")]
impl Runtime for TokioRuntime {
  fn spawn(&self, future: BoxFuture<'static, ()>) {
    self.0.spawn(future);
  }

  fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
    // The timer registers with the runtime on creation, which may happen on a
    // thread that is not a runtime worker.
    let _guard = self.0.enter();
    Box::pin(tokio::time::sleep(duration))
  }
}
