#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibre_query::{
  Evictable, EvictionScheduler, ExecutionContext, ListenerRegistry, Runtime, SubscriptionHooks,
  TokioRuntime, Ttl,
};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

/// A shared counter for asserting how often a callback ran.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn incr(&self) {
    self.0.fetch_add(1, Ordering::SeqCst);
  }

  pub fn get(&self) -> usize {
    self.0.load(Ordering::SeqCst)
  }
}

/// A Tokio runtime that remembers every delay it was asked to sleep for.
#[derive(Clone)]
pub struct RecordingRuntime {
  inner: TokioRuntime,
  pub sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingRuntime {
  pub fn new() -> Self {
    Self {
      inner: TokioRuntime::new(),
      sleeps: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn recorded(&self) -> Vec<Duration> {
    self.sleeps.lock().clone()
  }
}

impl Runtime for RecordingRuntime {
  fn spawn(&self, future: BoxFuture<'static, ()>) {
    self.inner.spawn(future);
  }

  fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
    self.sleeps.lock().push(duration);
    self.inner.sleep(duration)
  }
}

/// Work that fails `failures` times with `"boom"` and then succeeds with the
/// attempt number. Returns the work closure and a counter of attempts.
pub fn flaky(
  failures: usize,
) -> (
  impl Fn() -> BoxFuture<'static, Result<usize, &'static str>> + Send + Sync + 'static,
  Counter,
) {
  let attempts = Counter::new();
  let seen = attempts.clone();
  let work = move || -> BoxFuture<'static, Result<usize, &'static str>> {
    seen.incr();
    let attempt = seen.get();
    Box::pin(async move {
      if attempt <= failures {
        Err("boom")
      } else {
        Ok(attempt)
      }
    })
  };
  (work, attempts)
}

/// Lets spawned tasks run until they block.
pub async fn settle() {
  for _ in 0..16 {
    tokio::task::yield_now().await;
  }
}

pub type Listener = dyn Fn() + Send + Sync;

/// A minimal cache entry: it embeds a registry and an eviction scheduler, arms
/// the timer when the last listener leaves and evicts itself if still unwatched.
pub struct TestEntry {
  pub listeners: ListenerRegistry<Listener>,
  pub eviction: EvictionScheduler,
  pub eviction_checks: Counter,
  pub evicted: Counter,
}

impl TestEntry {
  pub fn new(ttl: Duration) -> Arc<Self> {
    Self::with_context(Some(Ttl::Finite(ttl)), ExecutionContext::Interactive)
  }

  pub fn with_context(ttl: Option<Ttl>, context: ExecutionContext) -> Arc<Self> {
    let entry = Arc::new_cyclic(|weak| TestEntry {
      listeners: ListenerRegistry::with_hooks(weak.clone()),
      eviction: EvictionScheduler::new(weak.clone(), Arc::new(TokioRuntime::new()), context),
      eviction_checks: Counter::new(),
      evicted: Counter::new(),
    });
    entry.eviction.update_ttl(ttl);
    entry
  }
}

impl SubscriptionHooks for TestEntry {
  fn on_subscribe(&self) {
    self.eviction.cancel_eviction();
  }

  fn on_unsubscribe(&self) {
    self.eviction.schedule_eviction();
  }
}

impl Evictable for TestEntry {
  fn try_evict(&self) {
    self.eviction_checks.incr();
    if !self.listeners.has_listeners() {
      self.evicted.incr();
      self.eviction.destroy();
    }
  }
}
