//! Batched, deferred delivery of notifications.
//!
//! Everything that tells an observer "something changed" goes through a
//! [`NotifyManager`] instead of calling the observer directly. Inside a
//! [`batch`](NotifyManager::batch) the callbacks are queued and delivered in a
//! single pass once the outermost batch exits, so one logical operation that
//! touches many entries produces one round of notifications.
//!
//! The three hooks decide how delivery happens:
//!
//! - the **scheduler** runs a delivery task (default: the trampoline described
//!   below; [`NotifyManager::set_runtime`] spawns every task instead),
//! - the **notify function** wraps every single callback,
//! - the **batch notify function** wraps a whole flushed pass, which is where a
//!   UI layer would open its own update transaction.
//!
//! The default trampoline runs a task at once when the manager is idle. A task
//! dispatched while another one of the same manager is running is queued and
//! runs after it, on the draining thread. A callback that schedules more
//! notifications therefore never interleaves them into the pass being
//! delivered.

use crate::runtime::Runtime;

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::thread;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

/// A queued notification.
pub type Callback = Box<dyn FnOnce() + Send>;

/// Takes a unit of work and runs it, now or later.
pub type Wrapper = Arc<dyn Fn(Callback) + Send + Sync>;

static DEFAULT_MANAGER: Lazy<NotifyManager> = Lazy::new(NotifyManager::new);

/// The process-wide default manager.
///
/// Libraries that want isolation, tests in particular, should construct their
/// own [`NotifyManager`] and pass it around instead.
pub fn notify_manager() -> &'static NotifyManager {
  &DEFAULT_MANAGER
}

fn immediate() -> Wrapper {
  Arc::new(|callback: Callback| callback())
}

struct Queue {
  callbacks: Vec<Callback>,
  depth: usize,
}

struct Hooks {
  // `None` selects the built-in trampoline.
  scheduler: Option<Wrapper>,
  notify: Wrapper,
  batch_notify: Wrapper,
}

#[derive(Default)]
struct Trampoline {
  tasks: VecDeque<Callback>,
  running: bool,
}

struct NotifyShared {
  queue: Mutex<Queue>,
  hooks: RwLock<Hooks>,
  trampoline: Mutex<Trampoline>,
}

/// A coalescing notification queue. Clones share the same queue.
#[derive(Clone)]
pub struct NotifyManager {
  shared: Arc<NotifyShared>,
}

impl NotifyManager {
  pub fn new() -> Self {
    Self {
      shared: Arc::new(NotifyShared {
        queue: Mutex::new(Queue {
          callbacks: Vec::new(),
          depth: 0,
        }),
        hooks: RwLock::new(Hooks {
          scheduler: None,
          notify: immediate(),
          batch_notify: immediate(),
        }),
        trampoline: Mutex::new(Trampoline::default()),
      }),
    }
  }

  /// Queues `callback` if a batch is open, otherwise dispatches it through the
  /// scheduler wrapped in the notify function.
  pub fn schedule(&self, callback: impl FnOnce() + Send + 'static) {
    let callback: Callback = Box::new(callback);
    let callback = {
      let mut queue = self.shared.queue.lock();
      if queue.depth > 0 {
        queue.callbacks.push(callback);
        return;
      }
      callback
    };

    let notify = self.shared.hooks.read().notify.clone();
    self.dispatch(Box::new(move || notify(callback)));
  }

  /// Runs `f` inside a batch and returns its result.
  ///
  /// Batches nest; only the outermost exit flushes. If `f` panics the depth is
  /// still restored and the pass is flushed, but with the default scheduler it
  /// is not delivered while unwinding: it waits for the next dispatch on this
  /// manager.
  pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
    self.shared.queue.lock().depth += 1;
    let _scope = BatchScope { manager: self };
    f()
  }

  /// Wraps `f` so that every call is routed through [`schedule`](Self::schedule).
  ///
  /// Calls made inside a batch are each queued, in order, and delivered with
  /// the batch; they are not deduplicated.
  pub fn batch_calls<A, F>(&self, f: F) -> impl Fn(A) + Send + Sync + Clone + 'static
  where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
  {
    let manager = self.clone();
    let f = Arc::new(f);
    move |args: A| {
      let f = f.clone();
      manager.schedule(move || f(args));
    }
  }

  /// Replaces the primitive that runs delivery tasks.
  pub fn set_scheduler(&self, scheduler: impl Fn(Callback) + Send + Sync + 'static) {
    self.shared.hooks.write().scheduler = Some(Arc::new(scheduler));
  }

  /// Delivers every task as a future spawned on `runtime`.
  pub fn set_runtime(&self, runtime: Arc<dyn Runtime>) {
    self.set_scheduler(move |task: Callback| runtime.spawn(Box::pin(async move { task() })));
  }

  /// Goes back to the built-in trampoline scheduler.
  pub fn reset_scheduler(&self) {
    self.shared.hooks.write().scheduler = None;
  }

  /// Replaces the wrapper applied to every delivered callback.
  pub fn set_notify_function(&self, notify: impl Fn(Callback) + Send + Sync + 'static) {
    self.shared.hooks.write().notify = Arc::new(notify);
  }

  /// Replaces the wrapper applied around each flushed pass.
  pub fn set_batch_notify_function(&self, batch_notify: impl Fn(Callback) + Send + Sync + 'static) {
    self.shared.hooks.write().batch_notify = Arc::new(batch_notify);
  }

  pub fn is_batching(&self) -> bool {
    self.shared.queue.lock().depth > 0
  }

  /// Number of callbacks waiting for the current batch to close.
  pub fn pending(&self) -> usize {
    self.shared.queue.lock().callbacks.len()
  }

  /// Number of delivery tasks queued on the default scheduler.
  pub fn deferred(&self) -> usize {
    self.shared.trampoline.lock().tasks.len()
  }

  fn end_batch(&self) {
    let callbacks = {
      let mut queue = self.shared.queue.lock();
      queue.depth -= 1;
      if queue.depth > 0 {
        return;
      }
      // Anything scheduled while this pass is delivered lands in a fresh queue.
      mem::take(&mut queue.callbacks)
    };
    self.flush(callbacks);
  }

  fn flush(&self, callbacks: Vec<Callback>) {
    if callbacks.is_empty() {
      return;
    }
    tracing::trace!(count = callbacks.len(), "flushing notifications");

    let (notify, batch_notify) = {
      let hooks = self.shared.hooks.read();
      (hooks.notify.clone(), hooks.batch_notify.clone())
    };
    self.dispatch(Box::new(move || {
      batch_notify(Box::new(move || {
        for callback in callbacks {
          notify(callback);
        }
      }));
    }));
  }

  fn dispatch(&self, task: Callback) {
    let scheduler = self.shared.hooks.read().scheduler.clone();
    match scheduler {
      Some(scheduler) => scheduler(task),
      None => self.trampoline(task),
    }
  }

  fn trampoline(&self, task: Callback) {
    {
      let mut trampoline = self.shared.trampoline.lock();
      trampoline.tasks.push_back(task);
      // Someone is already draining, or this thread is unwinding and must not
      // run user code: the task waits for the next drain.
      if trampoline.running || thread::panicking() {
        return;
      }
      trampoline.running = true;
    }

    let mut drain = DrainScope {
      shared: &self.shared,
      armed: true,
    };
    loop {
      let next = {
        let mut trampoline = self.shared.trampoline.lock();
        match trampoline.tasks.pop_front() {
          Some(task) => task,
          None => {
            trampoline.running = false;
            drain.armed = false;
            return;
          }
        }
      };
      next();
    }
  }
}

impl Default for NotifyManager {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for NotifyManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let queue = self.shared.queue.lock();
    f.debug_struct("NotifyManager")
      .field("depth", &queue.depth)
      .field("pending", &queue.callbacks.len())
      .field("deferred", &self.shared.trampoline.lock().tasks.len())
      .finish()
  }
}

// Closes a batch on scope exit, unwinding included.
struct BatchScope<'a> {
  manager: &'a NotifyManager,
}

impl Drop for BatchScope<'_> {
  fn drop(&mut self) {
    self.manager.end_batch();
  }
}

// Lets a later dispatch drain again if a delivered task panics.
struct DrainScope<'a> {
  shared: &'a NotifyShared,
  armed: bool,
}

impl Drop for DrainScope<'_> {
  fn drop(&mut self) {
    if self.armed {
      self.shared.trampoline.lock().running = false;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Callback) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let make = move |name: &'static str| -> Callback {
      let sink = sink.clone();
      Box::new(move || sink.lock().push(name))
    };
    (log, make)
  }

  #[test]
  fn schedule_runs_at_once_when_idle() {
    let manager = NotifyManager::new();
    let (log, make) = recorder();
    manager.schedule(make("a"));
    assert_eq!(*log.lock(), vec!["a"]);
    assert_eq!(manager.deferred(), 0);
  }

  #[test]
  fn panicking_task_does_not_wedge_trampoline() {
    let manager = NotifyManager::new();
    let (log, make) = recorder();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      manager.schedule(|| panic!("listener failed"));
    }));
    assert!(result.is_err());

    manager.schedule(make("next"));
    assert_eq!(*log.lock(), vec!["next"]);
  }

  #[test]
  fn nested_batches_flush_once_at_outermost_exit() {
    let manager = NotifyManager::new();
    let (log, make) = recorder();

    manager.batch(|| {
      manager.schedule(make("a"));
      manager.batch(|| manager.schedule(make("b")));
      assert!(log.lock().is_empty(), "inner batch must not flush");
      assert_eq!(manager.pending(), 2);
    });

    assert_eq!(*log.lock(), vec!["a", "b"]);
    assert!(!manager.is_batching());
  }

  #[test]
  fn batch_returns_value() {
    let manager = NotifyManager::new();
    assert_eq!(manager.batch(|| 42), 42);
  }
}
