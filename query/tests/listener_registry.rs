mod common;

use common::{Counter, Listener, TestEntry};

use fibre_query::{NotifyManager, Unsubscribe};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn deliver(manager: &NotifyManager, entry: &TestEntry) {
  manager.batch(|| {
    for listener in entry.listeners.listeners() {
      manager.schedule(move || listener());
    }
  });
}

#[tokio::test(start_paused = true)]
async fn test_listener_may_unsubscribe_itself_during_delivery() {
  let entry = TestEntry::new(Duration::from_secs(60));
  let manager = NotifyManager::new();

  let calls = Counter::new();
  let own_handle: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
  let once: Arc<Listener> = {
    let calls = calls.clone();
    let own_handle = own_handle.clone();
    Arc::new(move || {
      calls.incr();
      if let Some(handle) = own_handle.lock().take() {
        handle.unsubscribe();
      }
    })
  };
  *own_handle.lock() = Some(entry.listeners.subscribe(once));

  let steady_calls = Counter::new();
  let steady: Arc<Listener> = {
    let steady_calls = steady_calls.clone();
    Arc::new(move || steady_calls.incr())
  };
  let steady_handle = entry.listeners.subscribe(steady);

  deliver(&manager, &entry);
  assert_eq!(calls.get(), 1);
  assert_eq!(steady_calls.get(), 1);
  assert_eq!(entry.listeners.listener_count(), 1);
  assert!(!entry.eviction.is_scheduled(), "one listener is still watching");

  deliver(&manager, &entry);
  assert_eq!(calls.get(), 1);
  assert_eq!(steady_calls.get(), 2);

  steady_handle.unsubscribe();
  assert!(entry.eviction.is_scheduled());
}

#[tokio::test(start_paused = true)]
async fn test_double_unsubscribe_schedules_once() {
  let entry = TestEntry::new(Duration::from_millis(50));
  let handle = entry.listeners.subscribe(Arc::new(|| {}));

  handle.unsubscribe();
  handle.unsubscribe();
  assert!(handle.is_unsubscribed());

  tokio::time::sleep(Duration::from_millis(60)).await;
  assert_eq!(entry.eviction_checks.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_clear_does_not_fire_hooks() {
  let entry = TestEntry::new(Duration::from_millis(50));
  let _handle = entry.listeners.subscribe(Arc::new(|| {}));

  entry.listeners.clear();
  assert!(!entry.listeners.has_listeners());
  assert!(!entry.eviction.is_scheduled());
}
