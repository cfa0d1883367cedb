//! Connectivity and focus signals.
//!
//! The retry loop only pauses and resumes; deciding whether the host is online
//! or focused is up to the embedding application, which reports it through an
//! [`Availability`] implementation.

use crate::listener::{ListenerRegistry, Unsubscribe};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A change listener. Receives no arguments; read the new state from the source.
pub type SignalListener = dyn Fn() + Send + Sync;

/// A source of connectivity and focus state.
pub trait Availability: Send + Sync {
  fn is_online(&self) -> bool;

  fn is_focused(&self) -> bool;

  /// Registers a listener that is called whenever either signal changes.
  fn subscribe(&self, listener: Arc<SignalListener>) -> Unsubscribe;
}

/// An [`Availability`] backed by two flags the host flips.
///
/// Starts online and focused. Listeners are called synchronously, on the thread
/// that changed the flag, and only when the value actually changes.
pub struct AvailabilityManager {
  online: AtomicBool,
  focused: AtomicBool,
  listeners: ListenerRegistry<SignalListener>,
}

impl AvailabilityManager {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      focused: AtomicBool::new(true),
      listeners: ListenerRegistry::new(),
    }
  }

  pub fn set_online(&self, online: bool) {
    if self.online.swap(online, Ordering::AcqRel) != online {
      tracing::debug!(online, "connectivity changed");
      self.emit();
    }
  }

  pub fn set_focused(&self, focused: bool) {
    if self.focused.swap(focused, Ordering::AcqRel) != focused {
      tracing::debug!(focused, "focus changed");
      self.emit();
    }
  }

  fn emit(&self) {
    for listener in self.listeners.listeners() {
      listener();
    }
  }
}

impl Default for AvailabilityManager {
  fn default() -> Self {
    Self::new()
  }
}

impl Availability for AvailabilityManager {
  fn is_online(&self) -> bool {
    self.online.load(Ordering::Acquire)
  }

  fn is_focused(&self) -> bool {
    self.focused.load(Ordering::Acquire)
  }

  fn subscribe(&self, listener: Arc<SignalListener>) -> Unsubscribe {
    self.listeners.subscribe(listener)
  }
}

impl fmt::Debug for AvailabilityManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AvailabilityManager")
      .field("online", &self.is_online())
      .field("focused", &self.is_focused())
      .field("listeners", &self.listeners.listener_count())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[test]
  fn listeners_only_see_real_changes() {
    let manager = AvailabilityManager::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let sub = manager.subscribe(Arc::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    }));

    manager.set_online(true);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    manager.set_online(false);
    manager.set_focused(false);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!manager.is_online());
    assert!(!manager.is_focused());

    sub.unsubscribe();
    manager.set_online(true);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
