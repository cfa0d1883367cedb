//! Subscriber bookkeeping for a single entity.
//!
//! A [`ListenerRegistry`] answers "is anyone watching this entry?". Its owner
//! learns about the interesting transitions through [`SubscriptionHooks`]:
//! the first subscriber arriving typically starts a fetch, the last one leaving
//! typically arms the eviction timer.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Callbacks an owning entity implements to react to subscriber presence.
pub trait SubscriptionHooks: Send + Sync {
  /// Called when the listener count goes from zero to one.
  fn on_subscribe(&self) {}

  /// Called when the listener count drops back to zero through an
  /// [`Unsubscribe`] handle.
  fn on_unsubscribe(&self) {}
}

struct RegistryShared<L: ?Sized> {
  listeners: Mutex<Vec<Arc<L>>>,
  hooks: Option<Weak<dyn SubscriptionHooks>>,
}

impl<L: ?Sized> RegistryShared<L> {
  fn hooks(&self) -> Option<Arc<dyn SubscriptionHooks>> {
    self.hooks.as_ref().and_then(Weak::upgrade)
  }

  fn remove(&self, listener: &Arc<L>) {
    let became_empty = {
      let mut listeners = self.listeners.lock();
      match listeners.iter().position(|l| same_listener(l, listener)) {
        Some(pos) => {
          listeners.remove(pos);
          listeners.is_empty()
        }
        None => return,
      }
    };

    // Hooks run without the lock held so they may re-enter the registry.
    if became_empty {
      if let Some(hooks) = self.hooks() {
        hooks.on_unsubscribe();
      }
    }
  }
}

/// Listener identity is the address of the shared allocation.
fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
  Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// An identity-deduplicated set of listeners.
///
/// Cloning the registry yields another handle to the same set.
pub struct ListenerRegistry<L: ?Sized> {
  shared: Arc<RegistryShared<L>>,
}

impl<L: ?Sized + Send + Sync + 'static> ListenerRegistry<L> {
  /// Creates a registry that has nobody to notify about presence changes.
  pub fn new() -> Self {
    Self {
      shared: Arc::new(RegistryShared {
        listeners: Mutex::new(Vec::new()),
        hooks: None,
      }),
    }
  }

  /// Creates a registry that reports presence transitions to `hooks`.
  ///
  /// The hooks are held weakly so an owner can embed its own registry, usually
  /// through `Arc::new_cyclic`.
  pub fn with_hooks<H: SubscriptionHooks + 'static>(hooks: Weak<H>) -> Self {
    let hooks: Weak<dyn SubscriptionHooks> = hooks;
    Self {
      shared: Arc::new(RegistryShared {
        listeners: Mutex::new(Vec::new()),
        hooks: Some(hooks),
      }),
    }
  }

  /// Adds a listener. Adding a listener that is already present changes
  /// nothing, but the returned handle can still remove it.
  pub fn subscribe(&self, listener: Arc<L>) -> Unsubscribe {
    let became_first = {
      let mut listeners = self.shared.listeners.lock();
      if listeners.iter().any(|l| same_listener(l, &listener)) {
        false
      } else {
        listeners.push(listener.clone());
        listeners.len() == 1
      }
    };

    if became_first {
      if let Some(hooks) = self.shared.hooks() {
        hooks.on_subscribe();
      }
    }

    let registry = Arc::downgrade(&self.shared);
    Unsubscribe::new(move || {
      if let Some(registry) = registry.upgrade() {
        registry.remove(&listener);
      }
    })
  }

  pub fn has_listeners(&self) -> bool {
    !self.shared.listeners.lock().is_empty()
  }

  pub fn listener_count(&self) -> usize {
    self.shared.listeners.lock().len()
  }

  /// Returns a snapshot of the current listeners in subscription order.
  ///
  /// Deliver from the snapshot so a listener that unsubscribes itself, or
  /// subscribes a new one, does not disturb the pass in progress.
  pub fn listeners(&self) -> Vec<Arc<L>> {
    self.shared.listeners.lock().clone()
  }

  /// Drops every listener without firing hooks. Used at owner teardown.
  pub fn clear(&self) {
    self.shared.listeners.lock().clear();
  }
}

impl<L: ?Sized + Send + Sync + 'static> Default for ListenerRegistry<L> {
  fn default() -> Self {
    Self::new()
  }
}

impl<L: ?Sized> Clone for ListenerRegistry<L> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<L: ?Sized> fmt::Debug for ListenerRegistry<L> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ListenerRegistry")
      .field("listeners", &self.shared.listeners.lock().len())
      .field("has_hooks", &self.shared.hooks.is_some())
      .finish()
  }
}

/// Removes a listener from the registry it was subscribed to.
///
/// Only the first call to [`unsubscribe`](Unsubscribe::unsubscribe) has an
/// effect. Dropping the handle does not unsubscribe.
#[must_use = "dropping an Unsubscribe handle leaves the listener subscribed"]
pub struct Unsubscribe {
  action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Unsubscribe {
  pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
    Self {
      action: Mutex::new(Some(Box::new(action))),
    }
  }

  /// A handle with nothing to undo.
  pub fn noop() -> Self {
    Self {
      action: Mutex::new(None),
    }
  }

  pub fn unsubscribe(&self) {
    // Take first, run after the lock is released.
    let action = self.action.lock().take();
    if let Some(action) = action {
      action();
    }
  }

  pub fn is_unsubscribed(&self) -> bool {
    self.action.lock().is_none()
  }
}

impl fmt::Debug for Unsubscribe {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Unsubscribe")
      .field("unsubscribed", &self.is_unsubscribed())
      .finish()
  }
}
