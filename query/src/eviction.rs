//! Timer-driven garbage collection of idle entries.
//!
//! The scheduler owns a time-to-live and at most one pending timer. It never
//! removes anything itself: when the timer fires it calls
//! [`Evictable::try_evict`] on its owner, which re-checks whether removal is
//! still valid (typically: nobody subscribed in the meantime).

use crate::context::ExecutionContext;
use crate::runtime::Runtime;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable};
use parking_lot::Mutex;

/// How long an idle entry may stay cached.
///
/// Ordered so that `Infinite` is greater than every finite duration, which is
/// what [`EvictionScheduler::update_ttl`] takes the maximum over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Ttl {
  Finite(Duration),
  Infinite,
}

impl Ttl {
  pub const ZERO: Ttl = Ttl::Finite(Duration::ZERO);

  /// The timer delay, or `None` if this TTL can never be scheduled.
  pub fn as_duration(&self) -> Option<Duration> {
    match self {
      Ttl::Finite(duration) => Some(*duration),
      Ttl::Infinite => None,
    }
  }

  pub fn is_infinite(&self) -> bool {
    matches!(self, Ttl::Infinite)
  }
}

impl From<Duration> for Ttl {
  fn from(duration: Duration) -> Self {
    Ttl::Finite(duration)
  }
}

/// Implemented by the entity that owns an [`EvictionScheduler`].
pub trait Evictable: Send + Sync {
  /// Called when the eviction timer fires. The owner decides whether to
  /// actually remove itself.
  fn try_evict(&self);
}

struct PendingTimer {
  generation: u64,
  abort: AbortHandle,
}

struct EvictionState {
  ttl: Ttl,
  pending: Option<PendingTimer>,
  generation: u64,
  destroyed: bool,
}

impl EvictionState {
  fn cancel_pending(&mut self) -> bool {
    match self.pending.take() {
      Some(timer) => {
        timer.abort.abort();
        true
      }
      None => false,
    }
  }
}

/// Per-entity TTL and eviction timer.
pub struct EvictionScheduler {
  owner: Weak<dyn Evictable>,
  runtime: Arc<dyn Runtime>,
  context: ExecutionContext,
  state: Arc<Mutex<EvictionState>>,
}

impl EvictionScheduler {
  /// Creates an idle scheduler with a TTL of zero.
  ///
  /// The owner is held weakly; a timer firing after the owner is gone does
  /// nothing.
  pub fn new<O: Evictable + 'static>(
    owner: Weak<O>,
    runtime: Arc<dyn Runtime>,
    context: ExecutionContext,
  ) -> Self {
    let owner: Weak<dyn Evictable> = owner;
    Self {
      owner,
      runtime,
      context,
      state: Arc::new(Mutex::new(EvictionState {
        ttl: Ttl::ZERO,
        pending: None,
        generation: 0,
        destroyed: false,
      })),
    }
  }

  pub fn ttl(&self) -> Ttl {
    self.state.lock().ttl
  }

  /// Raises the TTL to `requested`, or to the context default when `None`.
  ///
  /// The TTL only ever grows: the longest lifetime any caller asked for wins.
  pub fn update_ttl(&self, requested: Option<Ttl>) {
    let requested = requested.unwrap_or_else(|| self.context.default_ttl());
    let mut state = self.state.lock();
    state.ttl = state.ttl.max(requested);
  }

  /// (Re)arms the eviction timer for the current TTL.
  ///
  /// Any pending timer is cancelled first. Nothing is armed for an infinite
  /// TTL or after [`destroy`](Self::destroy).
  pub fn schedule_eviction(&self) {
    let (delay, generation, registration) = {
      let mut state = self.state.lock();
      state.cancel_pending();
      if state.destroyed {
        return;
      }
      let Some(delay) = state.ttl.as_duration() else {
        return;
      };
      state.generation += 1;
      let (abort, registration) = AbortHandle::new_pair();
      state.pending = Some(PendingTimer {
        generation: state.generation,
        abort,
      });
      (delay, state.generation, registration)
    };

    tracing::trace!(?delay, generation, "eviction timer armed");

    let sleep = self.runtime.sleep(delay);
    let state = Arc::downgrade(&self.state);
    let owner = self.owner.clone();
    let timer = Abortable::new(
      async move {
        sleep.await;
        fire(&state, &owner, generation);
      },
      registration,
    );
    self.runtime.spawn(Box::pin(async move {
      let _ = timer.await;
    }));
  }

  /// Clears the pending timer, if any.
  pub fn cancel_eviction(&self) {
    if self.state.lock().cancel_pending() {
      tracing::trace!("eviction timer cancelled");
    }
  }

  /// Clears the pending timer and stops any further scheduling.
  pub fn destroy(&self) {
    let mut state = self.state.lock();
    state.cancel_pending();
    state.destroyed = true;
  }

  pub fn is_scheduled(&self) -> bool {
    self.state.lock().pending.is_some()
  }

  pub fn is_destroyed(&self) -> bool {
    self.state.lock().destroyed
  }
}

fn fire(state: &Weak<Mutex<EvictionState>>, owner: &Weak<dyn Evictable>, generation: u64) {
  let Some(state) = state.upgrade() else {
    return;
  };
  {
    let mut state = state.lock();
    // A timer that was cancelled or superseded while its sleep completed.
    match &state.pending {
      Some(timer) if timer.generation == generation => state.pending = None,
      _ => return,
    }
  }

  if let Some(owner) = owner.upgrade() {
    tracing::debug!(generation, "eviction timer fired");
    owner.try_evict();
  }
}

impl Drop for EvictionScheduler {
  fn drop(&mut self) {
    self.state.lock().cancel_pending();
  }
}

impl fmt::Debug for EvictionScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("EvictionScheduler")
      .field("ttl", &state.ttl)
      .field("scheduled", &state.pending.is_some())
      .field("destroyed", &state.destroyed)
      .field("context", &self.context)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn infinite_is_greater_than_any_duration() {
    assert!(Ttl::Infinite > Ttl::Finite(Duration::MAX));
    assert_eq!(Ttl::Finite(Duration::from_secs(1)).max(Ttl::ZERO), Ttl::Finite(Duration::from_secs(1)));
    assert_eq!(Ttl::Infinite.as_duration(), None);
  }
}
