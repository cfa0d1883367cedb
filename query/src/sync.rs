use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

use futures_util::task::AtomicWaker;
use parking_lot::Mutex;

/// A single-waiter, one-way latch.
///
/// The retry loop parks on it while paused; signal changes, an explicit
/// continue, or resolution of the retryer release it. Releasing twice is fine.
#[derive(Debug, Default)]
pub(crate) struct Gate {
  released: AtomicBool,
  waker: AtomicWaker,
}

impl Gate {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn release(&self) {
    self.released.store(true, Ordering::Release);
    self.waker.wake();
  }

  pub(crate) fn is_released(&self) -> bool {
    self.released.load(Ordering::Acquire)
  }

  pub(crate) fn wait(&self) -> GateWait<'_> {
    GateWait { gate: self }
  }
}

pub(crate) struct GateWait<'a> {
  gate: &'a Gate,
}

impl Future for GateWait<'_> {
  type Output = ();

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    if self.gate.is_released() {
      return Poll::Ready(());
    }
    self.gate.waker.register(cx.waker());
    // Re-check after registering, a release may have raced the registration.
    if self.gate.is_released() {
      Poll::Ready(())
    } else {
      Poll::Pending
    }
  }
}

/// A write-once slot that any number of tasks can wait on.
pub(crate) struct SettleSlot<T> {
  inner: Mutex<SlotInner<T>>,
}

struct SlotInner<T> {
  value: Option<T>,
  waiters: Vec<Waker>,
}

impl<T: Clone> SettleSlot<T> {
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(SlotInner {
        value: None,
        waiters: Vec::new(),
      }),
    }
  }

  /// Stores `value` and wakes every waiter. Returns `false`, dropping `value`,
  /// if the slot was already settled.
  pub(crate) fn settle(&self, value: T) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if inner.value.is_some() {
        return false;
      }
      inner.value = Some(value);
      std::mem::take(&mut inner.waiters)
    };
    for waker in waiters {
      waker.wake();
    }
    true
  }

  pub(crate) fn get(&self) -> Option<T> {
    self.inner.lock().value.clone()
  }

  pub(crate) fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<T> {
    let mut inner = self.inner.lock();
    match &inner.value {
      Some(value) => Poll::Ready(value.clone()),
      None => {
        if !inner.waiters.iter().any(|w| w.will_wake(cx.waker())) {
          inner.waiters.push(cx.waker().clone());
        }
        Poll::Pending
      }
    }
  }
}
