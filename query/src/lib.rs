//! The asynchronous coordination core of a client-side query cache.
//!
//! `fibre_query` does not store data. It provides the four small state machines
//! that a query cache is built around:
//!
//! - **Retry Executor** ([`Retryer`]): runs a fallible future to completion with a
//!   configurable retry and backoff policy, pausing while the host is offline or
//!   unfocused, with exactly-once resolution under concurrent cancellation.
//! - **Eviction Scheduler** ([`EvictionScheduler`]): a monotone time-to-live and
//!   a single pending timer that asks its owner to evict when it fires.
//! - **Listener Registry** ([`ListenerRegistry`]): identity-deduplicated
//!   subscribers with first-subscribe / last-unsubscribe hooks.
//! - **Notification Scheduler** ([`NotifyManager`]): coalesces notifications
//!   produced inside a batch into a single delivery pass.
//!
//! All of them are runtime-agnostic. Timers and delays go through the
//! [`Runtime`] trait; the default `tokio` feature provides [`TokioRuntime`].

// Public modules that form the API
pub mod builder;
pub mod context;
pub mod error;
pub mod eviction;
pub mod listener;
pub mod notify;
pub mod policy;
pub mod retryer;
pub mod runtime;
pub mod signal;

// Internal, crate-only modules
mod sync;

// Re-export the primary user-facing types for convenience
pub use builder::RetryerBuilder;
pub use context::ExecutionContext;
pub use error::{BuildError, CancelledError, RetryError};
pub use eviction::{Evictable, EvictionScheduler, Ttl};
pub use listener::{ListenerRegistry, SubscriptionHooks, Unsubscribe};
pub use notify::{notify_manager, NotifyManager};
pub use policy::{default_retry_delay, NetworkMode, Retry, RetryDelay};
pub use retryer::{CancelOptions, Continuation, Outcome, RetryFuture, Retryer};
pub use runtime::Runtime;
#[cfg(feature = "tokio")]
pub use runtime::TokioRuntime;
pub use signal::{Availability, AvailabilityManager};
