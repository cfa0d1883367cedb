use crate::eviction::Ttl;
use crate::policy::Retry;

use std::time::Duration;

/// The time-to-live an idle entry gets in an interactive context when its owner
/// does not request one.
pub const DEFAULT_INTERACTIVE_TTL: Duration = Duration::from_secs(5 * 60);

/// The number of retries a failing attempt gets in an interactive context when
/// no retry policy is configured.
pub const DEFAULT_INTERACTIVE_RETRIES: u32 = 3;

/// Distinguishes a long-lived interactive client from a headless one
/// (server-side rendering, batch jobs, tests of server code).
///
/// Headless processes never garbage collect entries on a timer and do not retry
/// by default: nobody is waiting on a screen for the data to show up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ExecutionContext {
  #[default]
  Interactive,
  Headless,
}

impl ExecutionContext {
  /// The TTL applied by `update_ttl(None)`.
  pub fn default_ttl(&self) -> Ttl {
    match self {
      ExecutionContext::Interactive => Ttl::Finite(DEFAULT_INTERACTIVE_TTL),
      ExecutionContext::Headless => Ttl::Infinite,
    }
  }

  /// The retry policy used when a retryer is built without one.
  pub fn default_retry<E>(&self) -> Retry<E> {
    match self {
      ExecutionContext::Interactive => Retry::Times(DEFAULT_INTERACTIVE_RETRIES),
      ExecutionContext::Headless => Retry::Never,
    }
  }

  pub fn is_headless(&self) -> bool {
    matches!(self, ExecutionContext::Headless)
  }
}
