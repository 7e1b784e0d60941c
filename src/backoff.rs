//! Retry delay policy and task suspension.
//!
//! Failed page fetches are retried after a delay chosen by the error's
//! [`BackoffClass`]. Delays grow linearly with the attempt number, are capped,
//! and get a small random jitter so several sources backing off together do
//! not hit their sites in lockstep.
//!
//! # Delay formula
//!
//! ```text
//! delay = min(class_base * attempt, max_delay) + random_jitter(0..=jitter_ms)
//! ```
//!
//! Suspension itself goes through the [`Pacer`] trait: the pagination
//! controller asks to be paused for a duration and resumes at its fetching
//! state afterwards. [`TokioPacer`] sleeps on the tokio timer.

use futures::future::BoxFuture;
use rand::{Rng, rng};
use std::time::Duration;
use tokio::time::sleep;

/// Delay class of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffClass {
    /// HTTP 429: long delay.
    RateLimited,
    /// HTTP 403: medium delay.
    Blocked,
    /// Timeouts, connection errors, server errors: short delay.
    Transient,
    /// Retrying cannot help (404, unparseable content).
    Fatal,
}

/// Per-class base delays for retrying the same page.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    rate_limited_base: Duration,
    blocked_base: Duration,
    transient_base: Duration,
    max_delay: Duration,
    jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            rate_limited_base: Duration::from_secs(10),
            blocked_base: Duration::from_secs(5),
            transient_base: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            jitter_ms: 250,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy from explicit per-class base delays.
    ///
    /// # Arguments
    ///
    /// * `rate_limited_base` - Base delay after an HTTP 429
    /// * `blocked_base` - Base delay after an HTTP 403
    /// * `transient_base` - Base delay after any other retryable failure
    /// * `max_delay` - Cap applied before jitter
    pub fn new(
        rate_limited_base: Duration,
        blocked_base: Duration,
        transient_base: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            rate_limited_base,
            blocked_base,
            transient_base,
            max_delay,
            jitter_ms: 250,
        }
    }

    /// Disable jitter, making [`BackoffPolicy::delay`] deterministic.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ms = 0;
        self
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    ///
    /// Returns `None` for [`BackoffClass::Fatal`]: such failures are not retried.
    pub fn base_delay(&self, class: BackoffClass, attempt: u32) -> Option<Duration> {
        let base = match class {
            BackoffClass::RateLimited => self.rate_limited_base,
            BackoffClass::Blocked => self.blocked_base,
            BackoffClass::Transient => self.transient_base,
            BackoffClass::Fatal => return None,
        };
        Some(base.saturating_mul(attempt.max(1)).min(self.max_delay))
    }

    /// Delay before retry number `attempt`, jitter included.
    pub fn delay(&self, class: BackoffClass, attempt: u32) -> Option<Duration> {
        let delay = self.base_delay(class, attempt)?;
        if self.jitter_ms == 0 {
            return Some(delay);
        }
        let jitter_ms: u64 = rng().random_range(0..=self.jitter_ms);
        Some(delay + Duration::from_millis(jitter_ms))
    }
}

/// Suspends the current source's task for a given duration.
pub trait Pacer: Send + Sync {
    fn pause(&self, delay: Duration) -> BoxFuture<'_, ()>;
}

/// [`Pacer`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPacer;

impl Pacer for TokioPacer {
    fn pause(&self, delay: Duration) -> BoxFuture<'_, ()> {
        Box::pin(sleep(delay))
    }
}

/// Pacer that records requested pauses instead of sleeping.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingPacer {
    pauses: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingPacer {
    pub(crate) fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Pacer for RecordingPacer {
    fn pause(&self, delay: Duration) -> BoxFuture<'_, ()> {
        self.pauses.lock().unwrap().push(delay);
        Box::pin(futures::future::ready(()))
    }
}
