//! Caller-supplied deadlines for external lookups.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// A lookup did not finish before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// Absolute point in time by which a lookup must complete.
///
/// A single deadline is usually derived once per call event and shared by
/// every lookup the event triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Deadline at an absolute instant.
    #[must_use]
    pub const fn at(at: Instant) -> Self {
        Self { at }
    }

    /// The instant this deadline expires.
    #[must_use]
    pub const fn instant(&self) -> Instant {
        self.at
    }

    /// Time left before expiry (zero once expired).
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Drive `future` to completion unless the deadline passes first.
    ///
    /// # Errors
    /// Returns [`DeadlineExceeded`] when the deadline elapses before `future` resolves.
    pub async fn run<F>(self, future: F) -> Result<F::Output, DeadlineExceeded>
    where
        F: Future,
    {
        tokio::time::timeout_at(self.at, future)
            .await
            .map_err(|_| DeadlineExceeded)
    }
}
