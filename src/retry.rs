//! Bounded polling and retry primitives.
//!
//! Every wait in the crate (sandbox state, SSH readiness, bootstrap health,
//! the overall ensure budget, quota retries) goes through these helpers so
//! that interval, budget and cancellation behave the same everywhere.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a poll loop should do after one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Budget remains; the interval has been slept, probe again.
    Continue,
    /// The wall-clock budget is used up.
    Exhausted,
    /// The cancellation token fired while waiting.
    Cancelled,
}

/// Fixed-interval poller with a wall-clock budget.
///
/// The clock starts when the poller is created. `tick` sleeps one interval
/// (or whatever is left of the budget, if less) while racing cancellation.
#[derive(Debug)]
pub(crate) struct Poller {
    interval: Duration,
    budget: Duration,
    started: Instant,
    attempts: u32,
}

impl Poller {
    /// Creates a poller that probes every `interval` for at most `budget`.
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self {
            interval,
            budget,
            started: Instant::now(),
            attempts: 0,
        }
    }

    /// Time spent since the poller was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of completed ticks (one per probe that was followed by a wait).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the budget is already used up.
    pub fn is_exhausted(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Waits before the next probe.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Tick {
        if cancel.is_cancelled() {
            return Tick::Cancelled;
        }
        let remaining = self.budget.saturating_sub(self.elapsed());
        if remaining.is_zero() {
            return Tick::Exhausted;
        }
        self.attempts += 1;
        if sleep_or_cancel(self.interval.min(remaining), cancel).await {
            Tick::Continue
        } else {
            Tick::Cancelled
        }
    }
}

/// A wall-clock limit shared by the phases of one flow.
#[derive(Debug)]
pub(crate) struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    /// Starts the clock.
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// `budget`, shortened to whatever is left of the limit.
    pub fn cap(&self, budget: Duration) -> Duration {
        budget.min(self.limit.saturating_sub(self.started.elapsed()))
    }
}

/// Sleeps for `duration` unless cancelled first.
///
/// Returns `true` when the full duration elapsed, `false` on cancellation.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Retry policy for fallible one-shot operations.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

/// Outcome of [`retry_bounded`] when it does not succeed.
#[derive(Debug)]
pub(crate) enum RetryError<E> {
    /// The last error, returned when it was not retryable or attempts ran out.
    Failed(E),
    /// Cancelled between attempts.
    Cancelled,
}

/// Runs `operation` until it succeeds, fails with a non-retryable error,
/// or `policy.max_attempts` is reached.
pub(crate) async fn retry_bounded<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_retryable(&err) => {
                tracing::debug!(attempt, max = policy.max_attempts, "retrying after transient failure");
                if !sleep_or_cancel(policy.delay, cancel).await {
                    return Err(RetryError::Cancelled);
                }
                attempt += 1;
            }
            Err(err) => return Err(RetryError::Failed(err)),
        }
    }
}
