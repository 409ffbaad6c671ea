//! Poll loop and backoff controller.
//!
//! ```text
//! Initial ──probe──▶ Polling ──Pending, budget left──▶ sleep ──▶ Polling
//!                       │
//!                       ├── Success ─────────────▶ Terminal(Ok)
//!                       ├── Failure ─────────────▶ Terminal(Err)
//!                       └── Pending, budget spent ▶ Terminal(Timeout)
//! ```
//!
//! The first check happens immediately. Sleeps are clamped to the remaining
//! budget, so the last check lands on the deadline and a timeout is never
//! reported early. Both the probe and the sleep race the caller's
//! cancellation token, and a check still in flight at the deadline is
//! abandoned.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{BackoffPolicy, ReconcilerConfig};
use crate::error::{PollError, Result};
use crate::prober::Prober;
use crate::verdict::PollVerdict;

/// Elapsed-time accounting for one reconciliation.
#[derive(Debug)]
pub struct PollBudget {
    started: Instant,
    max: Duration,
    delay: Duration,
}

impl PollBudget {
    pub fn new(max: Duration, backoff: &BackoffPolicy) -> Self {
        Self {
            started: Instant::now(),
            max,
            delay: backoff.first(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.max.saturating_sub(self.elapsed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.elapsed() >= self.max
    }

    /// When in-flight checks are abandoned. A zero budget has no deadline:
    /// its single check always runs to completion.
    fn deadline(&self) -> Option<Instant> {
        if self.max.is_zero() {
            return None;
        }
        self.started.checked_add(self.max)
    }

    /// Wait before the next check, clamped to the remaining budget. Advances
    /// the backoff for the check after that.
    fn next_wait(&mut self, backoff: &BackoffPolicy) -> Duration {
        let wait = self.delay.min(self.remaining());
        self.delay = backoff.next(self.delay);
        wait
    }
}

/// Drives a [`Prober`] until it reaches a terminal verdict, the budget runs
/// out or the caller cancels.
pub struct PollLoop<'a> {
    config: &'a ReconcilerConfig,
    cancel: &'a CancellationToken,
}

impl<'a> PollLoop<'a> {
    pub fn new(config: &'a ReconcilerConfig, cancel: &'a CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Poll until terminal. Each call starts from a fresh budget.
    pub async fn run<P: Prober>(&self, prober: &mut P, max: Duration) -> Result<P::Output> {
        let mut budget = PollBudget::new(max, &self.config.backoff);
        let mut checks = 0u32;

        loop {
            checks += 1;
            match self.tick(prober, &budget).await {
                PollVerdict::Success(output) => {
                    debug!(
                        "{} finished after {} check(s) in {:?}",
                        prober.description(),
                        checks,
                        budget.elapsed()
                    );
                    return Ok(output);
                }
                PollVerdict::Failure(e) => return Err(e),
                PollVerdict::Pending(reason) => {
                    if budget.is_exhausted() {
                        warn!(
                            "Timed out waiting for {} after {:?}: {}",
                            prober.description(),
                            budget.elapsed(),
                            reason
                        );
                        return Err(PollError::Timeout {
                            description: prober.description().to_string(),
                            elapsed: budget.elapsed(),
                            last_reason: reason,
                        });
                    }
                    let wait = budget.next_wait(&self.config.backoff);
                    debug!("{}; next check in {:?}", reason, wait);
                    self.sleep(wait, prober.description()).await?;
                }
            }
        }
    }

    /// One check plus its transient retries.
    async fn tick<P: Prober>(&self, prober: &mut P, budget: &PollBudget) -> PollVerdict<P::Output> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let checked = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Checked::Cancelled,
                verdict = prober.probe() => Checked::Done(verdict),
                _ = deadline(budget) => Checked::Overran,
            };
            let verdict = match checked {
                Checked::Done(verdict) => verdict,
                Checked::Cancelled => {
                    return PollVerdict::Failure(self.cancelled(prober.description()))
                }
                Checked::Overran => {
                    return PollVerdict::Pending(format!(
                        "check of {} still in flight at the deadline",
                        prober.description()
                    ))
                }
            };

            match verdict {
                PollVerdict::Failure(e)
                    if e.is_transient()
                        && attempts <= self.config.transient_retries
                        && !budget.is_exhausted() =>
                {
                    warn!(
                        "Transient failure checking {} (attempt {}): {}",
                        prober.description(),
                        attempts,
                        e
                    );
                    let wait = self.config.transient_retry_delay.min(budget.remaining());
                    if let Err(e) = self.sleep(wait, prober.description()).await {
                        return PollVerdict::Failure(e);
                    }
                }
                // out of time mid-retry: report it as pending so the caller
                // sees a timeout
                PollVerdict::Failure(e) if e.is_transient() && budget.is_exhausted() => {
                    return PollVerdict::Pending(e.to_string());
                }
                PollVerdict::Failure(PollError::Transport { source, .. }) => {
                    return PollVerdict::Failure(PollError::Transport { source, attempts });
                }
                other => return other,
            }
        }
    }

    async fn sleep(&self, wait: Duration, description: &str) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled(description)),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    fn cancelled(&self, description: &str) -> PollError {
        debug!("Wait for {} cancelled", description);
        PollError::Cancelled {
            description: description.to_string(),
        }
    }
}

enum Checked<T> {
    Done(PollVerdict<T>),
    Cancelled,
    Overran,
}

async fn deadline(budget: &PollBudget) {
    match budget.deadline() {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
