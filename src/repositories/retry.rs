//! Retrying transaction runner for optimistic-concurrency stores.
//!
//! CockroachDB reports contention as a serialization failure (`40001`) and
//! expects the client to rerun the whole transaction. [`RetryCoordinator`]
//! does that for any [`UnitOfWork`]:
//!
//! ```text
//! START -> ATTEMPT -> SUCCESS             commit, return
//!                  -> TRANSIENT_CONFLICT  rollback, backoff, ATTEMPT (or RetriesExhausted)
//!                  -> FATAL_ERROR         rollback, return the error
//! ```
//!
//! A commit that fails with a serialization conflict counts as a transient
//! failure of that attempt. If the caller stops polling mid-attempt, or a
//! rollback fails, the session is abandoned rather than left mid-transaction.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::Rng;

use crate::config::RetryConfig;
use crate::error::AppError;

/// Transaction lifecycle on a single connection.
#[async_trait]
pub trait RetrySession: Send {
    async fn begin(&mut self) -> Result<(), AppError>;
    async fn commit(&mut self) -> Result<(), AppError>;
    async fn rollback(&mut self) -> Result<(), AppError>;

    /// Called when a transaction is left open, e.g. the caller's future was
    /// dropped mid-attempt or `ROLLBACK` failed. Must not block; sessions
    /// backed by a pooled connection should make sure it is not reused.
    fn abandon(&mut self) {}
}

/// One transaction's worth of statements.
///
/// Implementations must be safe to run more than once: every attempt starts
/// from a rolled-back transaction.
pub trait UnitOfWork<S: ?Sized>: Send + Sync {
    type Output: Send;

    fn run<'a>(&'a self, session: &'a mut S) -> BoxFuture<'a, Result<Self::Output, AppError>>;
}

/// Attempt budget and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th (1-based) failed attempt:
    /// `base_delay * 2^attempt * jitter`, jitter uniform in `[0.5, 1.5)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        self.backoff_with_jitter(attempt, jitter)
    }

    fn backoff_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.min(16) as i32;
        self.base_delay.mul_f64(2f64.powi(exponent) * jitter)
    }
}

/// Runs units of work inside transactions, retrying transient conflicts.
#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Executes `work` in a fresh transaction on `session` until it commits,
    /// fails with a non-transient error, or the attempt budget runs out.
    pub async fn execute<S, W>(&self, session: &mut S, work: &W) -> Result<W::Output, AppError>
    where
        S: RetrySession + ?Sized,
        W: UnitOfWork<S> + ?Sized,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut txn = OpenTransaction {
            session,
            open: false,
        };
        let mut attempt = 0;

        loop {
            attempt += 1;
            txn.open = true;
            if let Err(err) = txn.session.begin().await {
                txn.rollback().await;
                return Err(err);
            }

            let err = match work.run(&mut *txn.session).await {
                Ok(output) => match txn.session.commit().await {
                    Ok(()) => {
                        txn.open = false;
                        if attempt > 1 {
                            tracing::debug!(attempt, "Transaction committed after retry");
                        }
                        return Ok(output);
                    }
                    Err(err) => err,
                },
                Err(err) => err,
            };

            // A session that failed to roll back is not reused for a retry
            if !txn.rollback().await || !err.is_transient() {
                return Err(err);
            }

            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %err, "Transaction retries exhausted");
                return Err(AppError::RetriesExhausted {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = self.policy.backoff(attempt);
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Serialization conflict, retrying transaction"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Tracks whether `session` may still be inside a transaction.
///
/// Dropping it while `open` (cancellation, panic, failed rollback) abandons
/// the session.
struct OpenTransaction<'s, S: RetrySession + ?Sized> {
    session: &'s mut S,
    open: bool,
}

impl<S: RetrySession + ?Sized> OpenTransaction<'_, S> {
    /// Returns whether the transaction is known to be closed.
    async fn rollback(&mut self) -> bool {
        match self.session.rollback().await {
            Ok(()) => self.open = false,
            Err(err) => tracing::warn!(error = %err, "Failed to roll back transaction"),
        }
        !self.open
    }
}

impl<S: RetrySession + ?Sized> Drop for OpenTransaction<'_, S> {
    fn drop(&mut self) {
        if self.open {
            tracing::warn!("Abandoning session with an open transaction");
            self.session.abandon();
        }
    }
}
