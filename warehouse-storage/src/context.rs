//! Cancellable operation context.
//!
//! Every store and cache call takes an [`OpContext`]. It carries an optional
//! deadline and a cancellation token; [`OpContext::run`] races a future
//! against both and drops the future if either fires first. Dropping a
//! pending semaphore or lock acquisition releases whatever it was waiting
//! for, so an aborted call leaves no residual state behind.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use warehouse_core::CancelReason;

/// Deadline and cancellation scope for a single operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl OpContext {
    /// A context that never times out and is only cancelled explicitly.
    pub fn background() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    /// Derive a context that expires `timeout` from now or when this one
    /// does, whichever comes first. Cancelling the parent cancels the child.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => parent.min(candidate),
            None => candidate,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> Result<(), CancelReason> {
        if self.token.is_cancelled() {
            return Err(CancelReason::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CancelReason::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Drive `fut` until it completes or the context is done.
    ///
    /// A context that is already done never polls `fut` at all.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CancelReason> {
        self.check()?;
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Err(CancelReason::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(CancelReason::DeadlineExceeded),
                out = fut => Ok(out),
            },
            None => tokio::select! {
                biased;
                _ = self.token.cancelled() => Err(CancelReason::Cancelled),
                out = fut => Ok(out),
            },
        }
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}
