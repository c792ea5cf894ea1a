//! Per-call cancellation and deadlines.
//!
//! # Purpose
//! Every adapter operation has a `*_ctx` variant taking an [`OpContext`]. The
//! context races the storage future against a cancellation token and an
//! optional deadline; whichever fires first decides the outcome.
//!
//! # Key invariants
//! - A losing storage future is dropped, never detached. An open sqlx
//!   transaction rolls back when its guard drops.
//! - A context that is already cancelled or expired fails before any I/O.
use crate::error::{StoreError, StoreResult};
use std::future::{Future, pending};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline for one adapter call.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Context that never cancels and never expires.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token: Some(token),
            deadline: None,
        }
    }

    /// Add a deadline `timeout` from now (the earlier deadline wins).
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Add an absolute deadline (the earlier deadline wins).
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Drive `operation` to completion unless cancelled or out of time first.
    pub async fn run<T, F>(&self, operation: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if self.deadline.is_some_and(|at| at <= Instant::now()) {
            return Err(StoreError::DeadlineExceeded);
        }

        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(StoreError::Cancelled),
            _ = expired => Err(StoreError::DeadlineExceeded),
            result = operation => result,
        }
    }
}
