//! Caller-supplied deadline for plugin operations.
//!
//! Every network call made on behalf of a request (ping, begin, each statement,
//! commit) is run through [`RequestContext::run`], so a caller timeout aborts
//! in-flight I/O instead of leaking it.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    started: Instant,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self {
            started: Instant::now(),
            deadline: None,
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: Some(started + timeout),
        }
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            started: Instant::now(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Run `fut` under this context's deadline.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let Some(deadline) = self.deadline else {
            return fut.await;
        };
        match timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(
                operation,
                self.started.elapsed().as_secs() as u32,
            )),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}
