//! Bounded retry controller for one-shot initialization.
//!
//! Unlike a retry loop, the controller never sleeps: every [`Retrier::trigger`]
//! call runs at most one attempt and remembers the outcome. Once an attempt
//! succeeds the controller is done for good; once `max_attempts` attempts have
//! failed it keeps returning [`Error::InitFailed`] without running anything.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    NotStarted,
    Attempting,
    FailedRetryable,
    Succeeded,
    FailedTerminal,
}

#[derive(Debug)]
pub struct Retrier {
    name: String,
    max_attempts: u32,
    delay: Duration,
    attempts: u32,
    status: RetryStatus,
    last_error: Option<String>,
    next_retry: Option<Instant>,
}

impl Retrier {
    #[must_use]
    pub fn new(name: impl Into<String>, max_attempts: u32, delay: Duration) -> Self {
        Self {
            name: name.into(),
            max_attempts: max_attempts.max(1),
            delay,
            attempts: 0,
            status: RetryStatus::NotStarted,
            last_error: None,
            next_retry: None,
        }
    }

    #[must_use]
    pub const fn status(&self) -> RetryStatus {
        self.status
    }

    /// Failed attempts so far
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// When a polite caller should try again; `None` unless the last attempt
    /// failed and more are allowed
    #[must_use]
    pub const fn next_retry(&self) -> Option<Instant> {
        self.next_retry
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.status = RetryStatus::NotStarted;
        self.last_error = None;
        self.next_retry = None;
    }

    /// Run one attempt unless the outcome is already settled.
    ///
    /// # Errors
    ///
    /// Returns the attempt's error, or [`Error::InitFailed`] once the attempt
    /// budget is spent
    pub async fn trigger<F, Fut>(&mut self, attempt: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        match self.status {
            RetryStatus::Succeeded => return Ok(()),
            RetryStatus::FailedTerminal => return Err(self.terminal_error()),
            RetryStatus::NotStarted | RetryStatus::Attempting | RetryStatus::FailedRetryable => {}
        }

        self.status = RetryStatus::Attempting;
        match attempt().await {
            Ok(()) => {
                info!("{}: attempt {} succeeded", self.name, self.attempts + 1);
                self.status = RetryStatus::Succeeded;
                self.last_error = None;
                self.next_retry = None;
                Ok(())
            }
            Err(e) => {
                self.attempts += 1;
                self.last_error = Some(e.to_string());
                if self.attempts >= self.max_attempts {
                    warn!(
                        "{}: giving up after {} attempts: {e}",
                        self.name, self.attempts
                    );
                    self.status = RetryStatus::FailedTerminal;
                    self.next_retry = None;
                } else {
                    debug!(
                        "{}: attempt {}/{} failed, next retry in {:?}: {e}",
                        self.name, self.attempts, self.max_attempts, self.delay
                    );
                    self.status = RetryStatus::FailedRetryable;
                    self.next_retry = Some(Instant::now() + self.delay);
                }
                Err(e)
            }
        }
    }

    fn terminal_error(&self) -> Error {
        Error::InitFailed {
            name: self.name.clone(),
            attempts: self.attempts,
            last_error: self.last_error.clone().unwrap_or_default(),
        }
    }
}
