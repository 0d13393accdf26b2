//! Bounded retry of driver calls.
//!
//! Every attempt is classified: retryable failures are repeated up to the
//! configured limit with a linearly growing delay, fatal ones stop at once.

use std::ops::ControlFlow;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::driver::{BrowserDriver, DriverError};
use crate::error::ErrorClass;
use crate::models::CrawlerConfig;

/// Final outcome of a retried call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    /// Every allowed attempt failed with a retryable error
    Exhausted(DriverError),
    Fatal(DriverError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub limit: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(limit: u32, delay: Duration) -> Self {
        Self { limit, delay }
    }

    /// Decide what follows failed attempt number `attempt` (1-based).
    pub fn after_failure<T>(&self, attempt: u32, error: DriverError) -> ControlFlow<Attempt<T>, Duration> {
        match error.class() {
            ErrorClass::Fatal => ControlFlow::Break(Attempt::Fatal(error)),
            ErrorClass::Retryable if attempt > self.limit => {
                ControlFlow::Break(Attempt::Exhausted(error))
            }
            ErrorClass::Retryable => {
                log::debug!("Attempt {attempt} failed ({error}), retrying");
                ControlFlow::Continue(self.delay * attempt)
            }
        }
    }

    /// Run `op` against `driver` until it succeeds, fails fatally, or runs out of attempts.
    pub async fn run<T, F>(&self, driver: &mut dyn BrowserDriver, mut op: F) -> Attempt<T>
    where
        F: for<'d> FnMut(&'d mut dyn BrowserDriver) -> BoxFuture<'d, Result<T, DriverError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(&mut *driver).await {
                Ok(value) => return Attempt::Done(value),
                Err(error) => match self.after_failure(attempt, error) {
                    ControlFlow::Break(outcome) => return outcome,
                    ControlFlow::Continue(delay) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                },
            }
        }
    }
}

impl From<&CrawlerConfig> for RetryPolicy {
    fn from(config: &CrawlerConfig) -> Self {
        Self::new(config.retry_limit, Duration::from_millis(config.retry_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CrawlerConfig::default())
    }
}
