//! Backoff for transient transport failures.
//!
//! Only the transport retries. Helpers and providers never retry on their own,
//! and structured statuses such as 404 or 409 are never retried. Requests that
//! may change remote state are replayed only when the server cannot have acted
//! on them: a refused connection or a 429.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use docsync_common::{Error, Result};

/// Backoff policy of the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    /// Cap of the doubling delay.
    pub max_delay_ms: u64,
    /// Scale each delay by a random factor in [0.75, 1.25).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt`, counted from zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let capped = self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        let millis = if self.jitter {
            (capped as f64 * (0.75 + rand::random::<f64>() * 0.5)) as u64
        } else {
            capped
        };
        Duration::from_millis(millis)
    }
}

/// Whether a transport failure is worth another attempt.
pub fn is_transient(err: &Error) -> bool {
    match err {
        Error::Network(_) | Error::Connect(_) | Error::Io(_) => true,
        Error::Http { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

/// Runs a request under a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of
    /// retries. `what` names the request in log lines.
    pub async fn execute<F, Fut, T>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_when(what, |outcome| matches!(outcome, Err(err) if is_transient(err)), operation)
            .await
    }

    /// Run `operation` again while `retry_on` accepts its outcome and retries
    /// remain. The last outcome is returned as is, `Ok` included.
    pub async fn execute_when<F, Fut, T, P>(&self, what: &str, retry_on: P, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Result<T>) -> bool,
    {
        let mut attempt = 0;
        loop {
            let outcome = operation().await;
            if !retry_on(&outcome) {
                if attempt > 0 {
                    match &outcome {
                        Ok(_) => debug!(request = what, "Settled after {} retries", attempt),
                        Err(err) => warn!(request = what, "Failed after {} retries: {}", attempt, err),
                    }
                }
                return outcome;
            }
            if attempt >= self.config.max_retries {
                warn!(request = what, "Giving up after {} attempts", attempt + 1);
                return outcome;
            }

            let delay = self.config.backoff(attempt);
            attempt += 1;
            warn!(request = what, "Transient failure, retry {} in {:?}", attempt, delay);
            sleep(delay).await;
        }
    }
}
