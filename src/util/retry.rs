//! Bounded retry with exponential backoff + jitter for idempotent upstream
//! reads. Transient failures (network errors, 5xx) are retried; everything
//! else bubbles up immediately. Business-level per-record error handling is
//! deliberately NOT routed through here.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Classification wrapper for a failed attempt.
pub enum Retryable<E> {
    Transient(E),
    Permanent(E),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 300,
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        Self {
            max_attempts: crate::util::env::env_parse("SYNC_MAX_RETRIES", 3u32),
            base_delay_ms: crate::util::env::env_parse("SYNC_RETRY_BASE_MS", 300u64),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Retryable<E>>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delay = Duration::from_millis(self.base_delay_ms.max(1));
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(Retryable::Permanent(e)) => return Err(e),
                Err(Retryable::Transient(e)) => {
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
                    warn!(what, attempt, error = %e, "transient failure; backing off");
                    tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}

/// Map a reqwest response status into retry classification: 5xx transient,
/// other non-success permanent.
pub fn status_retryable(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
}
