use rand::Rng;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 250;
const JITTER_MAX_MS: u64 = 100;

/// Bounded retry with exponential backoff, shared by every external call
/// site. One policy instance per client, snapshotted from env at startup.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v >= 1)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let base_delay_ms = std::env::var("RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_BASE_DELAY_MS);
        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Run `op` up to `max_attempts` times, doubling the delay after each
    /// failure with a small random jitter. The final error is returned
    /// unchanged.
    pub async fn run<T, E, F, Fut>(&self, label: &'static str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    let backoff = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..=JITTER_MAX_MS));
                    warn!(
                        target = "snaplist.retry",
                        label,
                        attempt,
                        error = %err,
                        "call failed, backing off"
                    );
                    sleep(backoff + jitter).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
