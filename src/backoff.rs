//! Bounded retry with exponential backoff for flaky network calls
//!
//! Used by the online-source aggregator to absorb one-off HTTP failures
//! before a source is skipped for the run. DNS retransmission does not go
//! through here; the timeout scanner owns that schedule.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

pub struct BackoffConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    /// Randomize each delay by ±10% so parallel callers spread out.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            factor: 2.0,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

/// Runs `operation` until it succeeds, `is_transient` rejects the error,
/// or the attempt budget is spent. The last error is returned unchanged.
pub async fn with_backoff<F, Fut, T, E, P>(
    operation: F,
    is_transient: P,
    config: &BackoffConfig,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;
    loop {
        let result = operation().await;
        match &result {
            Ok(_) => return result,
            Err(err) => {
                attempt += 1;
                if attempt >= config.max_attempts || !is_transient(err) {
                    return result;
                }
                let mut wait = delay_ms;
                if config.jitter {
                    let spread = rand::thread_rng().gen_range(0.9..1.1);
                    wait = (wait as f64 * spread) as u64;
                }
                let wait = wait.min(config.max_delay_ms);
                debug!(attempt, wait_ms = wait, "retrying after transient failure");
                sleep(Duration::from_millis(wait)).await;
                delay_ms = ((delay_ms as f64) * config.factor) as u64;
            }
        }
    }
}
