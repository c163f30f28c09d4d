//! Live progress counters for the verification pipeline
//!
//! The engine increments atomic counters; a reporter task renders them to
//! stderr once per second. The reporter consumes completion events only,
//! never the answers themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::wait_flag;

#[derive(Debug, Default)]
pub struct Metrics {
    /// Packets put on the wire, retransmissions included.
    pub sent: AtomicU64,
    /// Replies matched to a pending query.
    pub received: AtomicU64,
    /// Answers delivered to the sinks.
    pub found: AtomicU64,
    /// Answers suppressed by the wildcard filter.
    pub filtered: AtomicU64,
    /// Retransmissions issued by the timeout scanner.
    pub retried: AtomicU64,
    /// Queries dropped after the retry ceiling.
    pub dropped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Renders a one-line status to stderr every second until the shutdown
/// flag is raised.
pub fn spawn_reporter(
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let mut last_sent = 0u64;
        loop {
            tokio::select! {
                _ = wait_flag(&mut shutdown) => break,
                _ = tick.tick() => {
                    let sent = metrics.sent.load(Ordering::Relaxed);
                    let rate = sent.saturating_sub(last_sent);
                    last_sent = sent;
                    eprint!(
                        "\r{} sent ({}/s) | {} recv | {} found | {} filtered | {} retried | {} dropped | {}s   ",
                        sent,
                        rate,
                        metrics.received.load(Ordering::Relaxed),
                        metrics.found.load(Ordering::Relaxed),
                        metrics.filtered.load(Ordering::Relaxed),
                        metrics.retried.load(Ordering::Relaxed),
                        metrics.dropped.load(Ordering::Relaxed),
                        started.elapsed().as_secs(),
                    );
                }
            }
        }
        eprintln!();
    })
}
