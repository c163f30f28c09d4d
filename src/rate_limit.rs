//! Outbound rate shaping for the DNS send loop
//!
//! Every packet the engine puts on the wire first takes one token from a
//! bucket sized to the one-second packet budget. The bucket refills
//! continuously in sub-second slices, so burst behavior is bounded by the
//! capacity and the steady-state rate converges on the configured budget.
//!
//! The budget itself comes from a bandwidth expression (`2M`, `500k`) that
//! is converted to packets per second assuming an 80-byte query on the wire.

use anyhow::{bail, Context, Result};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Wire size of a typical QTYPE=A query, used to turn a bandwidth budget
/// into packets per second.
const QUERY_WIRE_BYTES: u64 = 80;

/// Parses a bandwidth expression like `2M`, `500k` or a plain number into
/// packets per second.
///
/// The number is read as bits per second with binary `k`/`m`/`g`
/// multipliers. A budget that works out to zero packets per second is an
/// error; the engine refuses to start rather than silently stalling.
///
/// # Arguments
/// * `band` - Bandwidth expression from the CLI
///
/// # Returns
/// * `Result<u64>` - Packets per second (at least 1) or an error for a
///   malformed or zero budget
pub fn parse_band(band: &str) -> Result<u64> {
    let trimmed = band.trim();
    if trimmed.is_empty() {
        bail!("empty bandwidth expression");
    }
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1024u64),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid bandwidth expression: {}", band))?;
    let packets = value.saturating_mul(multiplier) / 8 / QUERY_WIRE_BYTES;
    if packets == 0 {
        bail!(
            "bandwidth {} is below one query per second, refusing to start",
            band
        );
    }
    Ok(packets)
}

struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

/// Token bucket pacing the sender.
///
/// Capacity equals the nominal one-second budget. `acquire` blocks until a
/// token is available and consumes it; burst behavior is bounded by the
/// capacity.
pub struct RateGovernor {
    rate: u64,
    capacity: u64,
    state: Mutex<BucketState>,
}

impl RateGovernor {
    /// Creates a governor for `rate_pps` packets per second. The bucket
    /// starts full so the first second of a run can burst to capacity.
    pub fn new(rate_pps: u64) -> Self {
        let rate = rate_pps.max(1);
        Self {
            rate,
            capacity: rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Packets per second this governor was built with.
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Blocks until one token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = self.try_acquire().await;
            if wait == Duration::ZERO {
                return;
            }
            sleep(wait).await;
        }
    }

    /// Takes a token if one is available, otherwise returns how long to
    /// wait before trying again.
    async fn try_acquire(&self) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let elapsed_ms = now.duration_since(state.last_refill).as_millis() as u64;
        let refill = elapsed_ms * self.rate / 1000;
        if refill > 0 {
            state.tokens = (state.tokens + refill).min(self.capacity);
            if state.tokens == self.capacity {
                state.last_refill = now;
            } else {
                // Advance only by the time the refill accounted for, so
                // fractional tokens are not lost at low rates.
                state.last_refill += Duration::from_millis(refill * 1000 / self.rate);
            }
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            Duration::ZERO
        } else {
            Duration::from_millis((1000 / self.rate).clamp(1, 50))
        }
    }
}
