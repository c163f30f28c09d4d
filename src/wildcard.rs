//! Wildcard apex detection and answer filtering
//!
//! An apex that answers arbitrary nonexistent labels poisons enumeration
//! with synthetic records. During startup each apex is probed with random
//! labels that cannot plausibly exist; an apex that answers is marked
//! wildcard and its synthetic address set captured in a profile. Profiles
//! are read-only after detection. The filter stage sits between the
//! receiver and the output fan-out and applies the configured mode to
//! every answer.

use clap::ValueEnum;
use hickory_proto::rr::RecordType;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::output::Answer;
use crate::packet;
use crate::progress::Metrics;
use crate::resolver::ResolverPool;

/// How synthetic answers are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WildFilterMode {
    /// Pass everything through.
    None,
    /// Drop answers whose address set is contained in the apex profile.
    Local,
    /// Like `local`, then re-query the name and emit it only if a stable
    /// non-synthetic answer reappears.
    Remote,
}

/// Per-apex wildcard classification, computed once during startup probing.
#[derive(Debug, Clone, Default)]
pub struct WildcardProfile {
    pub wildcard: bool,
    /// Addresses returned for nonsense labels under the apex.
    pub addresses: HashSet<IpAddr>,
}

const PROBE_LABEL_LEN: usize = 12;
/// Probes per apex; a single probe misclassifies behind flaky resolvers.
const PROBE_ROUNDS: usize = 2;

fn random_label() -> String {
    let mut rng = rand::thread_rng();
    (0..PROBE_LABEL_LEN)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}

/// Probes each apex and records the synthetic address set of those that
/// answer nonsense labels.
pub async fn detect_profiles(
    apexes: &[String],
    pool: &ResolverPool,
    wait: Duration,
) -> HashMap<String, WildcardProfile> {
    let mut out = HashMap::new();
    for apex in apexes {
        let mut profile = WildcardProfile::default();
        for _ in 0..PROBE_ROUNDS {
            let host = format!("{}.{}", random_label(), apex);
            match packet::lookup(&host, RecordType::A, pool.next_default(), wait).await {
                Ok(message) => {
                    let records = packet::extract_records(&message);
                    if !records.addresses.is_empty() {
                        profile.wildcard = true;
                        profile.addresses.extend(records.addresses);
                    }
                }
                Err(e) => debug!(apex = %apex, error = %e, "wildcard probe unanswered"),
            }
        }
        if profile.wildcard {
            info!(apex = %apex, addresses = ?profile.addresses, "wildcard apex detected");
        }
        out.insert(apex.clone(), profile);
    }
    out
}

/// An answer is synthetic when it has addresses and every one of them is
/// in the apex wildcard set.
pub fn is_synthetic(addresses: &[IpAddr], profile: &WildcardProfile) -> bool {
    profile.wildcard
        && !addresses.is_empty()
        && addresses.iter().all(|ip| profile.addresses.contains(ip))
}

/// Filter stage between the receiver and the output fan-out. Suppressed
/// answers are counted and dropped; everything else is forwarded in
/// arrival order.
pub fn spawn_filter(
    mode: WildFilterMode,
    profiles: Arc<HashMap<String, WildcardProfile>>,
    pool: Arc<ResolverPool>,
    wait: Duration,
    metrics: Arc<Metrics>,
    mut answers: mpsc::Receiver<Answer>,
    accepted: mpsc::Sender<Answer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(mut answer) = answers.recv().await {
            if keep(mode, &profiles, &pool, wait, &answer).await {
                if accepted.send(answer).await.is_err() {
                    break;
                }
            } else {
                answer.suppressed = true;
                metrics.filtered.fetch_add(1, Ordering::Relaxed);
                debug!(name = %answer.name, "suppressed wildcard answer");
            }
        }
    })
}

async fn keep(
    mode: WildFilterMode,
    profiles: &HashMap<String, WildcardProfile>,
    pool: &ResolverPool,
    wait: Duration,
    answer: &Answer,
) -> bool {
    if mode == WildFilterMode::None {
        return true;
    }
    let Some(profile) = profiles.get(&answer.apex) else {
        return true;
    };
    if is_synthetic(&answer.addresses, profile) {
        return false;
    }
    if mode == WildFilterMode::Remote && profile.wildcard {
        // Confirm the name still resolves to a non-synthetic set.
        return match packet::lookup(&answer.name, RecordType::A, pool.next_default(), wait).await
        {
            Ok(message) => {
                let records = packet::extract_records(&message);
                !records.addresses.is_empty() && !is_synthetic(&records.addresses, profile)
            }
            Err(_) => false,
        };
    }
    true
}
