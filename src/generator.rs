//! Candidate stream feeding the verification engine
//!
//! The producer task emits a lazy, deduplicated sequence into a bounded
//! channel: names harvested from online sources first, then the
//! dictionary × apex cross-product, then end-of-stream. Backpressure from
//! the channel keeps memory bounded regardless of dictionary size; the
//! dedup set only ever holds names that were actually emitted.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dict;

/// Capacity of the candidate channel between generator and sender.
pub const CHANNEL_CAPACITY: usize = 10_000;

/// A fully-qualified name awaiting verification. Immutable once emitted;
/// the retry counter is advanced only by the timeout scanner.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    /// Apex the name derives from, for wildcard-profile and special
    /// resolver lookups.
    pub apex: String,
    pub retries: u32,
}

impl Candidate {
    pub fn new(name: impl Into<String>, apex: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            apex: apex.into(),
            retries: 0,
        }
    }
}

/// Inputs for an enumeration run.
pub struct EnumPlan {
    pub apexes: Vec<String>,
    /// Normalized online-source names, keyed by apex. Empty under
    /// `--no-online`.
    pub online: HashMap<String, Vec<String>>,
    /// Dictionary file; the built-in list when absent.
    pub dictionary: Option<PathBuf>,
    pub online_only: bool,
    pub predict: bool,
}

/// Spawns the enumeration producer.
///
/// The dictionary is opened eagerly so a bad path fails the run before a
/// single packet is sent. The join handle resolves to the number of
/// candidates emitted, computed by the producer after the stream closes.
pub async fn spawn_enumeration(
    plan: EnumPlan,
) -> Result<(mpsc::Receiver<Candidate>, JoinHandle<u64>)> {
    let dictionary = match &plan.dictionary {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("failed to open dictionary {}", path.display()))?;
            Some(BufReader::with_capacity(64 * 1024, file))
        }
        None => None,
    };

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut seen: HashSet<String> = HashSet::new();
        let mut emitted = 0u64;

        for (apex, names) in &plan.online {
            for name in names {
                if !seen.insert(name.clone()) {
                    continue;
                }
                if tx
                    .send(Candidate::new(name.clone(), apex.clone()))
                    .await
                    .is_err()
                {
                    return emitted;
                }
                emitted += 1;
            }
        }

        if plan.online_only {
            info!(candidates = emitted, "online-only mode, skipping dictionary expansion");
            return emitted;
        }

        match dictionary {
            Some(mut reader) => {
                let mut line = String::new();
                loop {
                    line.clear();
                    let read = match reader.read_line(&mut line).await {
                        Ok(read) => read,
                        Err(e) => {
                            warn!(error = %e, "dictionary read failed");
                            break;
                        }
                    };
                    if read == 0 {
                        break;
                    }
                    let word = line.trim();
                    if word.is_empty() || word.starts_with('#') {
                        continue;
                    }
                    if !emit_word(word, &plan, &mut seen, &tx, &mut emitted).await {
                        return emitted;
                    }
                }
            }
            None => {
                for word in dict::default_words() {
                    if !emit_word(word, &plan, &mut seen, &tx, &mut emitted).await {
                        return emitted;
                    }
                }
            }
        }

        emitted
    });
    Ok((rx, handle))
}

/// Cross-product of one dictionary word (plus its predicted variants when
/// enabled) with every apex. Returns false once the consumer is gone.
async fn emit_word(
    word: &str,
    plan: &EnumPlan,
    seen: &mut HashSet<String>,
    tx: &mpsc::Sender<Candidate>,
    emitted: &mut u64,
) -> bool {
    let mut words = vec![word.to_string()];
    if plan.predict {
        words.extend(dict::predict_variants(word));
    }
    for word in &words {
        for apex in &plan.apexes {
            let name = format!("{}.{}", word, apex);
            if !seen.insert(name.clone()) {
                continue;
            }
            if tx.send(Candidate::new(name, apex.clone())).await.is_err() {
                return false;
            }
            *emitted += 1;
        }
    }
    true
}

/// Inputs for a verification run: names taken verbatim.
pub struct VerifyPlan {
    /// Names from `-d` flags and stdin.
    pub inline: Vec<String>,
    /// File of FQDNs, one per line.
    pub file: Option<PathBuf>,
}

/// Spawns the verification producer. Names pass through unchanged and
/// deduplicated; each candidate's apex is the name itself, so no wildcard
/// profile applies in this mode.
pub async fn spawn_verify(
    plan: VerifyPlan,
) -> Result<(mpsc::Receiver<Candidate>, JoinHandle<u64>)> {
    let file = match &plan.file {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("failed to open name list {}", path.display()))?;
            Some(BufReader::with_capacity(64 * 1024, file))
        }
        None => None,
    };

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut seen: HashSet<String> = HashSet::new();
        let mut emitted = 0u64;

        for raw in &plan.inline {
            if !send_verbatim(raw, &mut seen, &tx, &mut emitted).await {
                return emitted;
            }
        }
        if let Some(mut reader) = file {
            let mut line = String::new();
            loop {
                line.clear();
                let read = match reader.read_line(&mut line).await {
                    Ok(read) => read,
                    Err(e) => {
                        warn!(error = %e, "name list read failed");
                        break;
                    }
                };
                if read == 0 {
                    break;
                }
                if !send_verbatim(&line, &mut seen, &tx, &mut emitted).await {
                    return emitted;
                }
            }
        }
        emitted
    });
    Ok((rx, handle))
}

async fn send_verbatim(
    raw: &str,
    seen: &mut HashSet<String>,
    tx: &mpsc::Sender<Candidate>,
    emitted: &mut u64,
) -> bool {
    let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if name.is_empty() || name.starts_with('#') || !seen.insert(name.clone()) {
        return true;
    }
    let apex = name.clone();
    if tx.send(Candidate::new(name, apex)).await.is_err() {
        return false;
    }
    *emitted += 1;
    true
}
