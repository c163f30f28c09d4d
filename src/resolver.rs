//! Upstream resolver pool
//!
//! Round-robin over a read-mostly set of recursive resolvers, built once at
//! startup. Apexes can carry a special resolver set (their authoritative
//! servers, discovered via `--ns`); candidates under such an apex are
//! routed there while everything else keeps using the default pool.

use anyhow::{bail, Context, Result};
use hickory_proto::rr::RecordType;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::packet;

/// Public recursive resolvers used when no `-r` file is supplied.
pub const DEFAULT_RESOLVERS: &[&str] = &[
    "1.1.1.1",
    "1.0.0.1",
    "8.8.8.8",
    "8.8.4.4",
    "9.9.9.9",
    "208.67.222.222",
];

pub struct ResolverPool {
    default: Vec<SocketAddr>,
    special: HashMap<String, Vec<SocketAddr>>,
    cursor: AtomicUsize,
}

impl ResolverPool {
    /// Builds a pool over an explicit resolver set. An empty set is an
    /// error: every selection path indexes into the default list.
    pub fn new(default: Vec<SocketAddr>) -> Result<Self> {
        if default.is_empty() {
            bail!("resolver pool is empty");
        }
        Ok(Self {
            default,
            special: HashMap::new(),
            cursor: AtomicUsize::new(0),
        })
    }

    /// The built-in public resolver set.
    pub fn builtin() -> Self {
        let default = DEFAULT_RESOLVERS
            .iter()
            .filter_map(|addr| addr.parse::<IpAddr>().ok())
            .map(|ip| SocketAddr::new(ip, 53))
            .collect();
        // The constant list always parses, so new() cannot fail here.
        Self {
            default,
            special: HashMap::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Reads a resolver list, one `ip` or `ip:port` per line. Unreadable
    /// files and unparseable lines are fatal.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to open resolver file {}", path.display()))?;
        let mut default = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            default.push(parse_resolver(line)?);
        }
        Self::new(default)
    }

    /// Installs per-apex resolver overrides.
    pub fn set_special(&mut self, special: HashMap<String, Vec<SocketAddr>>) {
        self.special = special;
    }

    /// Next resolver for a candidate: the apex override set when one is
    /// configured, otherwise round-robin over the default pool.
    pub fn select(&self, apex: &str) -> SocketAddr {
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        if let Some(set) = self.special.get(apex) {
            if !set.is_empty() {
                return set[turn % set.len()];
            }
        }
        self.default[turn % self.default.len()]
    }

    /// Round-robin over the default pool, ignoring overrides. Used by
    /// wildcard probing and NS discovery.
    pub fn next_default(&self) -> SocketAddr {
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.default[turn % self.default.len()]
    }

    pub fn len(&self) -> usize {
        self.default.len()
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_empty()
    }
}

fn parse_resolver(line: &str) -> Result<SocketAddr> {
    if let Ok(addr) = line.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip = line
        .parse::<IpAddr>()
        .with_context(|| format!("invalid resolver address: {}", line))?;
    Ok(SocketAddr::new(ip, 53))
}

/// Resolves each apex's NS records through the pool and returns the
/// authoritative server addresses, keyed by apex. Apexes whose NS lookup
/// fails simply keep using the default pool.
pub async fn discover_ns(
    pool: &ResolverPool,
    apexes: &[String],
    wait: Duration,
) -> HashMap<String, Vec<SocketAddr>> {
    let mut out = HashMap::new();
    for apex in apexes {
        let reply = match packet::lookup(apex, RecordType::NS, pool.next_default(), wait).await {
            Ok(message) => message,
            Err(e) => {
                debug!(apex = %apex, error = %e, "ns lookup failed");
                continue;
            }
        };
        let servers = packet::extract_ns(&reply);
        let mut addrs = Vec::new();
        for server in &servers {
            match packet::lookup(server, RecordType::A, pool.next_default(), wait).await {
                Ok(reply) => {
                    for ip in packet::extract_records(&reply).addresses {
                        addrs.push(SocketAddr::new(ip, 53));
                    }
                }
                Err(e) => debug!(ns = %server, error = %e, "ns address lookup failed"),
            }
        }
        if !addrs.is_empty() {
            info!(apex = %apex, ns = ?servers, "using authoritative resolvers");
            out.insert(apex.clone(), addrs);
        }
    }
    out
}
