//! Online subdomain sources and the startup aggregator
//!
//! Three free sources (certificate-transparency search, a passive-DNS HTML
//! index, a host-search API) are always queried; keyed services are
//! switched on by `config.json`. For each apex every enabled source runs
//! concurrently and the union of normalized names feeds the candidate
//! generator. A failing source is logged and skipped; it never aborts the
//! run.

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use futures::future::join_all;
use regex::Regex;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::backoff::{with_backoff, BackoffConfig};
use crate::config::AppConfig;
use crate::normalize::normalize_host;

/// Hard cap on names taken from a single source for a single apex, so a
/// misbehaving service cannot exhaust memory.
pub const PER_SOURCE_CAP: usize = 100_000;

/// Pause between apexes so free sources do not rate-limit a batch.
const INTER_APEX_DELAY: Duration = Duration::from_millis(500);

const USER_AGENT: &str = "Mozilla/5.0 (compatible; subrake)";

/// One upstream subdomain provider. Each variant holds only its
/// credentials; querying is a pure function of `(apex)`.
pub enum Source {
    CrtSh,
    RapidDns,
    HackerTarget,
    Fofa {
        email: String,
        key: String,
        size: u32,
        syntax: Option<String>,
    },
    VirusTotal {
        key: String,
    },
    BinaryEdge {
        key: String,
    },
    CertSpotter {
        key: Option<String>,
    },
}

impl Source {
    pub fn name(&self) -> &'static str {
        match self {
            Source::CrtSh => "crtsh",
            Source::RapidDns => "rapiddns",
            Source::HackerTarget => "hackertarget",
            Source::Fofa { .. } => "fofa",
            Source::VirusTotal { .. } => "virustotal",
            Source::BinaryEdge { .. } => "binaryedge",
            Source::CertSpotter { .. } => "certspotter",
        }
    }

    /// Whether the source can run at all: free sources always, keyed
    /// sources only with usable credentials.
    pub fn enabled(&self) -> bool {
        match self {
            Source::CrtSh | Source::RapidDns | Source::HackerTarget => true,
            Source::CertSpotter { .. } => true,
            Source::Fofa { email, key, .. } => !email.is_empty() && !key.is_empty(),
            Source::VirusTotal { key } | Source::BinaryEdge { key } => !key.is_empty(),
        }
    }

    /// Fetches raw, un-normalized host strings for one apex.
    pub async fn query(&self, client: &Client, apex: &str) -> Result<Vec<String>> {
        match self {
            Source::CrtSh => crtsh(client, apex).await,
            Source::RapidDns => rapiddns(client, apex).await,
            Source::HackerTarget => hackertarget(client, apex).await,
            Source::Fofa {
                email,
                key,
                size,
                syntax,
            } => fofa(client, apex, email, key, *size, syntax.as_deref()).await,
            Source::VirusTotal { key } => virustotal(client, apex, key).await,
            Source::BinaryEdge { key } => binaryedge(client, apex, key).await,
            Source::CertSpotter { key } => certspotter(client, apex, key.as_deref()).await,
        }
    }
}

/// Fan-out over the enabled source set, built once at startup.
pub struct Aggregator {
    client: Client,
    sources: Vec<Source>,
}

impl Aggregator {
    /// Builds the enabled source set. Free sources are always present;
    /// keyed sources require a config block that is both enabled and
    /// credentialed (possibly via the environment, see
    /// [`AppConfig::apply_env`]).
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(4)
            .build()
            .context("failed to create http client")?;

        let mut sources = vec![Source::CrtSh, Source::RapidDns, Source::HackerTarget];
        if let Some(fofa) = &cfg.fofa {
            if fofa.enabled {
                sources.push(Source::Fofa {
                    email: fofa.email.clone(),
                    key: fofa.key.clone(),
                    size: fofa.size,
                    syntax: fofa.syntax.clone(),
                });
            }
        }
        if let Some(vt) = &cfg.virustotal {
            if vt.enabled {
                sources.push(Source::VirusTotal {
                    key: vt.api_key.clone(),
                });
            }
        }
        if let Some(be) = &cfg.binaryedge {
            if be.enabled {
                sources.push(Source::BinaryEdge {
                    key: be.api_key.clone(),
                });
            }
        }
        if let Some(cs) = &cfg.certspotter {
            if cs.enabled {
                sources.push(Source::CertSpotter {
                    key: cs.api_key.clone(),
                });
            }
        }
        sources.retain(Source::enabled);
        Ok(Self { client, sources })
    }

    /// Names of the sources that will actually run.
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(Source::name).collect()
    }

    /// Queries every enabled source for every apex and returns the
    /// deduplicated, normalized union per apex. Per-source failures are
    /// logged at debug and skipped after one backoff retry.
    pub async fn collect(&self, apexes: &[String]) -> HashMap<String, Vec<String>> {
        let retry = BackoffConfig {
            max_attempts: 2,
            ..BackoffConfig::default()
        };
        let mut out = HashMap::new();
        for (index, apex) in apexes.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(INTER_APEX_DELAY).await;
            }
            let queries = self.sources.iter().map(|source| {
                let retry = &retry;
                async move {
                    let fetched =
                        with_backoff(|| source.query(&self.client, apex), |_| true, retry).await;
                    (source.name(), fetched)
                }
            });

            let mut seen = HashSet::new();
            let mut names = Vec::new();
            for (source, fetched) in join_all(queries).await {
                match fetched {
                    Ok(mut raw) => {
                        if raw.len() > PER_SOURCE_CAP {
                            debug!(
                                source,
                                apex = %apex,
                                dropped = raw.len() - PER_SOURCE_CAP,
                                "capping oversized source result"
                            );
                            raw.truncate(PER_SOURCE_CAP);
                        }
                        let before = names.len();
                        for entry in &raw {
                            if let Some(host) = normalize_host(entry, apex) {
                                if seen.insert(host.clone()) {
                                    names.push(host);
                                }
                            }
                        }
                        info!(source, apex = %apex, added = names.len() - before, "online source done");
                    }
                    Err(e) => debug!(source, apex = %apex, error = %e, "online source failed"),
                }
            }
            info!(apex = %apex, total = names.len(), "online harvest complete");
            out.insert(apex.clone(), names);
        }
        out
    }
}

async fn crtsh(client: &Client, apex: &str) -> Result<Vec<String>> {
    let url = format!("https://crt.sh/?q=%25.{}&output=json", apex);
    let rows: Vec<serde_json::Value> = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let mut out = Vec::new();
    for row in rows {
        if let Some(block) = row.get("name_value").and_then(|v| v.as_str()) {
            out.extend(block.lines().map(str::to_string));
        }
        if let Some(cn) = row.get("common_name").and_then(|v| v.as_str()) {
            out.push(cn.to_string());
        }
    }
    Ok(out)
}

async fn rapiddns(client: &Client, apex: &str) -> Result<Vec<String>> {
    let url = format!("https://rapiddns.io/subdomain/{}?full=1", apex);
    let page = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let pattern = Regex::new(&format!(
        r"(?i)[a-z0-9][a-z0-9._-]*\.{}",
        regex::escape(apex)
    ))
    .context("bad rapiddns pattern")?;
    Ok(pattern
        .find_iter(&page)
        .map(|m| m.as_str().to_string())
        .collect())
}

async fn hackertarget(client: &Client, apex: &str) -> Result<Vec<String>> {
    let url = format!("https://api.hackertarget.com/hostsearch/?q={}", apex);
    let body = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    // The API reports quota and lookup errors as a 200 with an error body.
    if body.starts_with("error") || body.contains("API count exceeded") {
        return Err(anyhow!("hackertarget: {}", body.trim()));
    }
    Ok(body
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(str::to_string)
        .collect())
}

async fn fofa(
    client: &Client,
    apex: &str,
    email: &str,
    key: &str,
    size: u32,
    syntax: Option<&str>,
) -> Result<Vec<String>> {
    let query = match syntax {
        Some(s) if !s.is_empty() => s.replace("{domain}", apex),
        _ => format!("domain=\"{}\"", apex),
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(query);
    let url = format!(
        "https://fofa.info/api/v1/search/all?email={}&key={}&qbase64={}&size={}&fields=host",
        email, key, encoded, size
    );
    let body: serde_json::Value = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    if body.get("error").and_then(|v| v.as_bool()).unwrap_or(false) {
        let message = body
            .get("errmsg")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return Err(anyhow!("fofa: {}", message));
    }
    let mut out = Vec::new();
    if let Some(results) = body.get("results").and_then(|v| v.as_array()) {
        for row in results {
            match row {
                serde_json::Value::String(host) => out.push(host.clone()),
                serde_json::Value::Array(columns) => {
                    if let Some(host) = columns.first().and_then(|v| v.as_str()) {
                        out.push(host.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    Ok(out)
}

async fn virustotal(client: &Client, apex: &str, key: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut url = format!(
        "https://www.virustotal.com/api/v3/domains/{}/subdomains?limit=40",
        apex
    );
    loop {
        let body: serde_json::Value = client
            .get(&url)
            .header("x-apikey", key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(data) = body.get("data").and_then(|v| v.as_array()) {
            for item in data {
                if let Some(id) = item.get("id").and_then(|v| v.as_str()) {
                    out.push(id.to_string());
                }
            }
        }
        match body.pointer("/links/next").and_then(|v| v.as_str()) {
            Some(next) if out.len() < PER_SOURCE_CAP => url = next.to_string(),
            _ => break,
        }
    }
    Ok(out)
}

async fn binaryedge(client: &Client, apex: &str, key: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut page = 1u64;
    loop {
        let url = format!(
            "https://api.binaryedge.io/v2/query/domains/subdomain/{}?page={}",
            apex, page
        );
        let body: serde_json::Value = client
            .get(&url)
            .header("X-Key", key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut added = 0usize;
        if let Some(events) = body.get("events").and_then(|v| v.as_array()) {
            for event in events {
                if let Some(host) = event.as_str() {
                    out.push(host.to_string());
                    added += 1;
                }
            }
        }
        if added == 0 || out.len() >= PER_SOURCE_CAP {
            break;
        }
        let total = body.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
        let page_size = body.get("pagesize").and_then(|v| v.as_u64()).unwrap_or(100);
        if page.saturating_mul(page_size) >= total {
            break;
        }
        page += 1;
    }
    Ok(out)
}

async fn certspotter(client: &Client, apex: &str, key: Option<&str>) -> Result<Vec<String>> {
    let url = format!(
        "https://api.certspotter.com/v1/issuances?domain={}&include_subdomains=true&expand=dns_names",
        apex
    );
    let mut request = client.get(&url);
    if let Some(key) = key {
        request = request.bearer_auth(key);
    }
    let rows: Vec<serde_json::Value> = request
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let mut out = Vec::new();
    for row in rows {
        if let Some(names) = row.get("dns_names").and_then(|v| v.as_array()) {
            out.extend(
                names
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string),
            );
        }
    }
    Ok(out)
}
