//! Online-source credential configuration
//!
//! Keyed sources are switched on by an optional `./config.json`. A missing
//! file means free sources only; a present but malformed file is a fatal
//! startup error. Two environment variables (`VIRUSTOTAL_API_KEY`,
//! `BINARYEDGE_API_KEY`) fill in when the config omits the block or leaves
//! its key empty. Enablement is computed once at startup and never
//! re-read.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Default config file path, relative to the working directory.
pub const CONFIG_FILE: &str = "config.json";

/// Top-level shape of `config.json`. Every block is optional; a missing
/// block disables that source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fofa: Option<FofaConfig>,
    #[serde(default)]
    pub virustotal: Option<KeyedConfig>,
    #[serde(default)]
    pub binaryedge: Option<KeyedConfig>,
    #[serde(default)]
    pub certspotter: Option<CertSpotterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FofaConfig {
    pub enabled: bool,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_fofa_size")]
    pub size: u32,
    /// Raw FOFA query to use instead of the default `domain="<apex>"`.
    #[serde(default)]
    pub syntax: Option<String>,
}

fn default_fofa_size() -> u32 {
    1000
}

/// A source that needs nothing but an API key.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyedConfig {
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertSpotterConfig {
    pub enabled: bool,
    /// CertSpotter works unauthenticated at a lower rate limit.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl AppConfig {
    /// Loads the optional config file.
    ///
    /// A missing file yields the default configuration (free sources
    /// only). An unreadable or malformed file is an error the caller
    /// should treat as fatal.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed config {}", path.display()))
    }

    /// Fills in keyed sources from the environment when the config omits
    /// them. `lookup` abstracts `std::env::var` so the fallback is
    /// testable; a block that is present and explicitly disabled stays
    /// disabled.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self
            .virustotal
            .as_ref()
            .map_or(true, |c| c.api_key.is_empty())
        {
            if let Some(api_key) = lookup("VIRUSTOTAL_API_KEY") {
                let enabled = self.virustotal.as_ref().map_or(true, |c| c.enabled);
                self.virustotal = Some(KeyedConfig { enabled, api_key });
            }
        }
        if self
            .binaryedge
            .as_ref()
            .map_or(true, |c| c.api_key.is_empty())
        {
            if let Some(api_key) = lookup("BINARYEDGE_API_KEY") {
                let enabled = self.binaryedge.as_ref().map_or(true, |c| c.enabled);
                self.binaryedge = Some(KeyedConfig { enabled, api_key });
            }
        }
    }
}
