//! Engine configuration
//!
//! Loaded from `pagelight.toml` in a host-chosen directory. Every section and
//! every field is optional; anything missing falls back to the defaults below.
//!
//! ```toml
//! [highlight]
//! max_highlights = 5000
//!
//! [remote]
//! endpoint = "https://api.example.com/v1"
//! max_chunks = 4
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "pagelight.toml";

/// Environment variable holding the remote matcher API token
pub const API_TOKEN_ENV: &str = "PAGELIGHT_API_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub search: SearchConfig,
    pub highlight: HighlightConfig,
    pub incremental: IncrementalConfig,
    pub remote: RemoteConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Regex scans stop once this many spans have been produced
    pub regex_match_cap: usize,
    /// Leaves processed between cooperative yields / progress callbacks
    pub progress_interval: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            regex_match_cap: 10_000,
            progress_interval: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    /// Markers wrapped or unwrapped between cooperative yields
    pub batch_size: usize,
    /// Total markers allowed on the page; spans beyond it are not painted
    pub max_highlights: usize,
    /// Number of distinct color slots (at most 5)
    pub palette_size: u8,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_highlights: 10_000,
            palette_size: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    /// Quiet period after the last mutation before rescanning
    pub quiet_period_ms: u64,
    /// Minimum characters of new text before a rescan fires
    pub min_new_chars: usize,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 300,
            min_new_chars: 100,
        }
    }
}

impl IncrementalConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the remote matcher service
    pub endpoint: String,
    /// Page text above this many characters is rejected before any call
    pub max_content_chars: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunks: usize,
    /// Forced advance when a chunk would not move past the previous start
    pub min_advance: usize,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub inter_batch_delay_ms: u64,
    /// Cap on snippets kept (and placed) per remote search
    pub max_results: usize,
    pub min_snippet_len: usize,
    /// Word overlap ratio above which a snippet counts as a duplicate
    pub overlap_threshold: f64,
    /// Snippets longer than this may be placed by word-prefix matching
    pub fuzzy_min_len: usize,
    /// Fraction of a snippet's words a prefix must keep to be placed
    pub fuzzy_prefix_ratio: f64,
    /// Replaces the built-in system prompt sent with each batch
    pub system_prompt: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.pagelight.dev/v1".to_string(),
            max_content_chars: 960_000,
            chunk_size: 120_000,
            chunk_overlap: 2_000,
            max_chunks: 8,
            min_advance: 1_000,
            max_retries: 2,
            retry_base_delay_ms: 500,
            inter_batch_delay_ms: 300,
            max_results: 20,
            min_snippet_len: 10,
            overlap_threshold: 0.8,
            fuzzy_min_len: 20,
            fuzzy_prefix_ratio: 0.8,
            system_prompt: None,
        }
    }
}

impl RemoteConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn retry_delay(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms * (attempt as u64 + 1))
    }
}

/// Remote searches allowed per rolling window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_minute: usize,
    pub per_hour: usize,
    pub per_day: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 10,
            per_hour: 100,
            per_day: 500,
        }
    }
}

/// Load `pagelight.toml` from `dir`
///
/// Falls back to defaults if the file doesn't exist.
pub fn load_config(dir: &Path) -> Result<EngineConfig> {
    let config_path = dir.join(CONFIG_FILE);

    if !config_path.exists() {
        log::debug!("No {} found in {:?}, using defaults", CONFIG_FILE, dir);
        return Ok(EngineConfig::default());
    }

    let config_str = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {:?}", config_path))?;

    let config: EngineConfig = toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse {:?}", config_path))?;

    if config.highlight.palette_size == 0 || config.highlight.palette_size > 5 {
        anyhow::bail!(
            "highlight.palette_size must be between 1 and 5, got {}",
            config.highlight.palette_size
        );
    }

    Ok(config)
}

/// Credentials file at ~/.pagelight/credentials.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Credentials {
    #[serde(default)]
    api_token: Option<String>,
}

fn load_credentials() -> Result<Option<Credentials>> {
    let home = match dirs::home_dir() {
        Some(h) => h,
        None => {
            log::debug!("Could not determine home directory");
            return Ok(None);
        }
    };

    let path = home.join(".pagelight").join("credentials.toml");
    if !path.exists() {
        log::debug!("No credentials found at ~/.pagelight/credentials.toml");
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)
        .context("Failed to read ~/.pagelight/credentials.toml")?;
    let credentials: Credentials = toml::from_str(&contents)
        .context("Failed to parse ~/.pagelight/credentials.toml")?;
    Ok(Some(credentials))
}

/// Resolve the remote matcher API token
///
/// Checks in priority order:
/// 1. `PAGELIGHT_API_TOKEN` environment variable
/// 2. ~/.pagelight/credentials.toml
///
/// `None` means the session is not signed in.
pub fn get_api_token() -> Option<String> {
    if let Ok(token) = env::var(API_TOKEN_ENV) {
        if !token.trim().is_empty() {
            log::debug!("Using API token from {}", API_TOKEN_ENV);
            return Some(token);
        }
    }

    match load_credentials() {
        Ok(Some(credentials)) => credentials.api_token,
        Ok(None) => None,
        Err(e) => {
            log::warn!("Ignoring unreadable credentials: {:#}", e);
            None
        }
    }
}
