//! Configuration for the watch pipeline.
//!
//! Loaded once at startup from a JSON file; every knob has a default so a
//! partial file works. A missing store connection or an empty channel set
//! is fatal at startup, everything else degrades with logged warnings.

use anyhow::{Context, Result};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// RPC endpoints; the first healthy one serves each poll
    pub rpc_endpoints: NonEmpty<String>,
    /// Program id watched for token creations
    pub program_id: String,
    /// Per-call RPC timeout in seconds
    pub rpc_timeout_secs: u64,
    /// Poll tick in milliseconds
    pub poll_interval_ms: u64,
    /// Max signatures fetched per poll
    pub signature_fetch_limit: usize,
    /// Startup window during which backlog is observed but not emitted
    pub warmup_secs: u64,
    /// TTL of the seen-signature cache in seconds
    pub seen_signature_ttl_secs: u64,
    /// Maximum seen-signature cache entries
    pub seen_signature_capacity: u64,

    pub freshness: FreshnessConfig,
    pub resolver: ResolverConfig,

    /// Bounded worker concurrency for candidate processing
    pub max_parallel_workers: usize,
    /// Capacity of the candidate channel between source and workers
    pub candidate_channel_capacity: usize,

    /// Primary notification channel; at least one channel must be set
    pub telegram: Option<TelegramConfig>,
    /// Fallback notification channel
    pub webhook: Option<WebhookConfig>,

    /// SQLite database path
    pub db_path: String,
    /// Watchlist scope this process serves
    pub watch_scope: String,
    /// Noise name-patterns merged with the store's denylist table
    pub denylist_patterns: Vec<String>,
}

/// Freshness window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Maximum age in seconds for a candidate to be considered fresh
    pub max_age_secs: i64,
    /// Clock-drift tolerance for future timestamps, in seconds
    pub future_drift_secs: i64,
    /// Extra age allowed for candidates that already carry a resolved name
    pub confident_age_extension_secs: i64,
}

/// Metadata resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Metadata provider base URL; the mint address is appended
    pub provider_url: String,
    /// Per-request provider timeout in seconds
    pub provider_timeout_secs: u64,
    /// Provider queries per second across all workers
    pub provider_rate_limit_per_sec: u32,
    /// Extra immediate attempts (exponential backoff) before enqueueing
    pub immediate_retry_attempts: usize,
    /// Background retry tick in seconds
    pub retry_interval_secs: u64,
    /// Maximum resolution attempts per candidate
    pub max_attempts: u32,
    /// Overall ceiling in seconds a candidate may sit in the retry queue
    pub retry_ceiling_secs: i64,
    /// Bounded retry queue capacity; overflow evicts the oldest entry
    pub retry_queue_capacity: usize,
    /// Name patterns the provider uses as generic placeholders
    pub placeholder_patterns: Vec<String>,
}

/// Primary channel: Telegram bot API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_channel_timeout_secs")]
    pub timeout_secs: u64,
}

/// Fallback channel: plain POST webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_channel_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_channel_timeout_secs() -> u64 {
    8
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 300,
            future_drift_secs: 120,
            confident_age_extension_secs: 120,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            provider_url: "https://frontend-api.pump.fun/coins".to_string(),
            provider_timeout_secs: 6,
            provider_rate_limit_per_sec: 5,
            immediate_retry_attempts: 2,
            retry_interval_secs: 30,
            max_attempts: 5,
            retry_ceiling_secs: 600,
            retry_queue_capacity: 512,
            placeholder_patterns: vec![
                "unknown token".to_string(),
                "unnamed".to_string(),
                "new token".to_string(),
            ],
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            rpc_endpoints: NonEmpty::new("https://api.mainnet-beta.solana.com".to_string()),
            program_id: "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P".to_string(),
            rpc_timeout_secs: 8,
            poll_interval_ms: 1500,
            signature_fetch_limit: 25,
            warmup_secs: 20,
            seen_signature_ttl_secs: 300,
            seen_signature_capacity: 10_000,
            freshness: FreshnessConfig::default(),
            resolver: ResolverConfig::default(),
            max_parallel_workers: 8,
            candidate_channel_capacity: 256,
            telegram: None,
            webhook: None,
            db_path: "./mintwatch.db".to_string(),
            watch_scope: "default".to_string(),
            denylist_patterns: Vec::new(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: WatchConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup sanity checks. Failures here are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.is_none() && self.webhook.is_none() {
            anyhow::bail!("at least one notification channel must be configured");
        }
        if self.resolver.max_attempts == 0 {
            anyhow::bail!("resolver.max_attempts must be at least 1");
        }
        if self.max_parallel_workers == 0 {
            anyhow::bail!("max_parallel_workers must be at least 1");
        }
        Ok(())
    }
}
