//! Metadata resolver - turns a mint address into display metadata.
//!
//! The immediate path runs inside the worker that owns the candidate and
//! must answer fast; anything slower falls to a bounded background retry
//! queue driven by a single scheduler task on a fixed tick. Emitting the
//! placeholder downstream and resolving in the background are split on
//! purpose: the provider is slower than the alerting latency budget.

use crate::config::ResolverConfig;
use crate::error::WatchError;
use crate::pipeline::metrics::PipelineMetrics;
use crate::types::{CandidateSender, ResolutionState, TokenCandidate, TokenMetadata};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use solana_sdk::pubkey::Pubkey;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, info, instrument, warn};

/// External metadata lookup. `Ok(None)` means the provider does not know
/// the address (yet); transport failures map to `WatchError::Transient`.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch(&self, mint: &Pubkey) -> Result<Option<TokenMetadata>, WatchError>;
}

/// HTTP metadata provider with a short per-request timeout and a
/// process-wide rate limit shared by all workers.
pub struct HttpMetadataProvider {
    client: Client,
    base_url: String,
    timeout: Duration,
    rate_limiter: DefaultDirectRateLimiter,
}

impl HttpMetadataProvider {
    pub fn new(config: &ResolverConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()?;

        let per_second = NonZeroU32::new(config.provider_rate_limit_per_sec.max(1)).unwrap();

        Ok(Self {
            client,
            base_url: config.provider_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.provider_timeout_secs),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }
}

#[async_trait]
impl MetadataProvider for HttpMetadataProvider {
    #[instrument(skip(self), fields(mint = %mint))]
    async fn fetch(&self, mint: &Pubkey) -> Result<Option<TokenMetadata>, WatchError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url, mint);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(WatchError::transient)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(WatchError::Transient(format!(
                "metadata provider returned {}",
                response.status()
            )));
        }

        let metadata: TokenMetadata = response.json().await.map_err(WatchError::transient)?;
        debug!("Fetched metadata: {}", metadata.name);
        Ok(Some(metadata))
    }
}

/// Immediate-path resolver handle held by every worker.
pub struct MetadataResolver {
    provider: Arc<dyn MetadataProvider>,
    config: ResolverConfig,
    retry_sender: mpsc::Sender<TokenCandidate>,
    placeholder_patterns: Vec<String>,
}

impl MetadataResolver {
    /// Build the worker-side resolver and the background scheduler that
    /// shares its provider. Resolved updates re-enter the pipeline via
    /// `update_sender`.
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        config: ResolverConfig,
        update_sender: CandidateSender,
        metrics: Arc<PipelineMetrics>,
    ) -> (Self, ResolutionScheduler) {
        let (retry_sender, retry_receiver) = mpsc::channel(config.retry_queue_capacity.max(1));

        let placeholder_patterns: Vec<String> = config
            .placeholder_patterns
            .iter()
            .map(|p| p.to_lowercase())
            .collect();

        let scheduler = ResolutionScheduler {
            provider: provider.clone(),
            config: config.clone(),
            receiver: retry_receiver,
            update_sender,
            pending: Vec::new(),
            placeholder_patterns: placeholder_patterns.clone(),
            metrics,
        };

        (
            Self {
                provider,
                config,
                retry_sender,
                placeholder_patterns,
            },
            scheduler,
        )
    }

    /// Attempt resolution right now. On success the candidate carries its
    /// real name and is `Resolved`. Otherwise it stays `Unresolved` and is
    /// handed to the retry queue; the caller proceeds with the placeholder.
    #[instrument(skip(self, candidate), fields(mint = %candidate.mint))]
    pub async fn resolve_immediate(&self, candidate: &mut TokenCandidate) -> bool {
        let strategy = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(2))
            .take(self.config.immediate_retry_attempts);

        candidate.retry_count += 1;
        let result = Retry::spawn(strategy, || self.provider.fetch(&candidate.mint)).await;

        match result {
            Ok(Some(metadata)) if !is_placeholder(&metadata.name, &self.placeholder_patterns) => {
                candidate.name = Some(metadata.name);
                candidate.symbol = Some(metadata.symbol);
                candidate.resolution = ResolutionState::Resolved;
                return true;
            }
            Ok(Some(metadata)) => {
                debug!(
                    "Provider returned placeholder '{}' for {}",
                    metadata.name, candidate.mint
                );
            }
            Ok(None) => {
                debug!("Provider does not know {} yet", candidate.mint);
            }
            Err(e) => {
                warn!("Immediate metadata lookup failed for {}: {}", candidate.mint, e);
            }
        }

        if let Err(e) = self.retry_sender.try_send(candidate.clone()) {
            warn!(
                "Retry queue full, dropping resolution for {}: {}",
                candidate.mint, e
            );
        }
        false
    }
}

struct PendingResolution {
    candidate: TokenCandidate,
    enqueued_at: i64,
    attempts: u32,
}

/// Single background task driving the retry state machine on a fixed tick.
pub struct ResolutionScheduler {
    provider: Arc<dyn MetadataProvider>,
    config: ResolverConfig,
    receiver: mpsc::Receiver<TokenCandidate>,
    update_sender: CandidateSender,
    pending: Vec<PendingResolution>,
    placeholder_patterns: Vec<String>,
    metrics: Arc<PipelineMetrics>,
}

impl ResolutionScheduler {
    /// Main execution loop: accepts new entries and retries due ones.
    pub async fn run(mut self) {
        info!(
            "Resolution scheduler is running (tick {}s, max {} attempts)",
            self.config.retry_interval_secs, self.config.max_attempts
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.retry_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = self.receiver.recv() => {
                    match maybe {
                        Some(candidate) => self.enqueue(candidate),
                        None => {
                            info!("Resolution scheduler channel closed. Shutting down.");
                            break;
                        }
                    }
                },
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    self.process_due(now).await;
                }
            }
        }
    }

    /// Number of candidates awaiting resolution.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Accept the next queued candidate from the retry channel, if any.
    /// Returns false once the channel is closed and drained.
    pub async fn receive_one(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(candidate) => {
                self.enqueue(candidate);
                true
            }
            None => false,
        }
    }

    /// Accept a candidate into the bounded queue; overflow evicts the
    /// oldest entry.
    pub fn enqueue(&mut self, candidate: TokenCandidate) {
        if self.pending.len() >= self.config.retry_queue_capacity.max(1) {
            let evicted = self.pending.remove(0);
            warn!(
                "Retry queue at capacity, evicting oldest entry {}",
                evicted.candidate.mint
            );
        }
        self.pending.push(PendingResolution {
            candidate,
            enqueued_at: chrono::Utc::now().timestamp(),
            attempts: 0,
        });
    }

    /// One retry pass over the queue at wall-clock `now`.
    ///
    /// Each entry gets one provider query per pass. A real name moves the
    /// candidate to `Resolved` and re-emits it as an update event; hitting
    /// the attempt bound or the overall ceiling moves it to `Exhausted`,
    /// which is terminal.
    pub async fn process_due(&mut self, now: i64) {
        let entries = std::mem::take(&mut self.pending);
        let mut still_pending = Vec::with_capacity(entries.len());

        for mut entry in entries {
            if now - entry.enqueued_at > self.config.retry_ceiling_secs {
                self.exhaust(entry.candidate, entry.attempts);
                continue;
            }

            entry.attempts += 1;
            entry.candidate.retry_count += 1;

            match self.provider.fetch(&entry.candidate.mint).await {
                Ok(Some(metadata))
                    if !is_placeholder(&metadata.name, &self.placeholder_patterns) =>
                {
                    let mut candidate = entry.candidate;
                    candidate.name = Some(metadata.name);
                    candidate.symbol = Some(metadata.symbol);
                    candidate.resolution = ResolutionState::Resolved;
                    self.metrics.record_resolution_succeeded();
                    info!(
                        "Resolved {} to '{}' after {} background attempts",
                        candidate.mint,
                        candidate.display_name(),
                        entry.attempts
                    );
                    if let Err(e) = self.update_sender.send(candidate).await {
                        warn!("Failed to re-emit resolved candidate: {}", e);
                    }
                    continue;
                }
                Ok(Some(metadata)) => {
                    debug!(
                        "Still placeholder '{}' for {} (attempt {})",
                        metadata.name, entry.candidate.mint, entry.attempts
                    );
                }
                Ok(None) => {
                    debug!(
                        "Provider still does not know {} (attempt {})",
                        entry.candidate.mint, entry.attempts
                    );
                }
                Err(e) => {
                    debug!(
                        "Retry lookup failed for {} (attempt {}): {}",
                        entry.candidate.mint, entry.attempts, e
                    );
                }
            }

            if entry.attempts >= self.config.max_attempts {
                self.exhaust(entry.candidate, entry.attempts);
            } else {
                still_pending.push(entry);
            }
        }

        // New arrivals cannot land while this task awaits: the select arm
        // that receives them is not polled during process_due.
        self.pending = still_pending;
    }

    fn exhaust(&self, mut candidate: TokenCandidate, attempts: u32) {
        candidate.resolution = ResolutionState::Exhausted;
        self.metrics.record_resolution_exhausted();
        let err = WatchError::ResolutionExhausted { attempts };
        warn!("{} for {}; dropping from active processing", err, candidate.mint);
    }
}

/// Placeholder heuristics: empty names, the synthesized prefix and the
/// configured provider patterns all count.
fn is_placeholder(name: &str, patterns: &[String]) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with(&crate::types::PLACEHOLDER_NAME_PREFIX.to_lowercase()) {
        return true;
    }
    patterns.iter().any(|p| lower.contains(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_heuristics() {
        let patterns = vec!["unknown token".to_string(), "new token".to_string()];
        assert!(is_placeholder("", &patterns));
        assert!(is_placeholder("   ", &patterns));
        assert!(is_placeholder("Unknown Token #4", &patterns));
        assert!(is_placeholder("Unnamed Token AbC123", &patterns));
        assert!(!is_placeholder("Moonshot", &patterns));
    }
}
