//! The detection -> resolution -> deduplication -> notification pipeline.
//!
//! Candidates flow: chain event source -> freshness gate -> keyword match
//! against whatever name is available -> metadata resolver (placeholder
//! emission + background retry) -> keyword re-check on resolution ->
//! dedup guard -> notification dispatcher. The dedup guard is the sole
//! correctness boundary across workers; no global ordering is required.

pub mod dedup;
pub mod dispatcher;
pub mod freshness;
pub mod matcher;
pub mod metrics;
pub mod resolver;
pub mod source;

pub use dedup::DedupGuard;
pub use dispatcher::{
    NotificationChannel, NotificationDispatcher, TelegramChannel, WebhookChannel,
};
pub use freshness::{Freshness, FreshnessGate};
pub use matcher::KeywordMatcher;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use resolver::{HttpMetadataProvider, MetadataProvider, MetadataResolver, ResolutionScheduler};
pub use source::ChainEventSource;

use crate::config::WatchConfig;
use crate::storage::AlertStore;
use crate::types::{CandidateReceiver, ResolutionState, TokenCandidate};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Per-candidate processing shared by all workers.
pub struct CandidateProcessor {
    gate: FreshnessGate,
    matcher: KeywordMatcher,
    resolver: MetadataResolver,
    dispatcher: NotificationDispatcher,
    store: Arc<dyn AlertStore>,
    scope: String,
    metrics: Arc<PipelineMetrics>,
}

impl CandidateProcessor {
    pub fn new(
        gate: FreshnessGate,
        matcher: KeywordMatcher,
        resolver: MetadataResolver,
        dispatcher: NotificationDispatcher,
        store: Arc<dyn AlertStore>,
        scope: String,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            gate,
            matcher,
            resolver,
            dispatcher,
            store,
            scope,
            metrics,
        }
    }

    /// Process one candidate, whether fresh from the source or re-emitted
    /// by the resolver with its real name.
    pub async fn process(&self, mut candidate: TokenCandidate) {
        let now = chrono::Utc::now().timestamp();

        match self.gate.classify(&candidate, now) {
            Freshness::Fresh => {}
            Freshness::TooOld => {
                debug!(
                    "Dropping {}: {}s old exceeds the freshness window",
                    candidate.mint,
                    candidate.age_secs(now)
                );
                return;
            }
            Freshness::Invalid => {
                debug!(
                    "Dropping {}: implausible creation timestamp {}",
                    candidate.mint, candidate.created_at
                );
                return;
            }
        }
        self.metrics.record_candidate_fresh();

        let watchlist = match self.store.watchlist(&self.scope).await {
            Ok(watchlist) => watchlist,
            Err(e) => {
                warn!("Failed to snapshot watchlist: {:#}", e);
                return;
            }
        };
        if watchlist.is_empty() {
            debug!("Watchlist empty; nothing can match");
            return;
        }

        // Check against whatever name is available right now. For an
        // unresolved candidate this is the placeholder, which still lets
        // address-fragment keywords fire within the latency budget.
        if let Some(entry) = self.matcher.first_match(&candidate, &watchlist) {
            let keyword = entry.keyword.clone();
            self.dispatcher.dispatch(&candidate, &keyword).await;
            return;
        }

        // Already carrying its real name (initial lookup or retry path):
        // no match means no match.
        if candidate.resolution != ResolutionState::Unresolved {
            return;
        }

        // No match on the placeholder; try for the real name. On failure
        // the candidate is already queued for background retries and will
        // re-enter here once resolved.
        if self.resolver.resolve_immediate(&mut candidate).await {
            if let Some(entry) = self.matcher.first_match(&candidate, &watchlist) {
                let keyword = entry.keyword.clone();
                self.dispatcher.dispatch(&candidate, &keyword).await;
            }
        }
    }
}

/// Fixed-size worker pool draining the candidate channel.
pub struct Pipeline {
    processor: Arc<CandidateProcessor>,
    receiver: CandidateReceiver,
    worker_permits: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        processor: Arc<CandidateProcessor>,
        receiver: CandidateReceiver,
        max_parallel_workers: usize,
    ) -> Self {
        Self {
            processor,
            receiver,
            worker_permits: Arc::new(Semaphore::new(max_parallel_workers.max(1))),
        }
    }

    /// Main execution loop: bounded fan-out of candidate processing.
    pub async fn run(mut self) {
        info!(
            "Pipeline worker pool is running ({} permits)",
            self.worker_permits.available_permits()
        );

        while let Some(candidate) = self.receiver.recv().await {
            let permit = match self.worker_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let processor = self.processor.clone();
            tokio::spawn(async move {
                processor.process(candidate).await;
                drop(permit);
            });
        }

        info!("Candidate channel closed. Pipeline shutting down.");
    }
}

/// Running pipeline task handles, in spawn order: source, scheduler, workers.
pub struct PipelineHandles {
    pub source: tokio::task::JoinHandle<()>,
    pub scheduler: tokio::task::JoinHandle<()>,
    pub workers: tokio::task::JoinHandle<()>,
}

impl PipelineHandles {
    pub fn abort_all(&self) {
        self.source.abort();
        self.scheduler.abort();
        self.workers.abort();
    }
}

/// Wire every component from configuration and spawn the three tasks.
/// Store connectivity and configuration problems surface here and are
/// fatal to startup.
pub async fn spawn_pipeline(
    config: WatchConfig,
    store: Arc<dyn AlertStore>,
    metrics: Arc<PipelineMetrics>,
) -> Result<PipelineHandles> {
    config.validate()?;

    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
    if let Some(telegram) = &config.telegram {
        channels.push(Arc::new(TelegramChannel::new(telegram)?));
    }
    if let Some(webhook) = &config.webhook {
        channels.push(Arc::new(WebhookChannel::new(webhook)?));
    }

    let denylist = store.denylist().await?;
    let matcher = KeywordMatcher::new(denylist, &config.denylist_patterns);

    let (candidate_sender, candidate_receiver) =
        mpsc::channel::<TokenCandidate>(config.candidate_channel_capacity.max(1));

    let provider: Arc<dyn MetadataProvider> =
        Arc::new(HttpMetadataProvider::new(&config.resolver)?);
    let (resolver, scheduler) = MetadataResolver::new(
        provider,
        config.resolver.clone(),
        candidate_sender.clone(),
        metrics.clone(),
    );

    let guard = Arc::new(DedupGuard::new(store.clone()));
    let dispatcher = NotificationDispatcher::new(channels, guard, metrics.clone());

    let processor = Arc::new(CandidateProcessor::new(
        FreshnessGate::new(config.freshness.clone()),
        matcher,
        resolver,
        dispatcher,
        store.clone(),
        config.watch_scope.clone(),
        metrics.clone(),
    ));

    let source = ChainEventSource::new(&config, candidate_sender, store, metrics)?;
    let pipeline = Pipeline::new(processor, candidate_receiver, config.max_parallel_workers);

    Ok(PipelineHandles {
        source: tokio::spawn(source.run()),
        scheduler: tokio::spawn(scheduler.run()),
        workers: tokio::spawn(pipeline.run()),
    })
}
