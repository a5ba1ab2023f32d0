//! Tests for the Metadata Resolver retry state machine.

use anyhow::Result;
use async_trait::async_trait;
use mintwatch::config::ResolverConfig;
use mintwatch::error::WatchError;
use mintwatch::pipeline::{MetadataProvider, MetadataResolver, PipelineMetrics};
use mintwatch::types::{ResolutionState, TokenCandidate, TokenMetadata};
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Provider whose behavior is scripted per call: fails until
/// `succeed_after` calls have happened, then returns `name`.
struct ScriptedProvider {
    calls: AtomicU32,
    succeed_after: u32,
    name: String,
}

impl ScriptedProvider {
    fn failing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            succeed_after: u32::MAX,
            name: String::new(),
        }
    }

    fn succeeding_after(succeed_after: u32, name: &str) -> Self {
        Self {
            calls: AtomicU32::new(0),
            succeed_after,
            name: name.to_string(),
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataProvider for ScriptedProvider {
    async fn fetch(&self, _mint: &Pubkey) -> Result<Option<TokenMetadata>, WatchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.succeed_after {
            Ok(Some(TokenMetadata {
                name: self.name.clone(),
                symbol: "TST".to_string(),
            }))
        } else {
            Err(WatchError::Transient("scripted failure".to_string()))
        }
    }
}

fn test_config() -> ResolverConfig {
    ResolverConfig {
        max_attempts: 5,
        retry_ceiling_secs: 600,
        retry_queue_capacity: 8,
        immediate_retry_attempts: 0,
        ..ResolverConfig::default()
    }
}

fn test_candidate() -> TokenCandidate {
    let now = chrono::Utc::now().timestamp();
    TokenCandidate::new(Pubkey::new_unique(), "test_sig".to_string(), now, now)
}

#[tokio::test]
async fn always_failing_lookup_exhausts_after_exactly_max_attempts() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::failing());
    let (update_sender, mut update_receiver) = mpsc::channel(8);
    let (_resolver, mut scheduler) = MetadataResolver::new(
        provider.clone(),
        test_config(),
        update_sender,
        Arc::new(PipelineMetrics::new()),
    );

    scheduler.enqueue(test_candidate());
    let now = chrono::Utc::now().timestamp();

    // Four passes: still pending, four attempts spent
    for tick in 1..=4 {
        scheduler.process_due(now + tick).await;
        assert_eq!(scheduler.pending_len(), 1);
    }
    assert_eq!(provider.call_count(), 4);

    // Fifth pass exhausts the entry
    scheduler.process_due(now + 5).await;
    assert_eq!(scheduler.pending_len(), 0);
    assert_eq!(provider.call_count(), 5, "never fewer, never more");

    // Further passes never touch the provider again
    scheduler.process_due(now + 6).await;
    assert_eq!(provider.call_count(), 5);
    assert!(update_receiver.try_recv().is_err(), "no update was emitted");

    Ok(())
}

#[tokio::test]
async fn late_success_re_emits_exactly_one_update() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::succeeding_after(3, "Real Name"));
    let (update_sender, mut update_receiver) = mpsc::channel(8);
    let (_resolver, mut scheduler) = MetadataResolver::new(
        provider.clone(),
        test_config(),
        update_sender,
        Arc::new(PipelineMetrics::new()),
    );

    let candidate = test_candidate();
    let mint = candidate.mint;
    scheduler.enqueue(candidate);
    let now = chrono::Utc::now().timestamp();

    for tick in 1..=3 {
        scheduler.process_due(now + tick).await;
    }

    let resolved = update_receiver.try_recv().expect("one resolved update");
    assert_eq!(resolved.mint, mint);
    assert_eq!(resolved.resolution, ResolutionState::Resolved);
    assert_eq!(resolved.name.as_deref(), Some("Real Name"));
    assert_eq!(resolved.retry_count, 3);

    assert_eq!(scheduler.pending_len(), 0);
    assert!(update_receiver.try_recv().is_err(), "exactly one update");
    Ok(())
}

#[tokio::test]
async fn overall_ceiling_exhausts_without_another_attempt() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::failing());
    let (update_sender, _update_receiver) = mpsc::channel(8);
    let config = test_config();
    let ceiling = config.retry_ceiling_secs;
    let (_resolver, mut scheduler) = MetadataResolver::new(
        provider.clone(),
        config,
        update_sender,
        Arc::new(PipelineMetrics::new()),
    );

    scheduler.enqueue(test_candidate());
    let now = chrono::Utc::now().timestamp();

    scheduler.process_due(now + ceiling + 1).await;
    assert_eq!(scheduler.pending_len(), 0);
    assert_eq!(provider.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn placeholder_answers_keep_retrying_until_exhausted() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::succeeding_after(1, "Unknown Token #7"));
    let (update_sender, mut update_receiver) = mpsc::channel(8);
    let (_resolver, mut scheduler) = MetadataResolver::new(
        provider.clone(),
        test_config(),
        update_sender,
        Arc::new(PipelineMetrics::new()),
    );

    scheduler.enqueue(test_candidate());
    let now = chrono::Utc::now().timestamp();

    for tick in 1..=5 {
        scheduler.process_due(now + tick).await;
    }

    assert_eq!(scheduler.pending_len(), 0, "placeholder answers exhaust");
    assert_eq!(provider.call_count(), 5);
    assert!(update_receiver.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn bounded_queue_evicts_oldest_on_overflow() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::failing());
    let (update_sender, _update_receiver) = mpsc::channel(8);
    let mut config = test_config();
    config.retry_queue_capacity = 2;
    let (_resolver, mut scheduler) = MetadataResolver::new(
        provider,
        config,
        update_sender,
        Arc::new(PipelineMetrics::new()),
    );

    scheduler.enqueue(test_candidate());
    scheduler.enqueue(test_candidate());
    scheduler.enqueue(test_candidate());
    assert_eq!(scheduler.pending_len(), 2);
    Ok(())
}

#[tokio::test]
async fn immediate_resolution_sets_name_and_state() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::succeeding_after(1, "Moonshot"));
    let (update_sender, _update_receiver) = mpsc::channel(8);
    let (resolver, _scheduler) = MetadataResolver::new(
        provider,
        test_config(),
        update_sender,
        Arc::new(PipelineMetrics::new()),
    );

    let mut candidate = test_candidate();
    assert!(resolver.resolve_immediate(&mut candidate).await);
    assert_eq!(candidate.resolution, ResolutionState::Resolved);
    assert_eq!(candidate.name.as_deref(), Some("Moonshot"));
    assert_eq!(candidate.retry_count, 1);
    Ok(())
}

#[tokio::test]
async fn failed_immediate_resolution_enqueues_for_retry() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::failing());
    let (update_sender, _update_receiver) = mpsc::channel(8);
    let (resolver, mut scheduler) = MetadataResolver::new(
        provider,
        test_config(),
        update_sender,
        Arc::new(PipelineMetrics::new()),
    );

    let mut candidate = test_candidate();
    assert!(!resolver.resolve_immediate(&mut candidate).await);
    assert_eq!(candidate.resolution, ResolutionState::Unresolved);

    // The candidate landed in the retry channel; drain it into the queue
    // the way the scheduler's run loop would.
    tokio::time::timeout(std::time::Duration::from_secs(1), async {
        scheduler.receive_one().await
    })
    .await
    .expect("retry entry should arrive");
    assert_eq!(scheduler.pending_len(), 1);
    Ok(())
}
