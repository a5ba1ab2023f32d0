//! Chain event source - sequential poller surfacing new token creations.
//!
//! One outstanding poll at a time; overlapping polls against the same
//! chain marker would only produce duplicate work. Emits each creation
//! at most once per discovery cycle via a time-bounded seen-set. Missed
//! events during downtime are recovered by the external backfill
//! collaborator, which consumes the persisted last-processed timestamp.

use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::pipeline::metrics::PipelineMetrics;
use crate::storage::AlertStore;
use crate::types::{CandidateSender, TokenCandidate};
use anyhow::{Context, Result};
use moka::future::Cache;
use rand::Rng;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiMessage,
    UiTransactionEncoding,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// Accounts that can never be a freshly created mint
const SYSTEM_PROGRAMS: &[&str] = &[
    "ComputeBudget111111111111111111111111111111",
    "11111111111111111111111111111111",
    "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
    "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb",
    "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL",
    "SysvarRent111111111111111111111111111111111",
];

// Log fragments that mark a token-creation transaction
const CREATION_LOG_MARKERS: &[&str] = &["Instruction: Create", "Instruction: InitializeMint"];

pub struct ChainEventSource {
    rpc_clients: Vec<Arc<RpcClient>>,
    program: Pubkey,
    poll_interval: Duration,
    fetch_limit: usize,
    warmup: Duration,
    candidate_sender: CandidateSender,
    seen_signatures: Cache<String, ()>,
    last_marker: Option<Signature>,
    started_at: Instant,
    store: Arc<dyn AlertStore>,
    metrics: Arc<PipelineMetrics>,
}

impl ChainEventSource {
    pub fn new(
        config: &WatchConfig,
        candidate_sender: CandidateSender,
        store: Arc<dyn AlertStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        let program = Pubkey::from_str(&config.program_id)
            .with_context(|| format!("Invalid program id '{}'", config.program_id))?;

        let rpc_clients: Vec<Arc<RpcClient>> = config
            .rpc_endpoints
            .iter()
            .map(|endpoint| {
                Arc::new(RpcClient::new_with_timeout(
                    endpoint.clone(),
                    Duration::from_secs(config.rpc_timeout_secs),
                ))
            })
            .collect();

        let seen_signatures = Cache::builder()
            .max_capacity(config.seen_signature_capacity)
            .time_to_live(Duration::from_secs(config.seen_signature_ttl_secs))
            .build();

        Ok(Self {
            rpc_clients,
            program,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            fetch_limit: config.signature_fetch_limit,
            warmup: Duration::from_secs(config.warmup_secs),
            candidate_sender,
            seen_signatures,
            last_marker: None,
            started_at: Instant::now(),
            store,
            metrics,
        })
    }

    /// Main polling loop. Transient failures are logged and retried on
    /// the next tick; this task never terminates on its own unless the
    /// downstream channel closes.
    pub async fn run(mut self) {
        match self.store.last_processed_timestamp().await {
            Ok(Some(timestamp)) => {
                info!("Resuming after last processed timestamp {}", timestamp)
            }
            Ok(None) => info!("No prior processing marker; starting fresh"),
            Err(e) => warn!("Could not read last processed timestamp: {:#}", e),
        }

        info!(
            "Chain event source is running (program {}, {} endpoints)",
            self.program,
            self.rpc_clients.len()
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.candidate_sender.is_closed() {
                info!("Candidate channel closed. Chain event source shutting down.");
                break;
            }

            if let Err(e) = self.poll_once().await {
                warn!("Chain poll failed: {:#}", e);
                // Jittered pause so a struggling endpoint is not hammered
                let jitter_ms = rand::thread_rng().gen_range(100..500);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            }
        }
    }

    /// One polling cycle: fetch signatures newer than the chain marker,
    /// surface unseen creations, advance the marker.
    async fn poll_once(&mut self) -> Result<()> {
        let signatures = self.fetch_signatures().await?;
        if signatures.is_empty() {
            return Ok(());
        }

        let warming_up = self.started_at.elapsed() < self.warmup;
        let mut newest_block_time: Option<i64> = None;

        // Newest first from the RPC; process oldest to newest
        for info in signatures.iter().rev() {
            if self.seen_signatures.contains_key(&info.signature) {
                continue;
            }
            self.seen_signatures.insert(info.signature.clone(), ()).await;

            if info.err.is_some() {
                continue;
            }

            if let Some(block_time) = info.block_time {
                newest_block_time = Some(newest_block_time.unwrap_or(block_time).max(block_time));
            }

            if warming_up {
                debug!("Warm-up: suppressing backlog signature {}", info.signature);
                continue;
            }

            if let Err(e) = self.surface_creation(info).await {
                warn!("Skipping signature {}: {:#}", info.signature, e);
            }
        }

        if let Some(newest) = signatures.first() {
            match Signature::from_str(&newest.signature) {
                Ok(signature) => self.last_marker = Some(signature),
                Err(e) => warn!("Unparseable marker signature {}: {}", newest.signature, e),
            }
        }

        if let Some(block_time) = newest_block_time {
            if let Err(e) = self.store.set_last_processed_timestamp(block_time).await {
                warn!("Failed to persist last processed timestamp: {:#}", e);
            }
        }

        Ok(())
    }

    /// Fetch recent signatures for the watched program, failing over
    /// across the configured endpoints.
    async fn fetch_signatures(&self) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        let mut last_error = None;

        for rpc in &self.rpc_clients {
            let config = GetConfirmedSignaturesForAddress2Config {
                before: None,
                until: self.last_marker,
                limit: Some(self.fetch_limit),
                commitment: Some(CommitmentConfig::confirmed()),
            };

            match rpc
                .get_signatures_for_address_with_config(&self.program, config)
                .await
            {
                Ok(signatures) => return Ok(signatures),
                Err(e) => {
                    debug!("Endpoint {} failed: {}", rpc.url(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(anyhow::anyhow!(
            "All RPC endpoints failed: {:?}",
            last_error
        ))
    }

    /// Fetch transaction details and emit a candidate if this is a
    /// token creation.
    async fn surface_creation(
        &self,
        info: &RpcConfirmedTransactionStatusWithSignature,
    ) -> Result<()> {
        let signature = Signature::from_str(&info.signature).map_err(|e| {
            WatchError::InvalidData(format!("unparseable signature {}: {}", info.signature, e))
        })?;

        let transaction = self.fetch_transaction(&signature).await?;

        let Some(mint) = extract_created_mint(&transaction, &self.program) else {
            return Ok(());
        };

        let candidate = TokenCandidate::new(
            mint,
            info.signature.clone(),
            info.block_time.unwrap_or(0),
            chrono::Utc::now().timestamp(),
        );

        self.metrics.record_candidate_observed();
        debug!("Surfacing creation {} (sig {})", mint, info.signature);

        self.candidate_sender
            .send(candidate)
            .await
            .context("Candidate channel closed")?;

        Ok(())
    }

    async fn fetch_transaction(
        &self,
        signature: &Signature,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        let mut last_error = None;

        for rpc in &self.rpc_clients {
            let config = RpcTransactionConfig {
                encoding: Some(UiTransactionEncoding::JsonParsed),
                commitment: Some(CommitmentConfig::confirmed()),
                max_supported_transaction_version: Some(0),
            };

            match rpc.get_transaction_with_config(signature, config).await {
                Ok(transaction) => return Ok(transaction),
                Err(e) => last_error = Some(e),
            }
        }

        Err(anyhow::anyhow!(
            "Failed to fetch transaction {}: {:?}",
            signature,
            last_error
        ))
    }
}

/// Decide whether the transaction created a token and pull out the mint.
/// Creation is recognized from the program's log messages; the mint is
/// the first account key that is neither the fee payer, a system
/// program, nor the watched program itself.
fn extract_created_mint(
    transaction: &EncodedConfirmedTransactionWithStatusMeta,
    program: &Pubkey,
) -> Option<Pubkey> {
    let meta = transaction.transaction.meta.as_ref()?;

    let OptionSerializer::Some(logs) = &meta.log_messages else {
        return None;
    };
    let is_creation = logs
        .iter()
        .any(|log| CREATION_LOG_MARKERS.iter().any(|marker| log.contains(marker)));
    if !is_creation {
        return None;
    }

    let EncodedTransaction::Json(ui_tx) = &transaction.transaction.transaction else {
        return None;
    };
    let UiMessage::Parsed(message) = &ui_tx.message else {
        return None;
    };

    let program_str = program.to_string();
    message
        .account_keys
        .iter()
        .skip(1) // fee payer
        .map(|key| key.pubkey.as_str())
        .find(|pubkey| !SYSTEM_PROGRAMS.contains(pubkey) && *pubkey != program_str)
        .and_then(|pubkey| Pubkey::from_str(pubkey).ok())
}
