//! Core types and data structures for the mintwatch pipeline.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;

/// Prefix of every synthesized display name. Names carrying this prefix
/// are treated as placeholders by the matcher and the resolver.
pub const PLACEHOLDER_NAME_PREFIX: &str = "Unnamed Token";

/// Synthesize a display name for a token whose metadata is not yet known.
/// Embeds the leading characters of the mint so address-fragment keywords
/// can still match before resolution completes.
pub fn placeholder_name(mint: &Pubkey) -> String {
    let addr = mint.to_string();
    let prefix_len = addr.len().min(6);
    format!("{} {}", PLACEHOLDER_NAME_PREFIX, &addr[..prefix_len])
}

/// Resolution progress of a candidate's display metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionState {
    /// No non-placeholder name obtained yet
    Unresolved,
    /// Real metadata obtained from the provider
    Resolved,
    /// All retry attempts spent; terminal
    Exhausted,
}

/// A token-creation event observed on-chain, flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCandidate {
    /// The mint address of the token
    pub mint: Pubkey,
    /// Signature of the creation transaction
    pub signature: String,
    /// Blockchain-reported creation instant (unix seconds, UTC)
    pub created_at: i64,
    /// Wall-clock instant the pipeline first observed it (unix seconds)
    pub discovered_at: i64,
    /// Display name; absent until resolved
    pub name: Option<String>,
    /// Display symbol; absent until resolved
    pub symbol: Option<String>,
    /// Metadata resolution progress
    pub resolution: ResolutionState,
    /// Number of resolution attempts so far
    pub retry_count: u32,
}

impl TokenCandidate {
    pub fn new(mint: Pubkey, signature: String, created_at: i64, discovered_at: i64) -> Self {
        Self {
            mint,
            signature,
            created_at,
            discovered_at,
            name: None,
            symbol: None,
            resolution: ResolutionState::Unresolved,
            retry_count: 0,
        }
    }

    /// Display name to evaluate right now: the resolved name if present,
    /// otherwise a synthesized placeholder.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| placeholder_name(&self.mint))
    }

    /// Whether this candidate carries a real, resolved display name.
    pub fn has_resolved_name(&self) -> bool {
        self.resolution == ResolutionState::Resolved && self.name.is_some()
    }

    /// Token age in seconds at `now` (unix seconds).
    pub fn age_secs(&self, now: i64) -> i64 {
        now - self.created_at
    }
}

/// Display metadata returned by the metadata provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
}

/// A keyword owned by a user/system scope. Created and removed by the
/// external command collaborator; the pipeline only snapshots the set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub keyword: String,
    pub scope: String,
}

/// Kind of a denylist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyKind {
    /// Matches against the mint address
    Address,
    /// Matches as a substring of the display name or symbol
    Name,
}

impl DenyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyKind::Address => "address",
            DenyKind::Name => "name",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "address" => Some(DenyKind::Address),
            "name" => Some(DenyKind::Name),
            _ => None,
        }
    }
}

/// A data-driven noise filter entry, loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenylistEntry {
    pub pattern: String,
    pub kind: DenyKind,
}

/// Durable proof that an address was already notified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Primary key; enforces at-most-once at the storage layer
    pub address: String,
    pub token_name: String,
    pub notification_type: String,
    /// Unix seconds
    pub notified_at: i64,
}

/// Structured alert handed to the notification channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAlert {
    pub name: String,
    pub symbol: Option<String>,
    pub address: String,
    pub age_secs: i64,
    pub matched_keyword: String,
    /// Optional market data; never blocks dispatch
    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
}

// Channel aliases for pipeline wiring
pub type CandidateSender = mpsc::Sender<TokenCandidate>;
pub type CandidateReceiver = mpsc::Receiver<TokenCandidate>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_embeds_mint_prefix() {
        let mint = Pubkey::new_unique();
        let name = placeholder_name(&mint);
        assert!(name.starts_with(PLACEHOLDER_NAME_PREFIX));
        assert!(name.contains(&mint.to_string()[..6]));
    }

    #[test]
    fn display_name_prefers_resolved() {
        let mut candidate =
            TokenCandidate::new(Pubkey::new_unique(), "sig".to_string(), 100, 101);
        assert!(candidate.display_name().starts_with(PLACEHOLDER_NAME_PREFIX));

        candidate.name = Some("Real Name".to_string());
        candidate.resolution = ResolutionState::Resolved;
        assert_eq!(candidate.display_name(), "Real Name");
        assert!(candidate.has_resolved_name());
    }
}
