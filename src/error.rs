//! Error taxonomy for the watch pipeline.
//!
//! Component-internal failures are logged and swallowed where they occur;
//! these variants classify them for retry/fallback decisions. Only startup
//! configuration errors propagate out of `main`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// Network/API failure; retried on the next poll tick or retry cycle.
    #[error("transient network error: {0}")]
    Transient(String),

    /// Timestamp sanity failure or corrupted chain data; dropped, no retry.
    #[error("invalid chain data: {0}")]
    InvalidData(String),

    /// The provider answered with a generic placeholder instead of real
    /// metadata. Not a hard error; routes the candidate to the retry queue.
    #[error("metadata provider returned a placeholder name")]
    ProviderPlaceholder,

    /// All resolution attempts spent. Terminal.
    #[error("metadata resolution exhausted after {attempts} attempts")]
    ResolutionExhausted { attempts: u32 },

    /// A notification channel rejected or timed out on a send.
    #[error("notification delivery failed via {channel}: {reason}")]
    Delivery { channel: String, reason: String },
}

impl WatchError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        WatchError::Transient(err.to_string())
    }

    pub fn delivery(channel: &str, err: impl std::fmt::Display) -> Self {
        WatchError::Delivery {
            channel: channel.to_string(),
            reason: err.to_string(),
        }
    }
}
