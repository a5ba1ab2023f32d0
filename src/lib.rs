//! mintwatch - watches an on-chain program for newly created tokens,
//! resolves display metadata, filters against a keyword watchlist and
//! emits exactly-once notifications.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export main types for convenience
pub use config::WatchConfig;
pub use error::WatchError;
pub use types::{NotificationRecord, ResolutionState, TokenCandidate, WatchlistEntry};
