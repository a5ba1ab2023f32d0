//! Freshness gate - classifies candidates by creation age.
//!
//! The pipeline's value is near-real-time alerting; a token that is
//! already old will only get older, so rejections are terminal.

use crate::config::FreshnessConfig;
use crate::types::TokenCandidate;

/// Classification of a candidate's creation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within the alerting window; proceeds through the pipeline
    Fresh,
    /// Older than the window; dropped, no retry
    TooOld,
    /// Missing, non-positive or implausibly future timestamp; dropped
    Invalid,
}

/// Stateless classifier over the configured freshness window.
pub struct FreshnessGate {
    config: FreshnessConfig,
}

impl FreshnessGate {
    pub fn new(config: FreshnessConfig) -> Self {
        Self { config }
    }

    /// Classify a candidate at wall-clock `now` (unix seconds).
    ///
    /// Candidates that already carry a resolved name get the configured
    /// age extension: those re-enter from the retry path and have spent
    /// part of the window waiting on the metadata provider.
    pub fn classify(&self, candidate: &TokenCandidate, now: i64) -> Freshness {
        if candidate.created_at <= 0 {
            return Freshness::Invalid;
        }

        let age = now - candidate.created_at;
        if age < -self.config.future_drift_secs {
            return Freshness::Invalid;
        }

        let mut max_age = self.config.max_age_secs;
        if candidate.has_resolved_name() {
            max_age += self.config.confident_age_extension_secs;
        }

        if age > max_age {
            Freshness::TooOld
        } else {
            Freshness::Fresh
        }
    }
}
