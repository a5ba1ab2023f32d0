//! Process-wide counters read by the external health collaborator.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the current process. Cheap to share and update; the
/// external health reporter reads a snapshot.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    candidates_observed: AtomicU64,
    candidates_fresh: AtomicU64,
    resolutions_succeeded: AtomicU64,
    resolutions_exhausted: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    dedup_rejections: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub candidates_observed: u64,
    pub candidates_fresh: u64,
    pub resolutions_succeeded: u64,
    pub resolutions_exhausted: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub dedup_rejections: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_candidate_observed(&self) {
        self.candidates_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_candidate_fresh(&self) {
        self.candidates_fresh.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution_succeeded(&self) {
        self.resolutions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution_exhausted(&self) {
        self.resolutions_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_rejection(&self) {
        self.dedup_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            candidates_observed: self.candidates_observed.load(Ordering::Relaxed),
            candidates_fresh: self.candidates_fresh.load(Ordering::Relaxed),
            resolutions_succeeded: self.resolutions_succeeded.load(Ordering::Relaxed),
            resolutions_exhausted: self.resolutions_exhausted.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            dedup_rejections: self.dedup_rejections.load(Ordering::Relaxed),
        }
    }
}
