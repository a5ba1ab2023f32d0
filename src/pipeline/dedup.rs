//! Dedup guard - the single authority on whether an address was already
//! notified.
//!
//! Two tiers: a process-scoped in-memory set for the fast path, and the
//! durable `notified_tokens` table for correctness across restarts and
//! cooperating processes. The durable record is written after delivery
//! (see `record`), so a crash before a send never leaves a false
//! "notified" row that would silently suppress a legitimate alert.

use crate::storage::AlertStore;
use crate::types::NotificationRecord;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub struct DedupGuard {
    store: Arc<dyn AlertStore>,
    notified: Mutex<HashSet<String>>,
}

impl DedupGuard {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self {
            store,
            notified: Mutex::new(HashSet::new()),
        }
    }

    /// Whether a notification for `address` may be sent.
    ///
    /// Safe under concurrent invocation: the in-memory check-and-insert
    /// is atomic under the lock, so of any number of concurrent calls for
    /// the same address within this process, exactly one passes. The
    /// durable tier then rejects addresses notified by an earlier run.
    ///
    /// On durable-store failure the guard fails open: losing perfect
    /// dedup in a degraded window is preferred over silently suppressing
    /// every alert.
    pub async fn should_notify(&self, address: &str) -> bool {
        {
            let mut notified = self.notified.lock().await;
            if notified.contains(address) {
                debug!("Duplicate within process, suppressing {}", address);
                return false;
            }
            notified.insert(address.to_string());
        }

        match self.store.is_notified(address).await {
            Ok(true) => {
                debug!("Address {} already notified in a previous run", address);
                false
            }
            Ok(false) => true,
            Err(e) => {
                error!(
                    "Durable dedup store unavailable, FAILING OPEN for {}: {:#}",
                    address, e
                );
                true
            }
        }
    }

    /// Persist the notification record after a delivery succeeded.
    ///
    /// Single round-trip insert-if-absent; a conflict means another
    /// worker or process won the race and is only logged.
    pub async fn record(&self, record: &NotificationRecord) {
        match self.store.try_record_notification(record).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "Notification record for {} already existed; a peer process notified first",
                    record.address
                );
            }
            Err(e) => {
                error!(
                    "Failed to persist notification record for {}: {:#}",
                    record.address, e
                );
            }
        }
    }
}
