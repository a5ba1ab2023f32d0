//! Tests for the at-most-once guarantee of the Dedup Guard.

use anyhow::Result;
use async_trait::async_trait;
use mintwatch::pipeline::DedupGuard;
use mintwatch::storage::{AlertStore, SqliteAlertStore};
use mintwatch::types::{DenylistEntry, NotificationRecord, WatchlistEntry};
use std::sync::Arc;

fn temp_db_path(label: &str) -> String {
    let unique_id = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    std::env::temp_dir()
        .join(format!("mintwatch_test_{}_{}.db", label, unique_id))
        .to_string_lossy()
        .to_string()
}

fn record_for(address: &str) -> NotificationRecord {
    NotificationRecord {
        address: address.to_string(),
        token_name: "Test Token".to_string(),
        notification_type: "keyword:test".to_string(),
        notified_at: chrono::Utc::now().timestamp(),
    }
}

#[tokio::test]
async fn concurrent_should_notify_passes_exactly_once() -> Result<()> {
    let store = SqliteAlertStore::connect(&temp_db_path("concurrent")).await?;
    let guard = Arc::new(DedupGuard::new(store));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let guard = guard.clone();
        handles.push(tokio::spawn(async move {
            guard.should_notify("TokenAddressX").await
        }));
    }

    let mut passed = 0;
    for handle in handles {
        if handle.await? {
            passed += 1;
        }
    }

    assert_eq!(passed, 1, "exactly one concurrent caller may notify");
    Ok(())
}

#[tokio::test]
async fn distinct_addresses_do_not_interfere() -> Result<()> {
    let store = SqliteAlertStore::connect(&temp_db_path("distinct")).await?;
    let guard = DedupGuard::new(store);

    assert!(guard.should_notify("AddressA").await);
    assert!(guard.should_notify("AddressB").await);
    assert!(!guard.should_notify("AddressA").await);
    Ok(())
}

#[tokio::test]
async fn recorded_notification_survives_restart() -> Result<()> {
    let db_path = temp_db_path("restart");

    // First run: notify and record
    {
        let store = SqliteAlertStore::connect(&db_path).await?;
        let guard = DedupGuard::new(store.clone());
        assert!(guard.should_notify("PersistentAddress").await);
        guard.record(&record_for("PersistentAddress")).await;
        assert_eq!(store.notified_count().await?, 1);
    }

    // Second run against the same database file (simulated restart)
    {
        let store = SqliteAlertStore::connect(&db_path).await?;
        let guard = DedupGuard::new(store);
        assert!(
            !guard.should_notify("PersistentAddress").await,
            "restart must not re-notify a recorded address"
        );
    }

    Ok(())
}

#[tokio::test]
async fn record_is_insert_if_absent() -> Result<()> {
    let store = SqliteAlertStore::connect(&temp_db_path("absent")).await?;

    assert!(store.try_record_notification(&record_for("Once")).await?);
    assert!(!store.try_record_notification(&record_for("Once")).await?);
    assert_eq!(store.notified_count().await?, 1);
    Ok(())
}

/// Store whose durable tier is down; every call errors.
struct UnavailableStore;

#[async_trait]
impl AlertStore for UnavailableStore {
    async fn try_record_notification(&self, _record: &NotificationRecord) -> Result<bool> {
        anyhow::bail!("store unavailable")
    }
    async fn is_notified(&self, _address: &str) -> Result<bool> {
        anyhow::bail!("store unavailable")
    }
    async fn watchlist(&self, _scope: &str) -> Result<Vec<WatchlistEntry>> {
        anyhow::bail!("store unavailable")
    }
    async fn add_keyword(&self, _keyword: &str, _scope: &str) -> Result<bool> {
        anyhow::bail!("store unavailable")
    }
    async fn remove_keyword(&self, _keyword: &str, _scope: &str) -> Result<bool> {
        anyhow::bail!("store unavailable")
    }
    async fn denylist(&self) -> Result<Vec<DenylistEntry>> {
        anyhow::bail!("store unavailable")
    }
    async fn last_processed_timestamp(&self) -> Result<Option<i64>> {
        anyhow::bail!("store unavailable")
    }
    async fn set_last_processed_timestamp(&self, _timestamp: i64) -> Result<()> {
        anyhow::bail!("store unavailable")
    }
    async fn notified_count(&self) -> Result<i64> {
        anyhow::bail!("store unavailable")
    }
    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn guard_fails_open_when_store_is_down() {
    let guard = DedupGuard::new(Arc::new(UnavailableStore));

    // Alerting availability wins over perfect dedup in degraded mode
    assert!(guard.should_notify("DegradedAddress").await);

    // The in-memory tier still suppresses in-process duplicates
    assert!(!guard.should_notify("DegradedAddress").await);
}
