//! Usage tracking.
//!
//! Tracking is best-effort: the engine fires a record after each successful
//! completion with a requester attached, and a tracker failure must never
//! affect the execution result.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::UsageError;
use crate::store::Store;

/// One tracked completion.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub id: Uuid,
    pub requester: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u64,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        requester: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        tokens_used: u64,
        cost: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester: requester.into(),
            provider: provider.into(),
            model: model.into(),
            tokens_used,
            cost,
            created_at: Utc::now(),
        }
    }
}

/// Sink for usage records.
#[async_trait]
pub trait UsageTracker: Send + Sync {
    async fn track(&self, record: UsageRecord) -> Result<(), UsageError>;
}

/// Tracker that appends to the store's usage log.
pub struct StoreUsageTracker {
    store: Arc<dyn Store>,
}

impl StoreUsageTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UsageTracker for StoreUsageTracker {
    async fn track(&self, record: UsageRecord) -> Result<(), UsageError> {
        self.store
            .record_usage(&record)
            .await
            .map_err(|e| UsageError::Failed(e.to_string()))
    }
}

/// Tracker that drops every record. Default when no store-backed tracking
/// is wired up.
#[derive(Debug, Default)]
pub struct NoopUsageTracker;

#[async_trait]
impl UsageTracker for NoopUsageTracker {
    async fn track(&self, _record: UsageRecord) -> Result<(), UsageError> {
        Ok(())
    }
}
