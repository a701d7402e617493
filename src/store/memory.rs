//! In-memory store backend.
//!
//! The default for tests and for embedding without a database; every
//! operation clones whole records, so readers never observe a torn row.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::lifecycle::{Execution, ExecutionStatus};
use crate::store::Store;
use crate::usage::UsageRecord;
use crate::worker::{Worker, WorkerStatus};

/// Map-backed store.
#[derive(Default)]
pub struct MemoryStore {
    workers: RwLock<HashMap<Uuid, Worker>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
    usage: RwLock<Vec<UsageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded usage entries.
    pub async fn usage_len(&self) -> usize {
        self.usage.read().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_worker(&self, worker: &Worker) -> Result<(), DatabaseError> {
        self.workers
            .write()
            .await
            .insert(worker.id, worker.clone());
        Ok(())
    }

    async fn get_worker(&self, id: Uuid) -> Result<Option<Worker>, DatabaseError> {
        Ok(self.workers.read().await.get(&id).cloned())
    }

    async fn update_worker(&self, worker: &Worker) -> Result<(), DatabaseError> {
        let mut workers = self.workers.write().await;
        if !workers.contains_key(&worker.id) {
            return Err(DatabaseError::NotFound {
                entity: "worker".to_string(),
                id: worker.id.to_string(),
            });
        }
        workers.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn list_workers(
        &self,
        status: Option<WorkerStatus>,
    ) -> Result<Vec<Worker>, DatabaseError> {
        let workers = self.workers.read().await;
        let mut result: Vec<Worker> = workers
            .values()
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<(), DatabaseError> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, DatabaseError> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), DatabaseError> {
        let mut executions = self.executions.write().await;
        if !executions.contains_key(&execution.id) {
            return Err(DatabaseError::NotFound {
                entity: "execution".to_string(),
                id: execution.id.to_string(),
            });
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn list_executions_for_worker(
        &self,
        worker_id: Uuid,
    ) -> Result<Vec<Execution>, DatabaseError> {
        let executions = self.executions.read().await;
        let mut result: Vec<Execution> = executions
            .values()
            .filter(|e| e.worker_id == worker_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn count_executions(
        &self,
        worker_id: Uuid,
        status: ExecutionStatus,
    ) -> Result<u64, DatabaseError> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .filter(|e| e.worker_id == worker_id && e.status == status)
            .count() as u64)
    }

    async fn record_usage(&self, record: &UsageRecord) -> Result<(), DatabaseError> {
        self.usage.write().await.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Archetype;

    #[tokio::test]
    async fn worker_roundtrip() {
        let store = MemoryStore::new();
        let worker = Worker::new("roundtrip", Archetype::Task);
        store.insert_worker(&worker).await.unwrap();

        let loaded = store.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "roundtrip");
        assert_eq!(loaded.capabilities, worker.capabilities);
    }

    #[tokio::test]
    async fn update_missing_worker_fails() {
        let store = MemoryStore::new();
        let worker = Worker::new("ghost", Archetype::Task);
        let err = store.update_worker(&worker).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_workers_filters_by_status() {
        let store = MemoryStore::new();
        let active = Worker::new("active", Archetype::Task);
        let mut inactive = Worker::new("inactive", Archetype::Task);
        inactive.status = WorkerStatus::Inactive;
        store.insert_worker(&active).await.unwrap();
        store.insert_worker(&inactive).await.unwrap();

        let all = store.list_workers(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let active_only = store.list_workers(Some(WorkerStatus::Active)).await.unwrap();
        assert_eq!(active_only.len(), 1);
        assert_eq!(active_only[0].name, "active");
    }
}
