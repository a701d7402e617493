//! Backend-agnostic `Store` trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::lifecycle::{Execution, ExecutionStatus};
use crate::usage::UsageRecord;
use crate::worker::{Worker, WorkerStatus};

/// Single-row create/update storage for worker and execution records.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations. No-op for backends without one.
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    // ── Workers ─────────────────────────────────────────────────────

    /// Insert a new worker.
    async fn insert_worker(&self, worker: &Worker) -> Result<(), DatabaseError>;

    /// Get a worker by ID.
    async fn get_worker(&self, id: Uuid) -> Result<Option<Worker>, DatabaseError>;

    /// Update an existing worker row.
    async fn update_worker(&self, worker: &Worker) -> Result<(), DatabaseError>;

    /// List workers, optionally restricted to one status.
    async fn list_workers(
        &self,
        status: Option<WorkerStatus>,
    ) -> Result<Vec<Worker>, DatabaseError>;

    // ── Executions ──────────────────────────────────────────────────

    /// Insert a new execution.
    async fn insert_execution(&self, execution: &Execution) -> Result<(), DatabaseError>;

    /// Get an execution by ID.
    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, DatabaseError>;

    /// Update an existing execution row.
    async fn update_execution(&self, execution: &Execution) -> Result<(), DatabaseError>;

    /// Full execution history of one worker, oldest first.
    async fn list_executions_for_worker(
        &self,
        worker_id: Uuid,
    ) -> Result<Vec<Execution>, DatabaseError>;

    /// Count a worker's executions in one status.
    async fn count_executions(
        &self,
        worker_id: Uuid,
        status: ExecutionStatus,
    ) -> Result<u64, DatabaseError>;

    // ── Usage ───────────────────────────────────────────────────────

    /// Append a usage record.
    async fn record_usage(&self, record: &UsageRecord) -> Result<(), DatabaseError>;
}
