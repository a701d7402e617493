//! libSQL backend — async `Store` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! RFC 3339 text; capability/provider lists, inputs, and context snapshots
//! are JSON columns; cost is decimal text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::lifecycle::{Execution, ExecutionStatus};
use crate::store::migrations;
use crate::store::traits::Store;
use crate::usage::UsageRecord;
use crate::worker::{Worker, WorkerMetrics, WorkerStatus};

/// libSQL store backend.
///
/// Holds a single connection that is reused for all operations;
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

const WORKER_COLUMNS: &str = "id, name, archetype, capabilities, preferred_provider, \
     fallback_providers, model, temperature, max_tokens, priority, system_prompt, status, \
     total_invocations, success_rate, avg_response_time, total_tokens, total_cost, \
     created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, worker_id, requester, input, context, status, output, \
     error, provider_used, model_used, tokens_used, cost, execution_time, created_at, \
     started_at, completed_at";

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and ephemeral runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Map a libsql row to a Worker. Column order matches WORKER_COLUMNS.
fn row_to_worker(row: &libsql::Row) -> Result<Worker, libsql::Error> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let archetype: String = row.get(2)?;
    let capabilities: String = row.get(3)?;
    let preferred_provider: String = row.get(4)?;
    let fallback_providers: String = row.get(5)?;
    let model: String = row.get(6)?;
    let temperature: f64 = row.get(7)?;
    let max_tokens: i64 = row.get(8)?;
    let priority: i64 = row.get(9)?;
    let system_prompt: Option<String> = row.get::<String>(10).ok();
    let status: String = row.get(11)?;
    let total_invocations: i64 = row.get(12)?;
    let success_rate: f64 = row.get(13)?;
    let avg_response_time: f64 = row.get(14)?;
    let total_tokens: i64 = row.get(15)?;
    let total_cost: String = row.get(16)?;
    let created_at: String = row.get(17)?;
    let updated_at: String = row.get(18)?;

    Ok(Worker {
        id: parse_uuid(&id),
        name,
        archetype: crate::engine::Archetype::from_tag(&archetype),
        capabilities: serde_json::from_str(&capabilities).unwrap_or_default(),
        preferred_provider,
        fallback_providers: serde_json::from_str(&fallback_providers).unwrap_or_default(),
        model,
        temperature: temperature as f32,
        max_tokens: max_tokens.max(0) as u32,
        priority: priority.clamp(0, 100) as u8,
        system_prompt,
        status: WorkerStatus::from_tag(&status),
        metrics: WorkerMetrics {
            total_invocations: total_invocations.max(0) as u64,
            success_rate,
            avg_response_time,
            total_tokens: total_tokens.max(0) as u64,
            total_cost: total_cost.parse().unwrap_or_default(),
        },
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// Map a libsql row to an Execution. Column order matches EXECUTION_COLUMNS.
fn row_to_execution(row: &libsql::Row) -> Result<Execution, libsql::Error> {
    let id: String = row.get(0)?;
    let worker_id: String = row.get(1)?;
    let requester: Option<String> = row.get::<String>(2).ok();
    let input: String = row.get(3)?;
    let context: String = row.get(4)?;
    let status: String = row.get(5)?;
    let output: Option<String> = row.get::<String>(6).ok();
    let error: Option<String> = row.get::<String>(7).ok();
    let provider_used: Option<String> = row.get::<String>(8).ok();
    let model_used: Option<String> = row.get::<String>(9).ok();
    let tokens_used: i64 = row.get(10)?;
    let cost: String = row.get(11)?;
    let execution_time: f64 = row.get(12)?;
    let created_at: String = row.get(13)?;
    let started_at: Option<String> = row.get::<String>(14).ok();
    let completed_at: Option<String> = row.get::<String>(15).ok();

    Ok(Execution {
        id: parse_uuid(&id),
        worker_id: parse_uuid(&worker_id),
        requester,
        input: serde_json::from_str(&input).unwrap_or_default(),
        context: serde_json::from_str(&context).unwrap_or(serde_json::Value::Null),
        status: ExecutionStatus::from_tag(&status),
        output,
        error,
        provider_used,
        model_used,
        tokens_used: tokens_used.max(0) as u64,
        cost: cost.parse().unwrap_or_default(),
        execution_time,
        created_at: parse_datetime(&created_at),
        started_at: started_at.as_deref().map(parse_datetime),
        completed_at: completed_at.as_deref().map(parse_datetime),
    })
}

#[async_trait]
impl Store for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_worker(&self, worker: &Worker) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO workers (id, name, archetype, capabilities, preferred_provider,
                    fallback_providers, model, temperature, max_tokens, priority, system_prompt,
                    status, total_invocations, success_rate, avg_response_time, total_tokens,
                    total_cost, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19)",
                params![
                    worker.id.to_string(),
                    worker.name.clone(),
                    worker.archetype.tag(),
                    serde_json::to_string(&worker.capabilities).unwrap_or_default(),
                    worker.preferred_provider.clone(),
                    serde_json::to_string(&worker.fallback_providers).unwrap_or_default(),
                    worker.model.clone(),
                    f64::from(worker.temperature),
                    i64::from(worker.max_tokens),
                    i64::from(worker.priority),
                    opt_text(worker.system_prompt.as_deref()),
                    worker.status.tag(),
                    worker.metrics.total_invocations as i64,
                    worker.metrics.success_rate,
                    worker.metrics.avg_response_time,
                    worker.metrics.total_tokens as i64,
                    worker.metrics.total_cost.to_string(),
                    worker.created_at.to_rfc3339(),
                    worker.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_worker: {e}")))?;

        debug!(worker = %worker.id, "Worker inserted");
        Ok(())
    }

    async fn get_worker(&self, id: Uuid) -> Result<Option<Worker>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_worker: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_worker(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_worker row: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_worker: {e}"))),
        }
    }

    async fn update_worker(&self, worker: &Worker) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE workers SET name = ?2, archetype = ?3, capabilities = ?4,
                    preferred_provider = ?5, fallback_providers = ?6, model = ?7,
                    temperature = ?8, max_tokens = ?9, priority = ?10, system_prompt = ?11,
                    status = ?12, total_invocations = ?13, success_rate = ?14,
                    avg_response_time = ?15, total_tokens = ?16, total_cost = ?17,
                    updated_at = ?18
                 WHERE id = ?1",
                params![
                    worker.id.to_string(),
                    worker.name.clone(),
                    worker.archetype.tag(),
                    serde_json::to_string(&worker.capabilities).unwrap_or_default(),
                    worker.preferred_provider.clone(),
                    serde_json::to_string(&worker.fallback_providers).unwrap_or_default(),
                    worker.model.clone(),
                    f64::from(worker.temperature),
                    i64::from(worker.max_tokens),
                    i64::from(worker.priority),
                    opt_text(worker.system_prompt.as_deref()),
                    worker.status.tag(),
                    worker.metrics.total_invocations as i64,
                    worker.metrics.success_rate,
                    worker.metrics.avg_response_time,
                    worker.metrics.total_tokens as i64,
                    worker.metrics.total_cost.to_string(),
                    worker.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_worker: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "worker".to_string(),
                id: worker.id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_workers(
        &self,
        status: Option<WorkerStatus>,
    ) -> Result<Vec<Worker>, DatabaseError> {
        let mut rows = match status {
            Some(status) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {WORKER_COLUMNS} FROM workers WHERE status = ?1
                         ORDER BY created_at, id"
                    ),
                    params![status.tag()],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!("SELECT {WORKER_COLUMNS} FROM workers ORDER BY created_at, id"),
                    (),
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("list_workers: {e}")))?;

        let mut workers = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            workers.push(
                row_to_worker(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_workers row: {e}")))?,
            );
        }
        Ok(workers)
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO executions (id, worker_id, requester, input, context, status,
                    output, error, provider_used, model_used, tokens_used, cost,
                    execution_time, created_at, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    execution.id.to_string(),
                    execution.worker_id.to_string(),
                    opt_text(execution.requester.as_deref()),
                    serde_json::to_string(&execution.input).unwrap_or_default(),
                    serde_json::to_string(&execution.context).unwrap_or_default(),
                    execution.status.tag(),
                    opt_text(execution.output.as_deref()),
                    opt_text(execution.error.as_deref()),
                    opt_text(execution.provider_used.as_deref()),
                    opt_text(execution.model_used.as_deref()),
                    execution.tokens_used as i64,
                    execution.cost.to_string(),
                    execution.execution_time,
                    execution.created_at.to_rfc3339(),
                    opt_text(execution.started_at.map(|t| t.to_rfc3339()).as_deref()),
                    opt_text(execution.completed_at.map(|t| t.to_rfc3339()).as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_execution: {e}")))?;

        debug!(execution = %execution.id, "Execution inserted");
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_execution: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_execution(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_execution row: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_execution: {e}"))),
        }
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE executions SET status = ?2, output = ?3, error = ?4,
                    provider_used = ?5, model_used = ?6, tokens_used = ?7, cost = ?8,
                    execution_time = ?9, started_at = ?10, completed_at = ?11
                 WHERE id = ?1",
                params![
                    execution.id.to_string(),
                    execution.status.tag(),
                    opt_text(execution.output.as_deref()),
                    opt_text(execution.error.as_deref()),
                    opt_text(execution.provider_used.as_deref()),
                    opt_text(execution.model_used.as_deref()),
                    execution.tokens_used as i64,
                    execution.cost.to_string(),
                    execution.execution_time,
                    opt_text(execution.started_at.map(|t| t.to_rfc3339()).as_deref()),
                    opt_text(execution.completed_at.map(|t| t.to_rfc3339()).as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_execution: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "execution".to_string(),
                id: execution.id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_executions_for_worker(
        &self,
        worker_id: Uuid,
    ) -> Result<Vec<Execution>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EXECUTION_COLUMNS} FROM executions WHERE worker_id = ?1
                     ORDER BY created_at, id"
                ),
                params![worker_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_executions_for_worker: {e}")))?;

        let mut executions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            executions.push(row_to_execution(&row).map_err(|e| {
                DatabaseError::Query(format!("list_executions_for_worker row: {e}"))
            })?);
        }
        Ok(executions)
    }

    async fn count_executions(
        &self,
        worker_id: Uuid,
        status: ExecutionStatus,
    ) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM executions WHERE worker_id = ?1 AND status = ?2",
                params![worker_id.to_string(), status.tag()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_executions: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_executions row: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_executions: {e}"))),
        }
    }

    async fn record_usage(&self, record: &UsageRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO usage_log (id, requester, provider, model, tokens_used, cost,
                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.to_string(),
                    record.requester.clone(),
                    record.provider.clone(),
                    record.model.clone(),
                    record.tokens_used as i64,
                    record.cost.to_string(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_usage: {e}")))?;
        Ok(())
    }
}
