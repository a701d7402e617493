//! Execution records and the lifecycle state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{ExecutionContext, ExecutionInput};
use crate::error::ExecutionError;
use crate::worker::Worker;

/// State of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Finished with output.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped before finishing.
    Cancelled,
}

impl ExecutionStatus {
    /// Check if this state allows transitioning to another state.
    ///
    /// Transitions are monotonic and one-way: terminal states never
    /// re-enter anything. Completing or failing straight from `Pending`
    /// is allowed (an execution that never started records zero time).
    pub fn can_transition_to(&self, target: ExecutionStatus) -> bool {
        use ExecutionStatus::*;

        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The string tag stored in the DB status column.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a status from its DB representation.
    pub fn from_tag(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One request/response unit of work bound to a single worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub requester: Option<String>,
    pub input: ExecutionInput,
    /// Snapshot of the context at dispatch time.
    pub context: serde_json::Value,
    pub status: ExecutionStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub provider_used: Option<String>,
    pub model_used: Option<String>,
    pub tokens_used: u64,
    pub cost: Decimal,
    /// Started-to-completed wall time in seconds; 0 if never started.
    pub execution_time: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Create a pending execution with provider/model copied from the
    /// worker's defaults.
    pub fn new(
        worker: &Worker,
        input: ExecutionInput,
        requester: Option<String>,
        ctx: &ExecutionContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker_id: worker.id,
            requester,
            input,
            context: serde_json::to_value(ctx).unwrap_or(serde_json::Value::Null),
            status: ExecutionStatus::Pending,
            output: None,
            error: None,
            provider_used: Some(worker.preferred_provider.clone()),
            model_used: Some(worker.model.clone()),
            tokens_used: 0,
            cost: Decimal::ZERO,
            execution_time: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition to a new state, stamping timestamps.
    ///
    /// `started_at` is set on entering `Running`; `completed_at` is set
    /// exactly once, on the first terminal transition.
    pub fn transition_to(&mut self, target: ExecutionStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(target) {
            return Err(ExecutionError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: target,
            });
        }

        self.status = target;
        match target {
            ExecutionStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
                if self.completed_at.is_none() =>
            {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(())
    }

    /// Wall time between start and completion, 0 if either is missing.
    pub fn elapsed_seconds(&self) -> f64 {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                (completed - started).num_milliseconds().max(0) as f64 / 1000.0
            }
            _ => 0.0,
        }
    }
}

/// Read-only status projection exposed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStatusView {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub status: ExecutionStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub provider_used: Option<String>,
    pub model_used: Option<String>,
    pub tokens_used: u64,
    pub cost: Decimal,
    pub execution_time: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Execution> for ExecutionStatusView {
    fn from(execution: &Execution) -> Self {
        Self {
            id: execution.id,
            worker_id: execution.worker_id,
            status: execution.status,
            output: execution.output.clone(),
            error: execution.error.clone(),
            provider_used: execution.provider_used.clone(),
            model_used: execution.model_used.clone(),
            tokens_used: execution.tokens_used,
            cost: execution.cost,
            execution_time: execution.execution_time,
            created_at: execution.created_at,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
        }
    }
}
