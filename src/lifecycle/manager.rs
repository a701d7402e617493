//! Execution orchestration.
//!
//! The [`LifecycleManager`] owns the create → start → execute → terminal
//! pipeline, persists every transition, and recomputes the owning worker's
//! metrics on each terminal transition. Buffered execution never fails —
//! it always returns an [`ExecutionOutcome`]. Streaming marks the record
//! failed and then propagates the fault, because chunks already delivered
//! cannot be retracted.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use rust_decimal::Decimal;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::{ExecutionContext, ExecutionCore, ExecutionInput, ExecutionOutcome, StickyProviders};
use crate::error::{Error, ExecutionError};
use crate::lifecycle::execution::{Execution, ExecutionStatus, ExecutionStatusView};
use crate::llm::{ProviderRegistry, completion_cost};
use crate::store::Store;
use crate::usage::{NoopUsageTracker, UsageTracker};
use crate::util::estimate_tokens;
use crate::worker::{Worker, WorkerMetrics};

/// A lazily produced sequence of execution text chunks.
pub type ExecutionStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;

/// Orchestrates execution lifecycles against a store and a provider
/// registry. Construct once per process and share by reference.
pub struct LifecycleManager {
    store: Arc<dyn Store>,
    registry: Arc<ProviderRegistry>,
    sticky: Arc<StickyProviders>,
    usage: Arc<dyn UsageTracker>,
    config: EngineConfig,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn Store>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            store,
            registry,
            sticky: Arc::new(StickyProviders::new()),
            usage: Arc::new(NoopUsageTracker),
            config: EngineConfig::default(),
        }
    }

    /// Set the usage tracker.
    pub fn with_usage_tracker(mut self, usage: Arc<dyn UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    // ── Lifecycle transitions ───────────────────────────────────────

    /// Create and persist a pending execution.
    pub async fn create_execution(
        &self,
        worker: &Worker,
        input: ExecutionInput,
        requester: Option<String>,
        ctx: &ExecutionContext,
    ) -> Result<Execution, Error> {
        let execution = Execution::new(worker, input, requester, ctx);
        self.store.insert_execution(&execution).await?;
        debug!(execution = %execution.id, worker = %worker.name, "Execution created");
        Ok(execution)
    }

    /// Move a pending execution to running.
    pub async fn start_execution(&self, execution: &mut Execution) -> Result<(), Error> {
        execution.transition_to(ExecutionStatus::Running)?;
        self.store.update_execution(execution).await?;
        Ok(())
    }

    /// Terminal success: record output and cost, recompute worker metrics.
    pub async fn complete_execution(
        &self,
        execution: &mut Execution,
        output: String,
        tokens_used: u64,
        cost: Decimal,
        provider: &str,
        model: &str,
    ) -> Result<(), Error> {
        execution.transition_to(ExecutionStatus::Completed)?;
        execution.output = Some(output);
        execution.tokens_used = tokens_used;
        execution.cost = cost;
        execution.provider_used = Some(provider.to_string());
        execution.model_used = Some(model.to_string());
        execution.execution_time = execution.elapsed_seconds();
        self.store.update_execution(execution).await?;

        info!(
            execution = %execution.id,
            provider = %provider,
            tokens = tokens_used,
            "Execution completed"
        );
        self.recompute_worker_metrics(execution.worker_id).await?;
        Ok(())
    }

    /// Terminal failure: record the message, recompute worker metrics.
    pub async fn fail_execution(
        &self,
        execution: &mut Execution,
        message: &str,
    ) -> Result<(), Error> {
        execution.transition_to(ExecutionStatus::Failed)?;
        execution.error = Some(message.to_string());
        execution.execution_time = execution.elapsed_seconds();
        self.store.update_execution(execution).await?;

        warn!(execution = %execution.id, error = %message, "Execution failed");
        self.recompute_worker_metrics(execution.worker_id).await?;
        Ok(())
    }

    /// Cancel a pending or running execution. Terminal records are left
    /// untouched and the call errors.
    pub async fn cancel_execution(&self, execution: &mut Execution) -> Result<(), Error> {
        execution.transition_to(ExecutionStatus::Cancelled)?;
        execution.execution_time = execution.elapsed_seconds();
        self.store.update_execution(execution).await?;

        info!(execution = %execution.id, "Execution cancelled");
        self.recompute_worker_metrics(execution.worker_id).await?;
        Ok(())
    }

    /// Status projection for one execution.
    pub async fn get_execution_status(&self, id: Uuid) -> Result<ExecutionStatusView, Error> {
        let execution = self
            .store
            .get_execution(id)
            .await?
            .ok_or(ExecutionError::NotFound { id })?;
        Ok(ExecutionStatusView::from(&execution))
    }

    /// Recompute a worker's rolling metrics from its full execution
    /// history.
    ///
    /// Deliberately exact rather than incremental: the recomputation is
    /// idempotent and convergent under concurrent terminal transitions,
    /// and the metrics are advisory (ranking input, not correctness).
    async fn recompute_worker_metrics(&self, worker_id: Uuid) -> Result<(), Error> {
        let Some(mut worker) = self.store.get_worker(worker_id).await? else {
            warn!(worker = %worker_id, "Metrics skipped: worker not in store");
            return Ok(());
        };

        let executions = self.store.list_executions_for_worker(worker_id).await?;
        let terminal: Vec<&Execution> = executions
            .iter()
            .filter(|e| e.status.is_terminal())
            .collect();
        let completed: Vec<&Execution> = terminal
            .iter()
            .copied()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .collect();

        let total = terminal.len() as u64;
        let success_rate = if total == 0 {
            0.0
        } else {
            completed.len() as f64 / total as f64 * 100.0
        };
        let avg_response_time = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|e| e.execution_time).sum::<f64>() / completed.len() as f64
        };

        worker.metrics = WorkerMetrics {
            total_invocations: total,
            success_rate,
            avg_response_time,
            total_tokens: terminal.iter().map(|e| e.tokens_used).sum(),
            total_cost: terminal.iter().map(|e| e.cost).sum(),
        };
        worker.updated_at = chrono::Utc::now();
        self.store.update_worker(&worker).await?;

        debug!(
            worker = %worker.name,
            invocations = worker.metrics.total_invocations,
            success_rate = worker.metrics.success_rate,
            "Worker metrics recomputed"
        );
        Ok(())
    }

    // ── End-to-end execution ────────────────────────────────────────

    /// Run one buffered execution: create → start → execute → terminal.
    ///
    /// Never fails. Anything that goes wrong outside the core — store
    /// writes, illegal transitions — is folded into a failure outcome,
    /// with the record marked failed on a best-effort basis.
    pub async fn execute_agent(
        &self,
        worker: &Worker,
        input: ExecutionInput,
        requester: Option<String>,
        ctx: &mut ExecutionContext,
    ) -> ExecutionOutcome {
        let started = Instant::now();

        let mut execution = match self
            .create_execution(worker, input.clone(), requester, ctx)
            .await
        {
            Ok(execution) => execution,
            Err(e) => {
                warn!(worker = %worker.name, error = %e, "Could not create execution");
                return ExecutionOutcome::failure(e.to_string(), started.elapsed());
            }
        };

        if let Err(e) = self.start_execution(&mut execution).await {
            let _ = self.fail_execution(&mut execution, &e.to_string()).await;
            let mut outcome = ExecutionOutcome::failure(e.to_string(), started.elapsed());
            outcome.stamp_execution_id(execution.id);
            return outcome;
        }

        let core = ExecutionCore::new(
            worker.clone(),
            self.registry.clone(),
            self.sticky.clone(),
            self.usage.clone(),
            self.config.clone(),
        );
        let mut outcome = core.execute(&input, ctx).await;
        outcome.stamp_execution_id(execution.id);

        if outcome.success {
            let output = outcome.output.clone().unwrap_or_default();
            let provider = outcome
                .provider_used
                .clone()
                .unwrap_or_else(|| worker.preferred_provider.clone());
            let model = outcome
                .model_used
                .clone()
                .unwrap_or_else(|| worker.model.clone());
            if let Err(e) = self
                .complete_execution(
                    &mut execution,
                    output,
                    outcome.tokens_used,
                    outcome.cost,
                    &provider,
                    &model,
                )
                .await
            {
                warn!(execution = %execution.id, error = %e, "Could not persist completion");
                outcome.success = false;
                outcome.error = Some(e.to_string());
            }
        } else {
            let message = outcome
                .error
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string());
            if let Err(e) = self.fail_execution(&mut execution, &message).await {
                warn!(execution = %execution.id, error = %e, "Could not persist failure");
            }
        }

        outcome
    }

    /// Run one streamed execution.
    ///
    /// Chunks are forwarded to the caller as the provider yields them. On
    /// clean exhaustion the record is completed with the accumulated text
    /// and estimated tokens/cost. A mid-stream fault fails the record —
    /// without persisting the partial output — and is then re-raised to
    /// the caller. A dropped receiver is indistinguishable from
    /// cancellation and cancels the record.
    pub async fn execute_streaming(
        self: Arc<Self>,
        worker: &Worker,
        input: ExecutionInput,
        requester: Option<String>,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionStream, Error> {
        let mut execution = self
            .create_execution(worker, input.clone(), requester, ctx)
            .await?;
        if let Err(e) = self.start_execution(&mut execution).await {
            let _ = self.fail_execution(&mut execution, &e.to_string()).await;
            return Err(e);
        }

        let core = ExecutionCore::new(
            worker.clone(),
            self.registry.clone(),
            self.sticky.clone(),
            self.usage.clone(),
            self.config.clone(),
        );
        let handle = match core.execute_streaming(&input, ctx).await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.fail_execution(&mut execution, &e.to_string()).await;
                return Err(e);
            }
        };

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, Error>>(32);
        let manager = Arc::clone(&self);

        tokio::spawn(async move {
            let mut stream = handle.stream;
            let mut collected = String::new();

            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        collected.push_str(&chunk);
                        if tx.send(Ok(chunk)).await.is_err() {
                            // Receiver dropped — caller-driven cancellation.
                            if let Err(e) = manager.cancel_execution(&mut execution).await {
                                warn!(execution = %execution.id, error = %e, "Cancel after drop failed");
                            }
                            return;
                        }
                    }
                    Err(e) => {
                        let message = e.to_string();
                        if let Err(err) = manager.fail_execution(&mut execution, &message).await {
                            warn!(execution = %execution.id, error = %err, "Could not persist stream failure");
                        }
                        let _ = tx.send(Err(Error::Provider(e))).await;
                        return;
                    }
                }
            }

            let tokens_used = estimate_tokens(&collected);
            let cost = completion_cost(&handle.model, 0, tokens_used);
            if let Err(e) = manager
                .complete_execution(
                    &mut execution,
                    collected,
                    tokens_used,
                    cost,
                    &handle.provider,
                    &handle.model,
                )
                .await
            {
                warn!(execution = %execution.id, error = %e, "Could not persist stream completion");
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
