//! Capability-based worker selection.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::capability::{Capability, infer_capabilities};
use crate::error::{DispatchError, Error};
use crate::lifecycle::ExecutionStatus;
use crate::store::Store;
use crate::worker::{Worker, WorkerStatus};

/// Queued/running execution counts for one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerLoad {
    pub worker_id: Uuid,
    pub name: String,
    pub queued: u64,
    pub running: u64,
}

/// Selects the best available worker for a set of required capabilities.
pub struct Dispatcher {
    store: Arc<dyn Store>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Select a worker whose capability set covers `required`.
    ///
    /// A preferred worker that is active and covers the requirements wins
    /// immediately. Otherwise active workers (minus `exclude`) are
    /// filtered by coverage and the highest-scoring candidate is chosen;
    /// ties go to the lower average response time, then the lower id.
    pub async fn select(
        &self,
        required: &BTreeSet<Capability>,
        preferred_worker_id: Option<Uuid>,
        exclude: &[Uuid],
    ) -> Result<Worker, Error> {
        if let Some(id) = preferred_worker_id {
            if let Some(worker) = self.store.get_worker(id).await? {
                if worker.is_available() && worker.covers(required) {
                    debug!(worker = %worker.name, "Preferred worker selected");
                    return Ok(worker);
                }
            }
        }

        let mut candidates: Vec<Worker> = self
            .store
            .list_workers(Some(WorkerStatus::Active))
            .await?
            .into_iter()
            .filter(|w| !exclude.contains(&w.id) && w.covers(required))
            .collect();

        match candidates.len() {
            0 => Err(DispatchError::NoWorkerAvailable {
                required: required
                    .iter()
                    .map(Capability::tag)
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into()),
            1 => Ok(candidates.remove(0)),
            _ => {
                candidates.sort_by(|a, b| {
                    score_worker(b)
                        .partial_cmp(&score_worker(a))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| {
                            a.metrics
                                .avg_response_time
                                .partial_cmp(&b.metrics.avg_response_time)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .then_with(|| a.id.cmp(&b.id))
                });
                let winner = candidates.remove(0);
                debug!(
                    worker = %winner.name,
                    score = score_worker(&winner),
                    "Worker selected by score"
                );
                Ok(winner)
            }
        }
    }

    /// Select a worker for free-form task text.
    ///
    /// Requirements come from deterministic keyword inference, unless an
    /// explicit `type_hint` overrides them.
    pub async fn select_for_task(
        &self,
        text: &str,
        type_hint: Option<Capability>,
        preferred_worker_id: Option<Uuid>,
    ) -> Result<Worker, Error> {
        let required = match type_hint {
            Some(capability) => BTreeSet::from([capability]),
            None => infer_capabilities(text),
        };
        debug!(?required, "Capabilities inferred for task");
        self.select(&required, preferred_worker_id, &[]).await
    }

    /// Queued/running execution counts per active worker. Read-only; safe
    /// to call concurrently with running executions.
    pub async fn load_stats(&self) -> Result<Vec<WorkerLoad>, Error> {
        let workers = self.store.list_workers(Some(WorkerStatus::Active)).await?;
        let mut stats = Vec::with_capacity(workers.len());
        for worker in workers {
            let queued = self
                .store
                .count_executions(worker.id, ExecutionStatus::Pending)
                .await?;
            let running = self
                .store
                .count_executions(worker.id, ExecutionStatus::Running)
                .await?;
            stats.push(WorkerLoad {
                worker_id: worker.id,
                name: worker.name,
                queued,
                running,
            });
        }
        Ok(stats)
    }
}

/// Rank a worker 0–100.
///
/// Weighted sum of success rate (up to 40), response time (up to 30, 15
/// when there is no timing data yet), experience (up to 20, saturating at
/// 100 invocations) and configured priority (up to 10).
pub fn score_worker(worker: &Worker) -> f64 {
    let success = 0.4 * worker.metrics.success_rate;

    let time = if worker.metrics.avg_response_time > 0.0 {
        30.0 * (1.0 - (worker.metrics.avg_response_time / 10.0).min(1.0)).max(0.0)
    } else {
        15.0
    };

    let experience = (20.0 * worker.metrics.total_invocations as f64 / 100.0).min(20.0);
    let priority = 0.1 * f64::from(worker.priority);

    (success + time + experience + priority).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Archetype, ExecutionContext, ExecutionInput};
    use crate::lifecycle::Execution;
    use crate::store::MemoryStore;

    fn worker_with_metrics(
        name: &str,
        success_rate: f64,
        invocations: u64,
        avg_time: f64,
    ) -> Worker {
        let mut worker = Worker::new(name, Archetype::Task)
            .with_capabilities([Capability::CodeGeneration]);
        worker.metrics.success_rate = success_rate;
        worker.metrics.total_invocations = invocations;
        worker.metrics.avg_response_time = avg_time;
        worker
    }

    async fn dispatcher_with(workers: Vec<Worker>) -> (Dispatcher, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for worker in &workers {
            store.insert_worker(worker).await.unwrap();
        }
        (Dispatcher::new(store.clone() as Arc<dyn Store>), store)
    }

    fn required(caps: impl IntoIterator<Item = Capability>) -> BTreeSet<Capability> {
        caps.into_iter().collect()
    }

    #[tokio::test]
    async fn selected_worker_covers_requirements() {
        let coder = Worker::new("coder", Archetype::Task)
            .with_capabilities([Capability::CodeGeneration]);
        let (dispatcher, _) = dispatcher_with(vec![coder]).await;

        let worker = dispatcher
            .select(&required([Capability::CodeGeneration]), None, &[])
            .await
            .unwrap();
        assert!(worker.covers(&required([Capability::CodeGeneration])));

        let err = dispatcher
            .select(&required([Capability::Devops]), None, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Dispatch(DispatchError::NoWorkerAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn seasoned_worker_outscores_newcomer() {
        // Worked example: A(95%, 150 runs, 2s) vs B(60%, 10 runs, 8s).
        let a = worker_with_metrics("a", 95.0, 150, 2.0);
        let b = worker_with_metrics("b", 60.0, 10, 8.0);
        assert!(score_worker(&a) > score_worker(&b));

        let a_id = a.id;
        let (dispatcher, _) = dispatcher_with(vec![a, b]).await;
        let winner = dispatcher
            .select(&required([Capability::CodeGeneration]), None, &[])
            .await
            .unwrap();
        assert_eq!(winner.id, a_id);
    }

    #[test]
    fn score_components_bounded() {
        let perfect = worker_with_metrics("p", 100.0, 1000, 0.001);
        let w = {
            let mut w = perfect;
            w.priority = 100;
            w
        };
        assert!(score_worker(&w) <= 100.0);

        let fresh = worker_with_metrics("f", 0.0, 0, 0.0);
        // Neutral time midpoint + neutral priority only.
        assert_eq!(score_worker(&fresh), 15.0 + 5.0);
    }

    #[tokio::test]
    async fn preferred_worker_short_circuits_ranking() {
        let strong = worker_with_metrics("strong", 99.0, 200, 1.0);
        let weak = worker_with_metrics("weak", 10.0, 5, 9.0);
        let weak_id = weak.id;
        let (dispatcher, _) = dispatcher_with(vec![strong, weak]).await;

        let winner = dispatcher
            .select(&required([Capability::CodeGeneration]), Some(weak_id), &[])
            .await
            .unwrap();
        assert_eq!(winner.id, weak_id);
    }

    #[tokio::test]
    async fn ineligible_preferred_worker_falls_back() {
        let strong = worker_with_metrics("strong", 99.0, 200, 1.0);
        let mut benched = worker_with_metrics("benched", 99.0, 200, 1.0);
        benched.status = WorkerStatus::Maintenance;
        let strong_id = strong.id;
        let benched_id = benched.id;
        let (dispatcher, _) = dispatcher_with(vec![strong, benched]).await;

        let winner = dispatcher
            .select(
                &required([Capability::CodeGeneration]),
                Some(benched_id),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(winner.id, strong_id);
    }

    #[tokio::test]
    async fn excluded_workers_skipped() {
        let a = worker_with_metrics("a", 95.0, 150, 2.0);
        let b = worker_with_metrics("b", 60.0, 10, 8.0);
        let a_id = a.id;
        let b_id = b.id;
        let (dispatcher, _) = dispatcher_with(vec![a, b]).await;

        let winner = dispatcher
            .select(&required([Capability::CodeGeneration]), None, &[a_id])
            .await
            .unwrap();
        assert_eq!(winner.id, b_id);
    }

    #[tokio::test]
    async fn ties_break_on_time_then_id() {
        // Both response times clamp to a zero time score, so the overall
        // scores tie while the raw averages still differ.
        let a = worker_with_metrics("a", 80.0, 100, 12.0);
        let b = worker_with_metrics("b", 80.0, 100, 11.0);
        assert_eq!(score_worker(&a), score_worker(&b));
        let faster_id = b.id;
        let (dispatcher, _) = dispatcher_with(vec![a.clone(), b.clone()]).await;

        let winner = dispatcher
            .select(&required([Capability::CodeGeneration]), None, &[])
            .await
            .unwrap();
        assert_eq!(winner.id, faster_id);

        // Identical metrics: the lower id wins.
        let c = worker_with_metrics("c", 80.0, 100, 12.0);
        let d = worker_with_metrics("d", 80.0, 100, 12.0);
        let low_id = c.id.min(d.id);
        let (dispatcher, _) = dispatcher_with(vec![c, d]).await;
        let winner = dispatcher
            .select(&required([Capability::CodeGeneration]), None, &[])
            .await
            .unwrap();
        assert_eq!(winner.id, low_id);
    }

    #[tokio::test]
    async fn select_for_task_infers_and_honors_hint() {
        let coder = Worker::new("coder", Archetype::Task)
            .with_capabilities([Capability::CodeGeneration]);
        let ops = Worker::new("ops", Archetype::Task)
            .with_capabilities([Capability::Devops]);
        let coder_id = coder.id;
        let ops_id = ops.id;
        let (dispatcher, _) = dispatcher_with(vec![coder, ops]).await;

        let inferred = dispatcher
            .select_for_task("implement the retry helper", None, None)
            .await
            .unwrap();
        assert_eq!(inferred.id, coder_id);

        let hinted = dispatcher
            .select_for_task("implement the retry helper", Some(Capability::Devops), None)
            .await
            .unwrap();
        assert_eq!(hinted.id, ops_id);
    }

    #[tokio::test]
    async fn select_for_task_defaults_to_task_execution() {
        let generalist = Worker::new("generalist", Archetype::Task);
        let generalist_id = generalist.id;
        let (dispatcher, _) = dispatcher_with(vec![generalist]).await;

        let winner = dispatcher
            .select_for_task("please handle this", None, None)
            .await
            .unwrap();
        assert_eq!(winner.id, generalist_id);
    }

    #[tokio::test]
    async fn load_stats_counts_queued_and_running() {
        let worker = Worker::new("busy", Archetype::Task);
        let (dispatcher, store) = dispatcher_with(vec![worker.clone()]).await;

        let pending = Execution::new(
            &worker,
            ExecutionInput::new("queued"),
            None,
            &ExecutionContext::new(),
        );
        store.insert_execution(&pending).await.unwrap();

        let mut running = Execution::new(
            &worker,
            ExecutionInput::new("running"),
            None,
            &ExecutionContext::new(),
        );
        running.transition_to(ExecutionStatus::Running).unwrap();
        store.insert_execution(&running).await.unwrap();

        let stats = dispatcher.load_stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].queued, 1);
        assert_eq!(stats[0].running, 1);
    }
}
