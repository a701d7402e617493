//! End-to-end lifecycle tests over the public API, using the always-on
//! degraded provider so no network or scripted backend is needed.

use std::sync::Arc;

use agent_dispatch::capability::Capability;
use agent_dispatch::dispatch::Dispatcher;
use agent_dispatch::engine::{Archetype, ExecutionContext, ExecutionInput};
use agent_dispatch::lifecycle::{ExecutionStatus, LifecycleManager};
use agent_dispatch::llm::ProviderRegistry;
use agent_dispatch::store::{LibSqlBackend, MemoryStore, Store};
use agent_dispatch::worker::Worker;
use futures::StreamExt;
use uuid::Uuid;

async fn setup(store: Arc<dyn Store>) -> (Dispatcher, Arc<LifecycleManager>, Worker) {
    let worker = Worker::new("generalist", Archetype::Task)
        .with_capabilities([Capability::CodeGeneration, Capability::Research]);
    store.insert_worker(&worker).await.unwrap();

    let dispatcher = Dispatcher::new(store.clone());
    let manager = Arc::new(LifecycleManager::new(
        store,
        Arc::new(ProviderRegistry::new()),
    ));
    (dispatcher, manager, worker)
}

#[tokio::test]
async fn dispatch_and_execute_against_degraded_provider() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (dispatcher, manager, seeded) = setup(store.clone()).await;

    let worker = dispatcher
        .select_for_task("research the options and implement code", None, None)
        .await
        .unwrap();
    assert_eq!(worker.id, seeded.id);

    let outcome = manager
        .execute_agent(
            &worker,
            ExecutionInput::new("research the options"),
            Some("it-tester".to_string()),
            &mut ExecutionContext::new(),
        )
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.provider_used.as_deref(), Some("degraded"));
    let output = outcome.output.as_deref().unwrap();
    assert!(output.contains("research the options"));

    let id: Uuid = outcome.metadata["execution_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let view = manager.get_execution_status(id).await.unwrap();
    assert_eq!(view.status, ExecutionStatus::Completed);
    assert!(view.completed_at.is_some());

    let refreshed = store.get_worker(worker.id).await.unwrap().unwrap();
    assert_eq!(refreshed.metrics.total_invocations, 1);
    assert_eq!(refreshed.metrics.success_rate, 100.0);
}

#[tokio::test]
async fn streaming_end_to_end_matches_buffered_output() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (_, manager, worker) = setup(store.clone()).await;

    let mut stream = manager
        .clone()
        .execute_streaming(
            &worker,
            ExecutionInput::new("stream the acknowledgement"),
            None,
            &ExecutionContext::new(),
        )
        .await
        .unwrap();

    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk.unwrap());
    }
    assert!(text.contains("stream the acknowledgement"));

    let executions = store
        .list_executions_for_worker(worker.id)
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Completed);
    assert_eq!(executions[0].output.as_deref(), Some(text.as_str()));
    assert!(executions[0].tokens_used > 0);
}

#[tokio::test]
async fn load_stats_reflect_terminal_executions() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (dispatcher, manager, worker) = setup(store.clone()).await;

    manager
        .execute_agent(
            &worker,
            ExecutionInput::new("one"),
            None,
            &mut ExecutionContext::new(),
        )
        .await;

    let stats = dispatcher.load_stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    // The execution ran to completion, so nothing is queued or running.
    assert_eq!(stats[0].queued, 0);
    assert_eq!(stats[0].running, 0);
}

#[tokio::test]
async fn full_lifecycle_on_libsql_backend() {
    let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let (dispatcher, manager, _) = setup(store.clone()).await;

    let worker = dispatcher
        .select_for_task("implement a parser", None, None)
        .await
        .unwrap();

    let outcome = manager
        .execute_agent(
            &worker,
            ExecutionInput::new("implement a parser"),
            None,
            &mut ExecutionContext::new(),
        )
        .await;
    assert!(outcome.success, "{:?}", outcome.error);

    let refreshed = store.get_worker(worker.id).await.unwrap().unwrap();
    assert_eq!(refreshed.metrics.total_invocations, 1);
    assert_eq!(refreshed.metrics.success_rate, 100.0);
    assert!(refreshed.metrics.total_tokens > 0);
}
