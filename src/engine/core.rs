//! Per-call execution pipeline.
//!
//! An [`ExecutionCore`] snapshots one worker's configuration and runs the
//! prompt → fallback → post-process pipeline for a single call. The
//! buffered path never returns an error: every failure is folded into the
//! [`ExecutionOutcome`] it hands back.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::context::{ExecutionContext, ExecutionInput};
use crate::error::{Error, ProviderError};
use crate::llm::{
    CompletionRequest, CompletionResponse, CompletionStream, ProviderRegistry,
};
use crate::usage::{UsageRecord, UsageTracker};
use crate::worker::Worker;

/// Advisory per-worker cache of the last provider that answered.
///
/// Read at the head of every fallback chain so subsequent calls try the
/// known-good backend first. Updates may race under concurrent calls on
/// the same worker; the losing write only costs one extra failed attempt
/// later, so no synchronization beyond the lock is needed.
#[derive(Debug, Default)]
pub struct StickyProviders {
    inner: RwLock<HashMap<Uuid, String>>,
}

impl StickyProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, worker_id: Uuid) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|map| map.get(&worker_id).cloned())
    }

    pub fn record(&self, worker_id: Uuid, provider: impl Into<String>) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(worker_id, provider.into());
        }
    }
}

/// Result of one buffered execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub tokens_used: u64,
    pub cost: Decimal,
    /// Wall-clock pipeline time in seconds.
    pub execution_time: f64,
    pub provider_used: Option<String>,
    pub model_used: Option<String>,
    pub metadata: serde_json::Value,
}

impl ExecutionOutcome {
    fn succeeded(output: String, response: &CompletionResponse, elapsed: Duration) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            tokens_used: response.tokens_used,
            cost: response.cost,
            execution_time: elapsed.as_secs_f64(),
            provider_used: Some(response.provider.clone()),
            model_used: Some(response.model.clone()),
            metadata: serde_json::json!({}),
        }
    }

    pub fn failure(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            tokens_used: 0,
            cost: Decimal::ZERO,
            execution_time: elapsed.as_secs_f64(),
            provider_used: None,
            model_used: None,
            metadata: serde_json::json!({}),
        }
    }

    /// Record which execution this outcome belongs to.
    pub fn stamp_execution_id(&mut self, id: Uuid) {
        self.metadata["execution_id"] = serde_json::json!(id.to_string());
    }
}

/// A provider stream plus the identity of the backend producing it.
pub struct StreamHandle {
    pub stream: CompletionStream,
    pub provider: String,
    pub model: String,
}

/// One worker's execution pipeline.
pub struct ExecutionCore {
    worker: Worker,
    registry: Arc<ProviderRegistry>,
    sticky: Arc<StickyProviders>,
    usage: Arc<dyn UsageTracker>,
    config: EngineConfig,
}

impl ExecutionCore {
    pub fn new(
        worker: Worker,
        registry: Arc<ProviderRegistry>,
        sticky: Arc<StickyProviders>,
        usage: Arc<dyn UsageTracker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            worker,
            registry,
            sticky,
            usage,
            config,
        }
    }

    /// Run the buffered pipeline. Never fails: prompt construction,
    /// provider fallback, and post-processing errors all come back as a
    /// failure outcome.
    pub async fn execute(
        &self,
        input: &ExecutionInput,
        ctx: &mut ExecutionContext,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        match self.run(input, ctx, started).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(worker = %self.worker.name, error = %e, "Execution failed");
                ExecutionOutcome::failure(e.to_string(), started.elapsed())
            }
        }
    }

    async fn run(
        &self,
        input: &ExecutionInput,
        ctx: &mut ExecutionContext,
        started: Instant,
    ) -> Result<ExecutionOutcome, Error> {
        let request = self.build_request(input, ctx);
        let response = self.execute_with_fallback(&request).await?;
        let output = self.worker.archetype.process_response(
            input,
            ctx,
            &response.content,
            self.config.history_window,
        );

        if let Some(ref requester) = ctx.requester {
            self.track_usage(requester, &response);
        }

        Ok(ExecutionOutcome::succeeded(
            output,
            &response,
            started.elapsed(),
        ))
    }

    fn build_request(&self, input: &ExecutionInput, ctx: &ExecutionContext) -> CompletionRequest {
        let prompt =
            self.worker
                .archetype
                .prepare_prompt(input, ctx, self.config.history_window);
        let system_prompt = self
            .worker
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.worker.archetype.default_system_prompt().to_string());

        CompletionRequest {
            prompt,
            system_prompt: Some(system_prompt),
            temperature: self.worker.temperature,
            max_tokens: self.worker.max_tokens,
            model: self.worker.model.clone(),
        }
    }

    /// Try providers strictly in order; first success wins and is recorded
    /// in the sticky cache for subsequent calls on this worker.
    pub async fn execute_with_fallback(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let order = self.provider_order().await;
        let mut last_error = String::new();

        for name in &order {
            let Some(provider) = self.registry.get(name).await else {
                debug!(provider = %name, "Provider not registered, skipping");
                last_error = ProviderError::Unavailable { name: name.clone() }.to_string();
                continue;
            };

            match provider.complete(request).await {
                Ok(response) => {
                    self.sticky.record(self.worker.id, name.clone());
                    info!(
                        worker = %self.worker.name,
                        provider = %name,
                        tokens = response.tokens_used,
                        "Completion succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(ProviderError::AllFailed { last_error })
    }

    /// Ordered provider names for this call: sticky-or-preferred first,
    /// then the configured fallbacks, deduplicated. The degraded provider
    /// goes to the front when it is all the registry has, otherwise it is
    /// appended as the last resort.
    async fn provider_order(&self) -> Vec<String> {
        let first = self
            .sticky
            .get(self.worker.id)
            .unwrap_or_else(|| self.worker.preferred_provider.clone());

        let mut order = vec![first];
        for fallback in &self.worker.fallback_providers {
            if !order.contains(fallback) {
                order.push(fallback.clone());
            }
        }

        let degraded = self.config.degraded_provider.clone();
        if self.registry.is_degraded_only().await {
            order.retain(|name| name != &degraded);
            order.insert(0, degraded);
        } else if !order.contains(&degraded) {
            order.push(degraded);
        }

        order
    }

    /// Open a chunk stream against a single provider.
    ///
    /// The first registered name in fallback order is chosen up front; once
    /// the stream is open there is no retry, and a mid-stream fault reaches
    /// the caller as an `Err` item.
    pub async fn execute_streaming(
        &self,
        input: &ExecutionInput,
        ctx: &ExecutionContext,
    ) -> Result<StreamHandle, Error> {
        let request = self.build_request(input, ctx);

        let order = self.provider_order().await;
        let mut chosen = None;
        for name in &order {
            if let Some(provider) = self.registry.get(name).await {
                chosen = Some((name.clone(), provider));
                break;
            }
        }
        // The registry always holds the degraded provider, and the degraded
        // name is always in the order, so this cannot miss.
        let (name, provider) = chosen.ok_or_else(|| ProviderError::Unavailable {
            name: order.first().cloned().unwrap_or_default(),
        })?;

        debug!(worker = %self.worker.name, provider = %name, "Opening completion stream");
        let stream = provider.complete_streaming(&request).await?;

        Ok(StreamHandle {
            stream,
            provider: name,
            model: self.worker.model.clone(),
        })
    }

    fn track_usage(&self, requester: &str, response: &CompletionResponse) {
        let tracker = self.usage.clone();
        let record = UsageRecord::new(
            requester,
            &response.provider,
            &response.model,
            response.tokens_used,
            response.cost,
        );
        tokio::spawn(async move {
            if let Err(e) = tracker.track(record).await {
                warn!(error = %e, "Usage tracking failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Archetype;
    use crate::llm::mock::{MockBehavior, MockProvider};
    use crate::error::UsageError;
    use crate::usage::NoopUsageTracker;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn core_with(
        worker: Worker,
        registry: Arc<ProviderRegistry>,
        sticky: Arc<StickyProviders>,
    ) -> ExecutionCore {
        ExecutionCore::new(
            worker,
            registry,
            sticky,
            Arc::new(NoopUsageTracker),
            EngineConfig::default(),
        )
    }

    async fn registry_with(providers: Vec<MockProvider>) -> Arc<ProviderRegistry> {
        let registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(Arc::new(provider)).await;
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn fallback_reaches_second_provider_and_sticks() {
        let registry = registry_with(vec![
            MockProvider::new("flaky", MockBehavior::Fail("boom".to_string())),
            MockProvider::new("stable", MockBehavior::Succeed("answer".to_string())),
        ])
        .await;
        let sticky = Arc::new(StickyProviders::new());
        let worker = Worker::new("w", Archetype::Task)
            .with_providers("flaky", vec!["stable".to_string()]);
        let worker_id = worker.id;
        let core = core_with(worker, registry, sticky.clone());

        let request = CompletionRequest::new("do it", "m");
        let response = core.execute_with_fallback(&request).await.unwrap();

        assert_eq!(response.provider, "stable");
        assert_eq!(response.content, "answer");
        assert_eq!(sticky.get(worker_id).as_deref(), Some("stable"));
    }

    #[tokio::test]
    async fn all_providers_failing_reports_last_error() {
        let registry = registry_with(vec![
            MockProvider::new("a", MockBehavior::Fail("first down".to_string())),
            MockProvider::new("b", MockBehavior::Fail("second down".to_string())),
        ])
        .await;
        let worker = Worker::new("w", Archetype::Task)
            .with_providers("a", vec!["b".to_string()]);
        // Keep the always-on provider out of the way so every attempt fails:
        // the config's degraded name points at "b", which is already in the
        // chain and scripted to fail.
        let mut config = EngineConfig::default();
        config.degraded_provider = "b".to_string();
        let core = ExecutionCore::new(
            worker,
            registry,
            Arc::new(StickyProviders::new()),
            Arc::new(NoopUsageTracker),
            config,
        );

        let outcome = core
            .execute(&ExecutionInput::new("task"), &mut ExecutionContext::new())
            .await;

        assert!(!outcome.success);
        let error = outcome.error.unwrap();
        assert!(error.contains("All providers failed"), "{error}");
        assert!(error.contains("second down"), "{error}");
    }

    #[tokio::test]
    async fn degraded_only_registry_front_runs_degraded() {
        let registry = Arc::new(ProviderRegistry::new());
        let worker = Worker::new("w", Archetype::Task)
            .with_providers("anthropic", vec!["openai".to_string()]);
        let core = core_with(worker, registry, Arc::new(StickyProviders::new()));

        let order = core.provider_order().await;
        assert_eq!(order[0], "degraded");
    }

    #[tokio::test]
    async fn degraded_appended_when_real_providers_exist() {
        let registry = registry_with(vec![MockProvider::new(
            "anthropic",
            MockBehavior::Succeed("hi".to_string()),
        )])
        .await;
        let worker = Worker::new("w", Archetype::Task)
            .with_providers("anthropic", vec!["openai".to_string()]);
        let core = core_with(worker, registry, Arc::new(StickyProviders::new()));

        let order = core.provider_order().await;
        assert_eq!(order, vec!["anthropic", "openai", "degraded"]);
    }

    #[tokio::test]
    async fn sticky_winner_moves_to_front() {
        let registry = registry_with(vec![MockProvider::new(
            "openai",
            MockBehavior::Succeed("hi".to_string()),
        )])
        .await;
        let sticky = Arc::new(StickyProviders::new());
        let worker = Worker::new("w", Archetype::Task)
            .with_providers("anthropic", vec!["openai".to_string()]);
        sticky.record(worker.id, "openai");
        let core = core_with(worker, registry, sticky);

        let order = core.provider_order().await;
        assert_eq!(order[0], "openai");
    }

    #[tokio::test]
    async fn execute_success_carries_provider_and_timing() {
        let registry = registry_with(vec![MockProvider::new(
            "stable",
            MockBehavior::Succeed("done".to_string()),
        )])
        .await;
        let worker = Worker::new("w", Archetype::Task).with_providers("stable", vec![]);
        let core = core_with(worker, registry, Arc::new(StickyProviders::new()));

        let outcome = core
            .execute(&ExecutionInput::new("task"), &mut ExecutionContext::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.output.as_deref(), Some("done"));
        assert_eq!(outcome.provider_used.as_deref(), Some("stable"));
        assert_eq!(outcome.tokens_used, 42);
        assert!(outcome.execution_time >= 0.0);
    }

    #[tokio::test]
    async fn streaming_selects_first_registered_provider() {
        let registry = registry_with(vec![MockProvider::new(
            "streamer",
            MockBehavior::StreamChunks(vec!["a".to_string(), "b".to_string()]),
        )])
        .await;
        let worker = Worker::new("w", Archetype::Task)
            .with_providers("missing", vec!["streamer".to_string()]);
        let core = core_with(worker, registry, Arc::new(StickyProviders::new()));

        let handle = core
            .execute_streaming(&ExecutionInput::new("task"), &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(handle.provider, "streamer");
    }

    struct RecordingTracker {
        records: Mutex<Vec<UsageRecord>>,
    }

    #[async_trait]
    impl UsageTracker for RecordingTracker {
        async fn track(&self, record: UsageRecord) -> Result<(), UsageError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    #[tokio::test]
    async fn usage_tracked_when_requester_present() {
        let registry = registry_with(vec![MockProvider::new(
            "stable",
            MockBehavior::Succeed("done".to_string()),
        )])
        .await;
        let tracker = Arc::new(RecordingTracker {
            records: Mutex::new(Vec::new()),
        });
        let worker = Worker::new("w", Archetype::Task).with_providers("stable", vec![]);
        let core = ExecutionCore::new(
            worker,
            registry,
            Arc::new(StickyProviders::new()),
            tracker.clone(),
            EngineConfig::default(),
        );

        let mut ctx = ExecutionContext::new().with_requester("user-1");
        let outcome = core.execute(&ExecutionInput::new("task"), &mut ctx).await;
        assert!(outcome.success);

        // Tracking is fire-and-forget; give the spawned task a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let records = tracker.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].requester, "user-1");
        assert_eq!(records[0].provider, "stable");
    }
}
