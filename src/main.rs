use std::sync::Arc;

use agent_dispatch::capability::Capability;
use agent_dispatch::dispatch::Dispatcher;
use agent_dispatch::engine::{Archetype, ExecutionContext, ExecutionInput};
use agent_dispatch::lifecycle::LifecycleManager;
use agent_dispatch::llm::{AnthropicProvider, OpenAiProvider, ProviderRegistry};
use agent_dispatch::store::{LibSqlBackend, MemoryStore, Store};
use agent_dispatch::usage::StoreUsageTracker;
use agent_dispatch::worker::Worker;
use futures::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1).peekable();
    let streaming = args.peek().map(|a| a == "--stream").unwrap_or(false);
    if streaming {
        args.next();
    }
    let task: String = args.collect::<Vec<_>>().join(" ");
    if task.is_empty() {
        eprintln!("Usage: agent-dispatch [--stream] <task text>");
        std::process::exit(2);
    }

    // ── Providers ────────────────────────────────────────────────────
    let registry = Arc::new(ProviderRegistry::new());
    let mut chain: Vec<String> = Vec::new();

    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        registry
            .register(Arc::new(AnthropicProvider::new(secrecy::SecretString::from(
                key,
            ))))
            .await;
        chain.push("anthropic".to_string());
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        registry
            .register(Arc::new(OpenAiProvider::new(secrecy::SecretString::from(
                key,
            ))))
            .await;
        chain.push("openai".to_string());
    }

    let model = std::env::var("AGENT_DISPATCH_MODEL")
        .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

    // ── Store ────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = match std::env::var("AGENT_DISPATCH_DB_PATH") {
        Ok(path) => Arc::new(LibSqlBackend::new_local(std::path::Path::new(&path)).await?),
        Err(_) => Arc::new(MemoryStore::new()),
    };

    eprintln!("agent-dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", model);
    eprintln!(
        "   Providers: {}",
        registry.list_available().await.join(", ")
    );

    // ── Workers ──────────────────────────────────────────────────────
    let preferred = chain
        .first()
        .cloned()
        .unwrap_or_else(|| "degraded".to_string());
    let fallbacks: Vec<String> = chain.iter().skip(1).cloned().collect();

    let task_worker = Worker::new("task-runner", Archetype::Task)
        .with_capabilities([
            Capability::CodeGeneration,
            Capability::Testing,
            Capability::Documentation,
            Capability::Research,
            Capability::DataAnalysis,
        ])
        .with_providers(preferred.clone(), fallbacks.clone())
        .with_model(model.clone());
    let chat_worker = Worker::new("companion", Archetype::Conversational)
        .with_providers(preferred, fallbacks)
        .with_model(model);
    store.insert_worker(&task_worker).await?;
    store.insert_worker(&chat_worker).await?;

    // ── Dispatch and execute ─────────────────────────────────────────
    let dispatcher = Dispatcher::new(store.clone());
    let manager = Arc::new(
        LifecycleManager::new(store.clone(), registry)
            .with_usage_tracker(Arc::new(StoreUsageTracker::new(store.clone()))),
    );

    let worker = dispatcher.select_for_task(&task, None, None).await?;
    eprintln!("   Worker: {}\n", worker.name);

    let requester = std::env::var("USER").ok();
    let input = ExecutionInput::new(task);
    let mut ctx = ExecutionContext::new();
    if let Some(ref requester) = requester {
        ctx = ctx.with_requester(requester.clone());
    }

    if streaming {
        let mut stream = manager
            .execute_streaming(&worker, input, requester, &ctx)
            .await?;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => print!("{text}"),
                Err(e) => {
                    eprintln!("\nstream error: {e}");
                    std::process::exit(1);
                }
            }
        }
        println!();
    } else {
        let outcome = manager
            .execute_agent(&worker, input, requester, &mut ctx)
            .await;
        if outcome.success {
            println!("{}", outcome.output.unwrap_or_default());
            eprintln!(
                "\n[{} | {} tokens | ${} | {:.2}s]",
                outcome.provider_used.unwrap_or_default(),
                outcome.tokens_used,
                outcome.cost,
                outcome.execution_time
            );
        } else {
            eprintln!("execution failed: {}", outcome.error.unwrap_or_default());
            std::process::exit(1);
        }
    }

    Ok(())
}
