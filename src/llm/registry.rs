//! Provider registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::llm::CompletionProvider;
use crate::llm::degraded::DegradedProvider;

/// Maps provider names to adapters.
///
/// The degraded provider is installed at construction, so a registry is
/// never empty and every fallback chain has a reachable last resort.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn CompletionProvider>>>,
    degraded: String,
}

impl ProviderRegistry {
    /// Create a registry containing only the degraded provider.
    pub fn new() -> Self {
        let degraded = DegradedProvider::new();
        let degraded_name = degraded.name().to_string();
        let mut providers: HashMap<String, Arc<dyn CompletionProvider>> = HashMap::new();
        providers.insert(degraded_name.clone(), Arc::new(degraded));
        Self {
            providers: RwLock::new(providers),
            degraded: degraded_name,
        }
    }

    /// Register a provider under its own name.
    pub async fn register(&self, provider: Arc<dyn CompletionProvider>) {
        let name = provider.name().to_string();
        info!(provider = %name, "Provider registered");
        self.providers.write().await.insert(name, provider);
    }

    /// Look up a provider by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn CompletionProvider>> {
        self.providers.read().await.get(name).cloned()
    }

    /// Names of every registered provider, sorted.
    pub async fn list_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Name the degraded provider is registered under.
    pub fn degraded_name(&self) -> &str {
        &self.degraded
    }

    /// True when the degraded provider is the only one registered.
    pub async fn is_degraded_only(&self) -> bool {
        let providers = self.providers.read().await;
        providers.len() == 1 && providers.contains_key(&self.degraded)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
