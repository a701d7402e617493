//! Worker descriptors and rolling metrics.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::Capability;
use crate::engine::Archetype;

/// Availability of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Inactive,
    Maintenance,
}

impl WorkerStatus {
    /// The string tag stored in the DB status column.
    pub fn tag(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Inactive => "inactive",
            WorkerStatus::Maintenance => "maintenance",
        }
    }

    /// Parse a status from its DB representation.
    pub fn from_tag(s: &str) -> Self {
        match s {
            "active" => WorkerStatus::Active,
            "maintenance" => WorkerStatus::Maintenance,
            _ => WorkerStatus::Inactive,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Rolling execution metrics for a worker.
///
/// Mutated only by the lifecycle manager, only on terminal transitions.
/// The values are advisory (used for ranking, not correctness) and are
/// recomputed exactly from the worker's full execution history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// Terminal executions counted against this worker.
    pub total_invocations: u64,
    /// Completed / total, as a percentage (0–100).
    pub success_rate: f64,
    /// Mean execution time of completed executions, in seconds.
    pub avg_response_time: f64,
    /// Tokens consumed across all executions.
    pub total_tokens: u64,
    /// Cost accrued across all executions.
    pub total_cost: Decimal,
}

/// An agent descriptor: capabilities, provider chain, and model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    /// Prompt/response strategy this worker follows.
    pub archetype: Archetype,
    pub capabilities: BTreeSet<Capability>,
    /// Provider tried first on every call.
    pub preferred_provider: String,
    /// Providers tried in order after the preferred one fails.
    pub fallback_providers: Vec<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ranking bias, 0–100. 50 is neutral.
    pub priority: u8,
    pub system_prompt: Option<String>,
    pub status: WorkerStatus,
    pub metrics: WorkerMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    /// Create an active worker with archetype defaults.
    ///
    /// The archetype's implied capability is always present in the
    /// capability set, whatever else is configured later.
    pub fn new(name: impl Into<String>, archetype: Archetype) -> Self {
        let now = Utc::now();
        let mut capabilities = BTreeSet::new();
        capabilities.insert(archetype.implied_capability());
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            archetype,
            capabilities,
            preferred_provider: "degraded".to_string(),
            fallback_providers: Vec::new(),
            model: "claude-sonnet-4-20250514".to_string(),
            temperature: archetype.default_temperature(),
            max_tokens: 4096,
            priority: 50,
            system_prompt: None,
            status: WorkerStatus::Active,
            metrics: WorkerMetrics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add capabilities on top of the archetype's implied one.
    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(caps);
        self
    }

    /// Set the provider chain: preferred first, then ordered fallbacks.
    pub fn with_providers(
        mut self,
        preferred: impl Into<String>,
        fallbacks: Vec<String>,
    ) -> Self {
        self.preferred_provider = preferred.into();
        self.fallback_providers = fallbacks;
        self
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the ranking priority (clamped to 100).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Whether this worker can serve all of the required capabilities.
    pub fn covers(&self, required: &BTreeSet<Capability>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Whether this worker may be dispatched to at all.
    pub fn is_available(&self) -> bool {
        self.status == WorkerStatus::Active
    }
}
