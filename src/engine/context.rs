//! Execution inputs and per-call context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work handed to a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionInput {
    /// Free-form task description or conversational turn.
    pub task: String,
    /// Bulleted into the prompt by the task archetype.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// When `"json"`, the task archetype extracts fenced JSON from the
    /// response.
    #[serde(default)]
    pub output_format: Option<String>,
}

impl ExecutionInput {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            requirements: Vec::new(),
            output_format: None,
        }
    }

    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Caller-scoped context threaded through an execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Who asked. Drives best-effort usage tracking when present.
    pub requester: Option<String>,
    pub session_id: Option<Uuid>,
    /// Ordered conversation history, oldest first.
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}
