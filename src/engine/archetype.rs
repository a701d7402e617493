//! Prompt/response strategies.
//!
//! Two archetypes, dispatched by `match` rather than trait objects: the
//! task archetype builds a structured one-shot prompt and post-processes
//! structured output; the conversational archetype replays recent history
//! and maintains it after each exchange.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capability::Capability;
use crate::engine::context::{ExecutionContext, ExecutionInput, Turn};

/// Matches the first fenced code block, optionally tagged `json`.
static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("static fence regex"));

/// The prompt-construction/response-processing strategy a worker follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Task,
    Conversational,
}

impl Archetype {
    /// The string tag stored in the DB archetype column.
    pub fn tag(&self) -> &'static str {
        match self {
            Archetype::Task => "task",
            Archetype::Conversational => "conversational",
        }
    }

    /// Parse an archetype from its DB representation.
    pub fn from_tag(s: &str) -> Self {
        match s {
            "conversational" => Archetype::Conversational,
            _ => Archetype::Task,
        }
    }

    /// Capability every worker of this archetype carries.
    pub fn implied_capability(&self) -> Capability {
        match self {
            Archetype::Task => Capability::TaskExecution,
            Archetype::Conversational => Capability::Conversation,
        }
    }

    /// Sampling temperature used when the worker does not override it.
    /// Task workers run cool, conversational workers warmer.
    pub fn default_temperature(&self) -> f32 {
        match self {
            Archetype::Task => 0.2,
            Archetype::Conversational => 0.7,
        }
    }

    /// System prompt used when the worker does not carry its own.
    pub fn default_system_prompt(&self) -> &'static str {
        match self {
            Archetype::Task => {
                "You are a task execution agent. Complete the task precisely \
                 and report the result."
            }
            Archetype::Conversational => "You are a helpful conversational assistant.",
        }
    }

    /// Render the prompt for one call.
    ///
    /// `history_window` only applies to the conversational archetype: at
    /// most that many prior turns are replayed, role-labelled, before the
    /// current one.
    pub fn prepare_prompt(
        &self,
        input: &ExecutionInput,
        ctx: &ExecutionContext,
        history_window: usize,
    ) -> String {
        match self {
            Archetype::Task => {
                let mut prompt = format!("Task: {}", input.task);

                if !ctx.metadata.is_empty() {
                    prompt.push_str("\n\nContext:");
                    for (key, value) in &ctx.metadata {
                        prompt.push_str(&format!("\n- {key}: {value}"));
                    }
                }

                if !input.requirements.is_empty() {
                    prompt.push_str("\n\nRequirements:");
                    for requirement in &input.requirements {
                        prompt.push_str(&format!("\n- {requirement}"));
                    }
                }

                if let Some(ref format) = input.output_format {
                    if format == "json" {
                        prompt.push_str(
                            "\n\nReturn the result as JSON inside a fenced code block.",
                        );
                    } else {
                        prompt.push_str(&format!("\n\nRespond in {format} format."));
                    }
                }

                prompt
            }
            Archetype::Conversational => {
                let mut prompt = String::new();
                let start = ctx.history.len().saturating_sub(history_window);
                for turn in &ctx.history[start..] {
                    prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
                }
                prompt.push_str(&format!("user: {}", input.task));
                prompt
            }
        }
    }

    /// Post-process a completion.
    ///
    /// Task: when `output_format == "json"`, extract and validate fenced
    /// JSON; a malformed payload is logged and the raw text returned —
    /// never a failure. Conversational: append both turns to the history
    /// and trim it to twice the window, oldest dropped.
    pub fn process_response(
        &self,
        input: &ExecutionInput,
        ctx: &mut ExecutionContext,
        content: &str,
        history_window: usize,
    ) -> String {
        match self {
            Archetype::Task => {
                if input.output_format.as_deref() != Some("json") {
                    return content.to_string();
                }
                match extract_json(content) {
                    Some(json) => json,
                    None => {
                        warn!("Expected fenced JSON in response, returning raw text");
                        content.to_string()
                    }
                }
            }
            Archetype::Conversational => {
                ctx.history.push(Turn::user(&input.task));
                ctx.history.push(Turn::assistant(content));

                let cap = history_window * 2;
                if ctx.history.len() > cap {
                    let excess = ctx.history.len() - cap;
                    ctx.history.drain(..excess);
                }

                content.to_string()
            }
        }
    }
}

impl std::fmt::Display for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Pull parseable JSON out of a completion.
///
/// Prefers the first fenced block; falls back to treating the whole
/// response as JSON. Returns the compact re-serialization so downstream
/// consumers get canonical text.
fn extract_json(content: &str) -> Option<String> {
    let candidate = FENCED_BLOCK
        .captures(content)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| content.trim().to_string());

    let value: serde_json::Value = serde_json::from_str(&candidate).ok()?;
    serde_json::to_string(&value).ok()
}
