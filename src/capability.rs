//! Capability tags and keyword-based inference.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A class of task a worker may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CodeGeneration,
    CodeReview,
    Testing,
    Devops,
    DataAnalysis,
    Documentation,
    Research,
    Conversation,
    TaskExecution,
}

impl Capability {
    /// The string tag stored in the DB capabilities column.
    pub fn tag(&self) -> &'static str {
        match self {
            Capability::CodeGeneration => "code_generation",
            Capability::CodeReview => "code_review",
            Capability::Testing => "testing",
            Capability::Devops => "devops",
            Capability::DataAnalysis => "data_analysis",
            Capability::Documentation => "documentation",
            Capability::Research => "research",
            Capability::Conversation => "conversation",
            Capability::TaskExecution => "task_execution",
        }
    }

    /// Parse a capability from its DB representation.
    pub fn from_tag(s: &str) -> Option<Self> {
        match s {
            "code_generation" => Some(Capability::CodeGeneration),
            "code_review" => Some(Capability::CodeReview),
            "testing" => Some(Capability::Testing),
            "devops" => Some(Capability::Devops),
            "data_analysis" => Some(Capability::DataAnalysis),
            "documentation" => Some(Capability::Documentation),
            "research" => Some(Capability::Research),
            "conversation" => Some(Capability::Conversation),
            "task_execution" => Some(Capability::TaskExecution),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Keyword table for capability inference. Checked in order; every matching
/// entry contributes its capability, so a task mentioning both "implement"
/// and "test" requires both.
const KEYWORDS: &[(&str, Capability)] = &[
    ("code", Capability::CodeGeneration),
    ("implement", Capability::CodeGeneration),
    ("function", Capability::CodeGeneration),
    ("refactor", Capability::CodeGeneration),
    ("bug", Capability::CodeGeneration),
    ("review", Capability::CodeReview),
    ("audit", Capability::CodeReview),
    ("test", Capability::Testing),
    ("qa", Capability::Testing),
    ("deploy", Capability::Devops),
    ("pipeline", Capability::Devops),
    ("docker", Capability::Devops),
    ("kubernetes", Capability::Devops),
    ("infrastructure", Capability::Devops),
    ("analyze", Capability::DataAnalysis),
    ("analysis", Capability::DataAnalysis),
    ("data", Capability::DataAnalysis),
    ("metrics", Capability::DataAnalysis),
    ("document", Capability::Documentation),
    ("readme", Capability::Documentation),
    ("docs", Capability::Documentation),
    ("research", Capability::Research),
    ("investigate", Capability::Research),
    ("chat", Capability::Conversation),
    ("conversation", Capability::Conversation),
    ("discuss", Capability::Conversation),
];

/// Infer required capabilities from free-form task text.
///
/// Case-insensitive substring matching against a fixed keyword table;
/// deterministic for a given input. Falls back to `TaskExecution` when
/// nothing matches.
pub fn infer_capabilities(text: &str) -> BTreeSet<Capability> {
    let lowered = text.to_lowercase();
    let mut found: BTreeSet<Capability> = KEYWORDS
        .iter()
        .filter(|(kw, _)| lowered.contains(kw))
        .map(|(_, cap)| *cap)
        .collect();

    if found.is_empty() {
        found.insert(Capability::TaskExecution);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_code_generation() {
        let caps = infer_capabilities("Implement a parser for the config file");
        assert!(caps.contains(&Capability::CodeGeneration));
    }

    #[test]
    fn infer_multiple() {
        let caps = infer_capabilities("Write code and then test the deploy pipeline");
        assert!(caps.contains(&Capability::CodeGeneration));
        assert!(caps.contains(&Capability::Testing));
        assert!(caps.contains(&Capability::Devops));
    }

    #[test]
    fn infer_is_case_insensitive() {
        assert_eq!(
            infer_capabilities("REVIEW this PR"),
            infer_capabilities("review this pr")
        );
    }

    #[test]
    fn infer_default() {
        let caps = infer_capabilities("hello there");
        assert_eq!(caps.len(), 1);
        assert!(caps.contains(&Capability::TaskExecution));
    }

    #[test]
    fn tag_roundtrip() {
        for cap in [
            Capability::CodeGeneration,
            Capability::Conversation,
            Capability::TaskExecution,
        ] {
            assert_eq!(Capability::from_tag(cap.tag()), Some(cap));
        }
        assert_eq!(Capability::from_tag("nonsense"), None);
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&Capability::CodeGeneration).unwrap();
        assert_eq!(json, "\"code_generation\"");
    }
}
