//! Shared types and data structures for the tutor core.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Conversation ──────────────────────────────────────────────────────────

/// Message role in the OpenAI-compatible wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation message. Doubles as the wire shape sent to the
/// provider, so optional tool fields serialize only when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Tool-result message answering the given call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

// ── CLI history ───────────────────────────────────────────────────────────

/// One `(command, output)` pair observed from the simulator terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliEntry {
    pub command: String,
    pub output: String,
    /// ISO-8601 timestamp supplied by the transport.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub device_id: String,
}

// ── Lab context ───────────────────────────────────────────────────────────

/// Structured exercise metadata, set at session start and read-only per turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabContext {
    pub lab_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub topology: Option<String>,
}

/// Student skill level. Affects prompt tone only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryLevel {
    Novice,
    Intermediate,
    Advanced,
}

impl MasteryLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "novice" => Some(Self::Novice),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Novice => "novice",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

// ── Intent ────────────────────────────────────────────────────────────────

/// Classified turn intent. `Ambiguous` runs the teaching path downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Teaching,
    Troubleshooting,
    Ambiguous,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teaching => "teaching",
            Self::Troubleshooting => "troubleshooting",
            Self::Ambiguous => "ambiguous",
        }
    }
}

// ── Retrieval ─────────────────────────────────────────────────────────────

/// Document class driving troubleshooting prioritization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocClass {
    ErrorPatterns,
    CommandReference,
    LabSpecific,
}

impl DocClass {
    /// Ordering used for the final document sort (lower sorts first).
    pub fn priority(&self) -> u8 {
        match self {
            Self::ErrorPatterns => 0,
            Self::CommandReference => 1,
            Self::LabSpecific => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorPatterns => "error_patterns",
            Self::CommandReference => "command_reference",
            Self::LabSpecific => "lab_specific",
        }
    }
}

/// One retrieved document chunk with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub content: String,
    pub score: f32,
    pub doc_class: DocClass,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// ── Detection ─────────────────────────────────────────────────────────────

/// Fuzzy vocabulary suggestion attached to a diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    pub typed_word: String,
    pub suggested_word: String,
    pub similarity: f64,
}

/// Structured, templated explanation emitted by the error detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub error_type: String,
    pub pattern_id: String,
    pub command: String,
    pub diagnosis: String,
    pub fix: String,
    /// Extracted regex variables, keyed by name.
    pub variables: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzzy_match: Option<FuzzyMatch>,
}

// ── Tool calling ──────────────────────────────────────────────────────────

/// Tool declaration in the OpenAI function-calling wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the parameters.
    pub parameters: serde_json::Value,
}

/// Tool call returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed arguments object.
    pub arguments: serde_json::Value,
}

// ── Turn state ────────────────────────────────────────────────────────────

/// The single structured record flowing through every node of the graph.
///
/// Constructed per turn from session state + incoming request; mutated by
/// each node; discarded after the final event except for the conversation
/// history, which persists into the session.
#[derive(Debug, Clone)]
pub struct TurnState {
    pub student_question: String,
    pub conversation_history: Vec<ChatMessage>,
    /// The consumed CLI window (already trimmed to the last N entries).
    pub cli_history: Vec<CliEntry>,
    pub lab_context: LabContext,
    pub mastery_level: MasteryLevel,

    pub intent: Intent,
    pub retrieval_query: String,
    pub retrieved_docs: Vec<RetrievedDoc>,
    pub retrieval_unavailable: bool,
    /// Index-aligned with `cli_history`; `None` = no detection for that
    /// command (the slot is absent, never a null diagnosis).
    pub cli_diagnoses: Vec<Option<Diagnosis>>,
    pub feedback_message: String,
    pub final_message: String,
    /// Ids of documents actually inlined into the prompt.
    pub doc_ids_used: Vec<String>,
}

impl TurnState {
    pub fn new(
        question: impl Into<String>,
        conversation_history: Vec<ChatMessage>,
        cli_history: Vec<CliEntry>,
        lab_context: LabContext,
        mastery_level: MasteryLevel,
    ) -> Self {
        Self {
            student_question: question.into(),
            conversation_history,
            cli_history,
            lab_context,
            mastery_level,
            intent: Intent::Teaching,
            retrieval_query: String::new(),
            retrieved_docs: Vec::new(),
            retrieval_unavailable: false,
            cli_diagnoses: Vec::new(),
            feedback_message: String::new(),
            final_message: String::new(),
            doc_ids_used: Vec::new(),
        }
    }

    /// `true` when any consumed CLI entry produced a diagnosis.
    pub fn has_diagnosis(&self) -> bool {
        self.cli_diagnoses.iter().any(|d| d.is_some())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
