//! Custom error types for the tutor core.

use thiserror::Error;

/// Unified error type propagated through every component of the tutor.
#[derive(Debug, Error)]
pub enum TutorError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed pattern JSON. Fatal at startup: names the offending
    /// pattern id and field.
    #[error("Pattern load error in '{pattern_id}': {field}: {reason}")]
    PatternLoad {
        pattern_id: String,
        field: String,
        reason: String,
    },

    /// Retrieval source missing or unreadable. Non-fatal per turn.
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Provider failure after retries. Surfaced as an `error` event.
    #[error("LLM provider unavailable: {0}")]
    LlmUnavailable(String),

    /// Tool call exceeded its deadline. Returned to the model as a
    /// tool-result string, never bubbled to the user.
    #[error("Tool timed out: {0}")]
    ToolTimeout(String),

    #[error("Tool failed: {0}")]
    ToolFailure(String),

    /// A diagnosis/fix template referenced a variable the command regex
    /// did not capture.
    #[error("Template for pattern '{pattern_id}' references unknown variable '{variable}'")]
    MissingVariable {
        pattern_id: String,
        variable: String,
    },

    /// Transport gone; clean shutdown, no events.
    #[error("Turn cancelled by transport")]
    Cancelled,

    #[error("Simulator error: {0}")]
    Simulator(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Lab error: {0}")]
    Lab(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TutorError {
    /// Short machine-readable kind used in `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            TutorError::Config(_) => "config",
            TutorError::PatternLoad { .. } => "pattern_load",
            TutorError::IndexUnavailable(_) => "index_unavailable",
            TutorError::Embedding(_) => "embedding",
            TutorError::LlmUnavailable(_) => "llm_unavailable",
            TutorError::ToolTimeout(_) => "tool_timeout",
            TutorError::ToolFailure(_) => "tool_failure",
            TutorError::MissingVariable { .. } => "missing_variable",
            TutorError::Cancelled => "cancelled",
            TutorError::Simulator(_) => "simulator",
            TutorError::Session(_) => "session",
            TutorError::Lab(_) => "lab",
            TutorError::Http(_) => "http",
            TutorError::Json(_) => "json",
            TutorError::Io(_) => "io",
        }
    }
}
