//! Configuration loading from environment variables via dotenvy.
//! No values are ever hardcoded outside this module.

use crate::error::TutorError;

/// LLM deployment mode. Both endpoints speak the same OpenAI-compatible
/// chat-completions protocol; selection is configuration only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMode {
    /// Externally hosted provider endpoint.
    Hosted,
    /// Self-hosted deployment (same wire protocol).
    SelfHosted,
}

/// Runtime configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment mode — sourced from `LLM_MODE` (`hosted` | `self_hosted`)
    pub llm_mode: LlmMode,
    /// Chat-completions base URL for the active mode
    pub llm_endpoint_url: String,
    /// API key — sourced from `LLM_API_KEY`
    pub llm_api_key: String,
    /// Model identifier — sourced from `LLM_MODEL`
    pub llm_model_name: String,
    /// Per-request timeout in seconds — sourced from `LLM_TIMEOUT_S`
    pub llm_timeout_s: u64,

    /// Embeddings endpoint base URL — sourced from `EMBEDDINGS_URL`
    pub embeddings_endpoint_url: String,
    /// Embeddings model identifier — sourced from `EMBEDDINGS_MODEL`
    pub embeddings_model_name: String,
    /// Embedding dimensionality — sourced from `EMBEDDINGS_DIM`
    pub embeddings_dim: usize,

    /// Packed vector file path — sourced from `RETRIEVER_INDEX_PATH`
    pub retriever_index_path: String,
    /// Aligned chunk metadata path — sourced from `RETRIEVER_METADATA_PATH`
    pub retriever_metadata_path: String,
    /// Result count for the teaching path — `RETRIEVER_K_TEACHING`
    pub retriever_k_teaching: usize,
    /// Candidate pool for the troubleshooting path — `RETRIEVER_K_TROUBLESHOOTING`
    pub retriever_k_troubleshooting: usize,

    /// Simulator base URL — sourced from `SIMULATOR_BASE_URL`
    pub simulator_base_url: String,
    /// Simulator call timeout in seconds — sourced from `SIMULATOR_TIMEOUT_S`
    pub simulator_timeout_s: u64,

    /// Directory of pattern JSON files — sourced from `PATTERNS_DIR`
    pub patterns_dir: String,
    /// Cisco vocabulary JSON path — sourced from `CISCO_VOCABULARY_PATH`
    pub cisco_vocabulary_path: String,
    /// Directory of lab JSON files — sourced from `LABS_DIR`
    pub labs_dir: String,

    /// Tool-loop iteration bound — sourced from `MAX_TOOL_ITERATIONS`
    pub max_tool_iterations: usize,
    /// Messages of conversation history assembled into prompts —
    /// sourced from `CONVERSATION_HISTORY_MESSAGES`
    pub conversation_history_messages: usize,
    /// CLI entries consumed per turn — sourced from `CLI_HISTORY_ENTRIES`
    pub cli_history_entries: usize,
}

/// Load configuration purely from already-set environment variables.
///
/// Does **not** call `dotenvy::dotenv()` — useful in tests that need to
/// control the env precisely via [`std::env::set_var`] / [`std::env::remove_var`].
///
/// # Errors
/// Returns [`TutorError::Config`] if required variables are missing or invalid.
pub fn load_config_from_env() -> Result<Config, TutorError> {
    let llm_mode = match std::env::var("LLM_MODE")
        .unwrap_or_else(|_| "hosted".to_string())
        .to_lowercase()
        .as_str()
    {
        "hosted" => LlmMode::Hosted,
        "self_hosted" | "self-hosted" => LlmMode::SelfHosted,
        other => {
            return Err(TutorError::Config(format!(
                "LLM_MODE must be 'hosted' or 'self_hosted', got '{other}'"
            )))
        }
    };

    let llm_endpoint_url = match llm_mode {
        LlmMode::Hosted => std::env::var("LLM_HOSTED_URL")
            .unwrap_or_else(|_| "https://integrate.api.nvidia.com/v1".to_string()),
        LlmMode::SelfHosted => std::env::var("LLM_SELF_HOSTED_URL")
            .unwrap_or_else(|_| "http://llm-nim.nim.svc.cluster.local:8000/v1".to_string()),
    };

    if !llm_endpoint_url.starts_with("http://") && !llm_endpoint_url.starts_with("https://") {
        return Err(TutorError::Config(
            "LLM endpoint URL must start with http:// or https://".to_string(),
        ));
    }

    let llm_api_key = std::env::var("LLM_API_KEY")
        .map_err(|_| TutorError::Config("LLM_API_KEY not set".to_string()))?;

    if llm_api_key.is_empty() {
        return Err(TutorError::Config("LLM_API_KEY is empty".to_string()));
    }

    let llm_model_name = std::env::var("LLM_MODEL")
        .unwrap_or_else(|_| "nvidia/llama-3.1-nemotron-nano-8b-v1".to_string());

    let embeddings_endpoint_url = std::env::var("EMBEDDINGS_URL")
        .unwrap_or_else(|_| "https://integrate.api.nvidia.com/v1".to_string());

    let embeddings_model_name =
        std::env::var("EMBEDDINGS_MODEL").unwrap_or_else(|_| "nvidia/nv-embedqa-e5-v5".to_string());

    Ok(Config {
        llm_mode,
        llm_endpoint_url,
        llm_api_key,
        llm_model_name,
        llm_timeout_s: env_parse("LLM_TIMEOUT_S", 30),
        embeddings_endpoint_url,
        embeddings_model_name,
        embeddings_dim: env_parse("EMBEDDINGS_DIM", EMBEDDING_DIM),
        retriever_index_path: std::env::var("RETRIEVER_INDEX_PATH")
            .unwrap_or_else(|_| "data/index/labs.vec".to_string()),
        retriever_metadata_path: std::env::var("RETRIEVER_METADATA_PATH")
            .unwrap_or_else(|_| "data/index/labs_metadata.json".to_string()),
        retriever_k_teaching: env_parse("RETRIEVER_K_TEACHING", K_TEACHING),
        retriever_k_troubleshooting: env_parse("RETRIEVER_K_TROUBLESHOOTING", K_TROUBLESHOOTING),
        simulator_base_url: std::env::var("SIMULATOR_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8061".to_string()),
        simulator_timeout_s: env_parse("SIMULATOR_TIMEOUT_S", 10),
        patterns_dir: std::env::var("PATTERNS_DIR").unwrap_or_else(|_| "data/patterns".to_string()),
        cisco_vocabulary_path: std::env::var("CISCO_VOCABULARY_PATH")
            .unwrap_or_else(|_| "data/cisco_vocabulary.json".to_string()),
        labs_dir: std::env::var("LABS_DIR").unwrap_or_else(|_| "data/labs".to_string()),
        max_tool_iterations: env_parse("MAX_TOOL_ITERATIONS", MAX_TOOL_ITERATIONS),
        conversation_history_messages: env_parse(
            "CONVERSATION_HISTORY_MESSAGES",
            CONVERSATION_HISTORY_MESSAGES,
        ),
        cli_history_entries: env_parse("CLI_HISTORY_ENTRIES", CLI_HISTORY_ENTRIES),
    })
}

/// Load configuration from the environment (`.env` + system env vars).
///
/// Loads `.env` via `dotenvy` first (ignoring errors if the file is absent),
/// then delegates to [`load_config_from_env`].
pub fn load_config() -> Result<Config, TutorError> {
    // Load .env if present; ignore the error — variables may already be set externally.
    let _ = dotenvy::dotenv();
    load_config_from_env()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// ── Pipeline constants ─────────────────────────────────────────────────────

/// Embedding dimensionality of the pre-built index.
pub const EMBEDDING_DIM: usize = 1024;

/// Results returned on the teaching path.
pub const K_TEACHING: usize = 3;

/// Candidate pool searched on the troubleshooting path (before
/// doc-class prioritization).
pub const K_TROUBLESHOOTING: usize = 12;

/// Final retrieved-document cap after prioritization.
pub const RETRIEVED_DOCS_CAP: usize = 5;

/// Maximum non-streaming completions in the troubleshooting tool loop.
pub const MAX_TOOL_ITERATIONS: usize = 3;

/// Conversation-history messages assembled into prompts.
pub const CONVERSATION_HISTORY_MESSAGES: usize = 4;

/// CLI-history entries consumed per turn.
pub const CLI_HISTORY_ENTRIES: usize = 5;

/// Soft end-to-end deadline for the teaching path.
pub const TEACHING_DEADLINE_S: u64 = 8;

/// Soft end-to-end deadline for the troubleshooting path.
pub const TROUBLESHOOTING_DEADLINE_S: u64 = 20;

/// Non-streaming LLM retry count and backoff baseline.
pub const LLM_MAX_RETRIES: u32 = 2;
pub const LLM_BACKOFF_BASE_MS: u64 = 250;
pub const LLM_BACKOFF_JITTER_MS: u64 = 50;

/// Minimum fuzzy similarity for a vocabulary suggestion.
pub const FUZZY_MIN_SIMILARITY: f64 = 0.7;

/// Maximum edit distance for a vocabulary suggestion (whichever of the
/// two thresholds is looser admits the match).
pub const FUZZY_MAX_DISTANCE: usize = 2;

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing_rejects_unknown() {
        std::env::set_var("LLM_MODE", "serverless");
        std::env::set_var("LLM_API_KEY", "k");
        let err = load_config_from_env().unwrap_err();
        assert!(matches!(err, TutorError::Config(_)));
        std::env::remove_var("LLM_MODE");
        std::env::remove_var("LLM_API_KEY");
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("MAX_TOOL_ITERATIONS_TEST", "not-a-number");
        let v: usize = env_parse("MAX_TOOL_ITERATIONS_TEST", 3);
        assert_eq!(v, 3);
        std::env::remove_var("MAX_TOOL_ITERATIONS_TEST");
    }
}
