//! Tests for [`netlab_tutor::config`]
//!
//! NOTE: env-var tests mutate process state, so they run under a shared
//! lock to stay deterministic with the parallel test runner.

use std::sync::Mutex;

use netlab_tutor::config::{load_config_from_env, LlmMode};
use netlab_tutor::error::TutorError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

// ── Helper: env guard ─────────────────────────────────────────────────────

struct EnvGuard {
    key: &'static str,
    original: Option<String>,
}

impl EnvGuard {
    fn set(key: &'static str, value: &str) -> Self {
        let original = std::env::var(key).ok();
        std::env::set_var(key, value);
        Self { key, original }
    }

    fn remove(key: &'static str) -> Self {
        let original = std::env::var(key).ok();
        std::env::remove_var(key);
        Self { key, original }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.original {
            Some(v) => std::env::set_var(self.key, v),
            None => std::env::remove_var(self.key),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[test]
fn missing_api_key_is_a_config_error() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _k = EnvGuard::remove("LLM_API_KEY");
    let _m = EnvGuard::remove("LLM_MODE");

    match load_config_from_env() {
        Err(TutorError::Config(msg)) => assert!(msg.contains("LLM_API_KEY")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn defaults_apply_when_only_key_is_set() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _k = EnvGuard::set("LLM_API_KEY", "test-key");
    let _m = EnvGuard::remove("LLM_MODE");
    let _t = EnvGuard::remove("LLM_TIMEOUT_S");

    let config = load_config_from_env().unwrap();
    assert_eq!(config.llm_mode, LlmMode::Hosted);
    assert_eq!(config.llm_timeout_s, 30);
    assert_eq!(config.embeddings_dim, 1024);
    assert_eq!(config.retriever_k_teaching, 3);
    assert_eq!(config.retriever_k_troubleshooting, 12);
    assert_eq!(config.simulator_timeout_s, 10);
    assert_eq!(config.max_tool_iterations, 3);
    assert_eq!(config.conversation_history_messages, 4);
    assert_eq!(config.cli_history_entries, 5);
}

#[test]
fn self_hosted_mode_switches_endpoint() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _k = EnvGuard::set("LLM_API_KEY", "test-key");
    let _m = EnvGuard::set("LLM_MODE", "self_hosted");
    let _u = EnvGuard::set("LLM_SELF_HOSTED_URL", "http://llm.internal:8000/v1");

    let config = load_config_from_env().unwrap();
    assert_eq!(config.llm_mode, LlmMode::SelfHosted);
    assert_eq!(config.llm_endpoint_url, "http://llm.internal:8000/v1");
}

#[test]
fn invalid_mode_rejected() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _k = EnvGuard::set("LLM_API_KEY", "test-key");
    let _m = EnvGuard::set("LLM_MODE", "serverless");

    assert!(matches!(
        load_config_from_env(),
        Err(TutorError::Config(_))
    ));
}

#[test]
fn empty_api_key_rejected() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _k = EnvGuard::set("LLM_API_KEY", "");
    let _m = EnvGuard::remove("LLM_MODE");

    assert!(matches!(
        load_config_from_env(),
        Err(TutorError::Config(_))
    ));
}

#[test]
fn limits_are_overridable() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _k = EnvGuard::set("LLM_API_KEY", "test-key");
    let _m = EnvGuard::remove("LLM_MODE");
    let _i = EnvGuard::set("MAX_TOOL_ITERATIONS", "5");
    let _c = EnvGuard::set("CLI_HISTORY_ENTRIES", "8");

    let config = load_config_from_env().unwrap();
    assert_eq!(config.max_tool_iterations, 5);
    assert_eq!(config.cli_history_entries, 8);
}
