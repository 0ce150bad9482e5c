//! LLM gateway: OpenAI-compatible chat completions over HTTP.
//!
//! Two operations, both against the same wire protocol regardless of
//! whether the endpoint is the hosted provider or a self-hosted
//! deployment (selection is configuration only):
//!
//! - [`ChatCompletion::complete`] — non-streaming; retried on 5xx and
//!   timeouts with exponential backoff.
//! - [`ChatCompletion::stream`] — SSE streaming; parses `delta.content`
//!   text chunks and accumulates `delta.tool_calls` fragments by index.
//!   Never retried mid-stream.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::Rng;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{Config, LLM_BACKOFF_BASE_MS, LLM_BACKOFF_JITTER_MS, LLM_MAX_RETRIES};
use crate::error::TutorError;
use crate::types::{ChatMessage, Role, ToolCall, ToolSpec};

/// Sampling parameters for one call.
#[derive(Debug, Clone)]
pub struct LlmParams {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: u32,
}

impl LlmParams {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            top_p: None,
            max_tokens,
        }
    }
}

/// Provider response: text, tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct CompletionResult {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Chat-completion seam. The production implementation is
/// [`LlmGateway`]; tests substitute scripted stubs.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Non-streaming completion.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        params: &LlmParams,
    ) -> Result<CompletionResult, TutorError>;

    /// Streaming completion. `on_delta` receives every text delta; a
    /// `false` return aborts the stream (transport cancelled).
    ///
    /// Written in desugared `async_trait` form (rather than `async fn`)
    /// so `on_delta`'s `&str` parameter stays higher-ranked instead of
    /// being unified with the method's single merged elided lifetime.
    fn stream<'life0, 'a, 'b, 'c, 'd, 'async_trait>(
        &'life0 self,
        messages: &'a [ChatMessage],
        tools: &'b [ToolSpec],
        params: &'c LlmParams,
        on_delta: &'d mut (dyn FnMut(&str) -> bool + Send),
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResult, TutorError>> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        'a: 'async_trait,
        'b: 'async_trait,
        'c: 'async_trait,
        'd: 'async_trait,
        Self: 'async_trait;
}

// ── Production gateway ────────────────────────────────────────────────────

/// HTTP client for the configured chat-completions endpoint.
pub struct LlmGateway {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: String,
    model_name: String,
}

impl LlmGateway {
    pub fn new(config: &Config) -> Result<Self, TutorError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.llm_timeout_s))
            .build()
            .map_err(TutorError::Http)?;

        Ok(Self {
            client,
            endpoint_url: config.llm_endpoint_url.clone(),
            api_key: config.llm_api_key.clone(),
            model_name: config.llm_model_name.clone(),
        })
    }

    fn build_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        params: &LlmParams,
        stream: bool,
    ) -> serde_json::Value {
        let wire_messages: Vec<serde_json::Value> = messages.iter().map(wire_message).collect();

        let mut body = json!({
            "model":       self.model_name,
            "messages":    wire_messages,
            "temperature": params.temperature,
            "max_tokens":  params.max_tokens,
        });

        if let Some(top_p) = params.top_p {
            body["top_p"] = json!(top_p);
        }

        if stream {
            body["stream"] = json!(true);
        }

        if !tools.is_empty() {
            let wire_tools: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(wire_tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, TutorError> {
        let url = format!(
            "{}/chat/completions",
            self.endpoint_url.trim_end_matches('/')
        );
        self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(TutorError::Http)
    }
}

#[async_trait]
impl ChatCompletion for LlmGateway {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        params: &LlmParams,
    ) -> Result<CompletionResult, TutorError> {
        let body = self.build_body(messages, tools, params, false);

        // Idempotent call: retry 5xx/timeouts with exponential backoff.
        let mut attempt: u32 = 0;
        loop {
            let (status, detail): (u16, String) = match self.post(&body).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw: serde_json::Value =
                            response.json().await.map_err(TutorError::Http)?;
                        return parse_completion(&raw);
                    }
                    let error_body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "(unreadable body)".to_string());
                    (status.as_u16(), error_body)
                }
                Err(TutorError::Http(e)) if e.is_timeout() => (0, "request timed out".into()),
                Err(e) => return Err(e),
            };

            let retryable = status == 0 || status >= 500;
            if !retryable || attempt >= LLM_MAX_RETRIES {
                return Err(map_provider_error(status, &detail));
            }

            let backoff = backoff_with_jitter(attempt);
            warn!(status, attempt, backoff_ms = backoff.as_millis() as u64, "provider error, retrying");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    fn stream<'life0, 'a, 'b, 'c, 'd, 'async_trait>(
        &'life0 self,
        messages: &'a [ChatMessage],
        tools: &'b [ToolSpec],
        params: &'c LlmParams,
        on_delta: &'d mut (dyn FnMut(&str) -> bool + Send),
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResult, TutorError>> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        'a: 'async_trait,
        'b: 'async_trait,
        'c: 'async_trait,
        'd: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let body = self.build_body(messages, tools, params, true);

            let response = self.post(&body).await.map_err(|e| match e {
                TutorError::Http(e) if e.is_timeout() => {
                    TutorError::LlmUnavailable("stream request timed out".to_string())
                }
                other => other,
            })?;

            let status = response.status();
            if !status.is_success() {
                let error_body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "(unreadable body)".to_string());
                return Err(map_provider_error(status.as_u16(), &error_body));
            }

            let mut accumulator = StreamAccumulator::default();
            let mut line_buf = String::new();
            let mut byte_stream = response.bytes_stream();

            'outer: while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk.map_err(|e| {
                    TutorError::LlmUnavailable(format!("stream read error: {e}"))
                })?;
                line_buf.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = line_buf.find('\n') {
                    let line = line_buf[..pos].trim_end_matches('\r').to_string();
                    line_buf = line_buf[pos + 1..].to_string();

                    match accumulator.process_sse_line(&line)? {
                        SseStep::Text(delta) => {
                            if !on_delta(&delta) {
                                return Err(TutorError::Cancelled);
                            }
                        }
                        SseStep::DoneSentinel => break 'outer,
                        SseStep::Nothing => {}
                    }
                }
            }

            // Drain a trailing partial line.
            if !line_buf.trim().is_empty() {
                if let SseStep::Text(delta) = accumulator.process_sse_line(line_buf.trim())? {
                    if !on_delta(&delta) {
                        return Err(TutorError::Cancelled);
                    }
                }
            }

            Ok(accumulator.finish())
        })
    }
}

// ── Wire conversion ───────────────────────────────────────────────────────

/// Serialize one message in the chat-completions wire shape. Assistant
/// tool calls carry string-encoded arguments inside a `function` object.
fn wire_message(msg: &ChatMessage) -> serde_json::Value {
    let mut value = json!({
        "role": role_str(msg.role),
        "content": msg.content,
    });

    if let Some(id) = &msg.tool_call_id {
        value["tool_call_id"] = json!(id);
    }

    if let Some(calls) = &msg.tool_calls {
        let wire: Vec<serde_json::Value> = calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.arguments.to_string(),
                    }
                })
            })
            .collect();
        value["tool_calls"] = json!(wire);
    }

    value
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

// ── Response parsing ──────────────────────────────────────────────────────

fn parse_completion(raw: &serde_json::Value) -> Result<CompletionResult, TutorError> {
    let message = raw
        .pointer("/choices/0/message")
        .ok_or_else(|| TutorError::LlmUnavailable("response missing choices[0].message".into()))?;

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(raw_calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for (i, call) in raw_calls.iter().enumerate() {
            tool_calls.push(parse_tool_call(
                call.get("id").and_then(|v| v.as_str()),
                call.pointer("/function/name").and_then(|v| v.as_str()),
                call.pointer("/function/arguments").and_then(|v| v.as_str()),
                i,
            )?);
        }
    }

    Ok(CompletionResult { text, tool_calls })
}

fn parse_tool_call(
    id: Option<&str>,
    name: Option<&str>,
    arguments: Option<&str>,
    index: usize,
) -> Result<ToolCall, TutorError> {
    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| TutorError::LlmUnavailable("tool call missing function name".into()))?;

    let arguments: serde_json::Value = match arguments {
        None | Some("") => json!({}),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            TutorError::LlmUnavailable(format!("tool call arguments are not JSON: {e}"))
        })?,
    };

    Ok(ToolCall {
        id: id
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("call_{index}")),
        name: name.to_string(),
        arguments,
    })
}

// ── SSE accumulation ──────────────────────────────────────────────────────

enum SseStep {
    Text(String),
    DoneSentinel,
    Nothing,
}

/// Accumulates text and tool-call fragments across SSE deltas.
/// Tool-call fragments arrive keyed by `index` with the name and the
/// JSON-encoded arguments split across events.
#[derive(Default)]
struct StreamAccumulator {
    text: String,
    /// `(index, id, name, arguments_buffer)`
    pending_tool_calls: Vec<(u64, Option<String>, String, String)>,
}

impl StreamAccumulator {
    fn process_sse_line(&mut self, line: &str) -> Result<SseStep, TutorError> {
        let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
            return Ok(SseStep::Nothing); // event:, comment, or blank line
        };
        let data = data.trim();

        if data == "[DONE]" {
            return Ok(SseStep::DoneSentinel);
        }

        let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
            debug!("skipping malformed SSE chunk");
            return Ok(SseStep::Nothing);
        };

        let Some(delta) = event.pointer("/choices/0/delta") else {
            return Ok(SseStep::Nothing);
        };

        if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for call in calls {
                self.accumulate_tool_fragment(call);
            }
        }

        if let Some(content) = delta.get("content").and_then(|v| v.as_str()) {
            if !content.is_empty() {
                self.text.push_str(content);
                return Ok(SseStep::Text(content.to_string()));
            }
        }

        Ok(SseStep::Nothing)
    }

    fn accumulate_tool_fragment(&mut self, call: &serde_json::Value) {
        let index = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
        let id = call.get("id").and_then(|v| v.as_str());
        let name = call.pointer("/function/name").and_then(|v| v.as_str());
        let args = call.pointer("/function/arguments").and_then(|v| v.as_str());

        match self
            .pending_tool_calls
            .iter_mut()
            .find(|(i, _, _, _)| *i == index)
        {
            Some((_, existing_id, existing_name, existing_args)) => {
                if let Some(id) = id {
                    *existing_id = Some(id.to_string());
                }
                if let Some(name) = name {
                    existing_name.push_str(name);
                }
                if let Some(args) = args {
                    existing_args.push_str(args);
                }
            }
            None => {
                self.pending_tool_calls.push((
                    index,
                    id.map(str::to_string),
                    name.unwrap_or_default().to_string(),
                    args.unwrap_or_default().to_string(),
                ));
            }
        }
    }

    fn finish(self) -> CompletionResult {
        let tool_calls = self
            .pending_tool_calls
            .into_iter()
            .enumerate()
            .filter_map(|(i, (_, id, name, args))| {
                parse_tool_call(id.as_deref(), Some(&name), Some(&args), i).ok()
            })
            .collect();

        CompletionResult {
            text: if self.text.is_empty() {
                None
            } else {
                Some(self.text)
            },
            tool_calls,
        }
    }
}

// ── Error mapping / backoff ───────────────────────────────────────────────

const MAX_ERROR_BODY_LEN: usize = 200;

fn map_provider_error(status: u16, body: &str) -> TutorError {
    let safe_body = if body.chars().count() > MAX_ERROR_BODY_LEN {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{truncated}…[truncated]")
    } else {
        body.to_string()
    };

    match status {
        0 => TutorError::LlmUnavailable("request timed out".to_string()),
        401 => TutorError::LlmUnavailable("unauthorized: check LLM_API_KEY".to_string()),
        429 => TutorError::LlmUnavailable("rate limited by provider".to_string()),
        s if s >= 500 => TutorError::LlmUnavailable(format!("provider error {s}: {safe_body}")),
        s => TutorError::LlmUnavailable(format!("HTTP {s}: {safe_body}")),
    }
}

fn backoff_with_jitter(attempt: u32) -> std::time::Duration {
    // 250 ms baseline doubling per attempt, jittered ±50 ms.
    let base = LLM_BACKOFF_BASE_MS << attempt;
    let jitter = rand::thread_rng().gen_range(0..=LLM_BACKOFF_JITTER_MS * 2);
    std::time::Duration::from_millis(base - LLM_BACKOFF_JITTER_MS + jitter)
}

// ── Tests ─────────────────────────────────────────────────────────────────
