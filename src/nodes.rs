//! Node implementations for the agent graph: retrieval wiring, the two
//! feedback nodes, the bounded tool loop, and the paraphraser.
//!
//! Prompt assembly lives here as pure functions so the exact text sent
//! to the provider is unit-testable without a network.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::detector;
use crate::error::TutorError;
use crate::llm::{ChatCompletion, LlmParams};
use crate::patterns::PatternRegistry;
use crate::retriever::Retriever;
use crate::tools::ToolExecutor;
use crate::types::{
    ChatMessage, CliEntry, DocClass, Diagnosis, Intent, MasteryLevel, Role, TurnState,
};

/// Sink for incremental output during a turn. `false` from `info` or
/// `text` means the transport is gone and the turn must stop.
pub trait TurnEmitter: Send {
    /// Lifecycle milestone (`routed:teaching`, `tool:…`).
    fn info(&mut self, phase: &str) -> bool;
    /// User-visible text delta (already filtered by the driver).
    fn text(&mut self, delta: &str) -> bool;
    /// `true` once the transport has gone away. Checked before each
    /// I/O await so a disconnected client stops the turn even between
    /// emissions.
    fn is_cancelled(&self) -> bool;
}

/// Components shared by every node.
pub struct AgentNodes {
    llm: Arc<dyn ChatCompletion>,
    tools: Arc<ToolExecutor>,
    retriever: Arc<Retriever>,
    registry: Arc<PatternRegistry>,
    max_tool_iterations: usize,
    history_window: usize,
}

impl AgentNodes {
    pub fn new(
        llm: Arc<dyn ChatCompletion>,
        tools: Arc<ToolExecutor>,
        retriever: Arc<Retriever>,
        registry: Arc<PatternRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            llm,
            tools,
            retriever,
            registry,
            max_tool_iterations: config.max_tool_iterations,
            history_window: config.conversation_history_messages,
        }
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    // ── Retrieval nodes ──────────────────────────────────────────────

    /// Teaching-path retrieval: concept query, k=3, no error enrichment.
    pub async fn run_teaching_retrieval(&self, state: &mut TurnState) -> Result<(), TutorError> {
        let snapshot = self.registry.snapshot();
        let outcome = self
            .retriever
            .retrieve(
                Intent::Teaching,
                &state.student_question,
                &state.cli_history,
                Some(&state.lab_context.lab_id).filter(|s| !s.is_empty()).map(String::as_str),
                &snapshot,
            )
            .await;

        state.retrieval_query = outcome.query;
        state.retrieval_unavailable = outcome.unavailable;
        state.retrieved_docs = outcome.docs;
        Ok(())
    }

    /// Troubleshooting-path retrieval: error-aware query rewriting plus
    /// doc-class prioritization.
    pub async fn run_retrieval(&self, state: &mut TurnState) -> Result<(), TutorError> {
        let snapshot = self.registry.snapshot();
        let outcome = self
            .retriever
            .retrieve(
                Intent::Troubleshooting,
                &state.student_question,
                &state.cli_history,
                Some(&state.lab_context.lab_id).filter(|s| !s.is_empty()).map(String::as_str),
                &snapshot,
            )
            .await;

        state.retrieval_query = outcome.query;
        state.retrieval_unavailable = outcome.unavailable;
        state.retrieved_docs = outcome.docs;
        Ok(())
    }

    // ── Teaching feedback ────────────────────────────────────────────

    /// One streaming call: concept-focused system prompt, `[DOC i]`
    /// inlining, tone matched to mastery level. No tools, no paraphrase
    /// stage on this path.
    pub async fn run_teaching_feedback(
        &self,
        state: &mut TurnState,
        emit: &mut dyn TurnEmitter,
    ) -> Result<(), TutorError> {
        let system = teaching_system_prompt(state);
        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(trimmed_history(&state.conversation_history, self.history_window));
        messages.push(ChatMessage::user(state.student_question.clone()));

        state.doc_ids_used = doc_ids(state);

        if emit.is_cancelled() {
            return Err(TutorError::Cancelled);
        }

        let params = LlmParams::new(0.7, 400);
        let mut cancelled = false;
        let result = self
            .llm
            .stream(&messages, &[], &params, &mut |delta: &str| {
                if emit.text(delta) {
                    true
                } else {
                    cancelled = true;
                    false
                }
            })
            .await;

        let result = match result {
            Err(e) => return Err(e),
            Ok(_) if cancelled => return Err(TutorError::Cancelled),
            Ok(r) => r,
        };

        state.feedback_message = result.text.unwrap_or_default();
        state.final_message = state.feedback_message.clone();
        Ok(())
    }

    // ── Troubleshooting feedback ─────────────────────────────────────

    /// Detector pass over the CLI window, prompt assembly, the bounded
    /// tool loop, and the streamed final completion.
    pub async fn run_feedback(
        &self,
        state: &mut TurnState,
        emit: &mut dyn TurnEmitter,
        deadline: tokio::time::Instant,
    ) -> Result<(), TutorError> {
        let snapshot = self.registry.snapshot();
        state.cli_diagnoses = detector::detect_window(&state.cli_history, &snapshot);
        state.doc_ids_used = doc_ids(state);

        // Deterministic diagnoses already explain the failure; the tool
        // loop only runs when none was produced.
        let tools_enabled = !state.has_diagnosis();
        debug!(tools_enabled, diagnoses = state.cli_diagnoses.iter().flatten().count(), "feedback preconditions");

        let system = troubleshooting_system_prompt(state, tools_enabled);
        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(trimmed_history(&state.conversation_history, self.history_window));
        messages.push(ChatMessage::user(state.student_question.clone()));

        if tools_enabled {
            let specs = ToolExecutor::specs();
            let params = LlmParams::new(0.2, 600);

            for iteration in 0..self.max_tool_iterations {
                if emit.is_cancelled() {
                    return Err(TutorError::Cancelled);
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!(iteration, "deadline reached, short-circuiting tool loop");
                    break;
                }

                let result = self.llm.complete(&messages, &specs, &params).await?;

                if result.tool_calls.is_empty() {
                    break;
                }

                info!(
                    iteration,
                    calls = result.tool_calls.len(),
                    "executing tool calls"
                );

                // Echo the assistant's tool-call message, then answer
                // each call sequentially.
                messages.push(ChatMessage {
                    role: Role::Assistant,
                    content: result.text.clone().unwrap_or_default(),
                    tool_call_id: None,
                    tool_calls: Some(result.tool_calls.clone()),
                });

                for call in &result.tool_calls {
                    if !emit.info(&format!("tool:{}", call.name)) {
                        return Err(TutorError::Cancelled);
                    }
                    let output = self.tools.execute(call).await;
                    messages.push(ChatMessage::tool_result(call.id.clone(), output));
                }
            }
        }

        // Stream the final completion with the accumulated tool outputs,
        // tools withheld so the model must answer in prose.
        if emit.is_cancelled() {
            return Err(TutorError::Cancelled);
        }

        let params = LlmParams::new(0.7, 600);
        let mut cancelled = false;
        let result = self
            .llm
            .stream(&messages, &[], &params, &mut |delta: &str| {
                if emit.text(delta) {
                    true
                } else {
                    cancelled = true;
                    false
                }
            })
            .await;

        let result = match result {
            Err(e) => return Err(e),
            Ok(_) if cancelled => return Err(TutorError::Cancelled),
            Ok(r) => r,
        };

        state.feedback_message = result.text.unwrap_or_default();
        Ok(())
    }

    // ── Paraphraser ──────────────────────────────────────────────────

    /// Deterministic cleanup of the draft answer. On any LLM error or an
    /// empty response the draft passes through unchanged — the answer is
    /// never lost.
    pub async fn run_paraphrase(&self, state: &mut TurnState) -> Result<(), TutorError> {
        if state.feedback_message.is_empty() {
            state.final_message = String::new();
            return Ok(());
        }

        let messages = vec![
            ChatMessage::system(paraphrase_instructions()),
            ChatMessage::user(state.feedback_message.clone()),
        ];
        let params = LlmParams::new(0.1, 500);

        match self.llm.complete(&messages, &[], &params).await {
            Ok(result) => match result.text {
                Some(text) if !text.trim().is_empty() => state.final_message = text,
                _ => {
                    debug!("paraphraser returned empty text, keeping draft");
                    state.final_message = state.feedback_message.clone();
                }
            },
            Err(e) => {
                warn!(error = %e, "paraphraser failed, keeping draft");
                state.final_message = state.feedback_message.clone();
            }
        }

        Ok(())
    }
}

// ── Prompt assembly ───────────────────────────────────────────────────────

fn mastery_tone(level: MasteryLevel) -> &'static str {
    match level {
        MasteryLevel::Novice => {
            "The student is a beginner: use plain language, define every term you \
             introduce, and keep explanations short and concrete."
        }
        MasteryLevel::Intermediate => {
            "The student knows the basics: build on prior concepts and add the \
             practical details that connect them."
        }
        MasteryLevel::Advanced => {
            "The student is experienced: be precise and technical, and extend the \
             answer toward design trade-offs where relevant."
        }
    }
}

/// System prompt for the teaching path.
pub fn teaching_system_prompt(state: &TurnState) -> String {
    let mut prompt = format!(
        "You are an expert networking tutor helping a student through the lab \
         \"{title}\". Answer the student's conceptual question clearly and \
         accurately.\n\n{tone}\n",
        title = if state.lab_context.title.is_empty() {
            &state.lab_context.lab_id
        } else {
            &state.lab_context.title
        },
        tone = mastery_tone(state.mastery_level),
    );

    if !state.lab_context.objectives.is_empty() {
        prompt.push_str("\nLab objectives:\n");
        for obj in &state.lab_context.objectives {
            prompt.push_str(&format!("- {obj}\n"));
        }
    }

    if !state.retrieved_docs.is_empty() {
        prompt.push_str("\nReference material:\n");
        for (i, doc) in state.retrieved_docs.iter().enumerate() {
            prompt.push_str(&format!("[DOC {}] {}\n", i + 1, doc.content));
        }
        prompt.push_str("\nUse the reference material when it helps, but do not mention document numbers to the student.\n");
    } else if state.retrieval_unavailable {
        prompt.push_str("\nNo reference material is available; answer from your own knowledge.\n");
    }

    prompt.push_str(
        "\nKeep the tone friendly and encouraging. Be concise: two to four \
         sentences for simple questions, one or two short paragraphs for \
         complex ones. Answer directly with no reasoning preamble.\n",
    );
    prompt
}

/// Rendered terminal-activity block: every consumed CLI entry, with the
/// three labeled diagnosis lines when the detector produced one.
pub fn terminal_activity_block(entries: &[CliEntry], diagnoses: &[Option<Diagnosis>]) -> String {
    let mut block = String::new();
    for (i, entry) in entries.iter().enumerate() {
        block.push_str(&format!(
            "Command executed: {}\nOutput displayed: {}\n",
            entry.command,
            entry.output.trim_end()
        ));
        if let Some(Some(d)) = diagnoses.get(i) {
            block.push_str(&format!(
                "Detected error type: {}\nDiagnosis: {}\nSuggested fix: {}\n",
                d.error_type, d.diagnosis, d.fix
            ));
            if let Some(fuzzy) = &d.fuzzy_match {
                block.push_str(&format!(
                    "Likely typo: '{}' should be '{}'\n",
                    fuzzy.typed_word, fuzzy.suggested_word
                ));
            }
        }
        block.push('\n');
    }
    block
}

/// Retrieved documents grouped into three labeled sections matching
/// their doc class.
pub fn docs_sections(state: &TurnState) -> String {
    let mut out = String::new();
    let sections = [
        (DocClass::ErrorPatterns, "Known error patterns"),
        (DocClass::CommandReference, "Command reference"),
        (DocClass::LabSpecific, "Lab material"),
    ];
    for (class, label) in sections {
        let docs: Vec<&crate::types::RetrievedDoc> = state
            .retrieved_docs
            .iter()
            .filter(|d| d.doc_class == class)
            .collect();
        if docs.is_empty() {
            continue;
        }
        out.push_str(&format!("### {label}\n"));
        for doc in docs {
            out.push_str(&doc.content);
            out.push_str("\n\n");
        }
    }
    out
}

/// System prompt for the troubleshooting path.
pub fn troubleshooting_system_prompt(state: &TurnState, tools_enabled: bool) -> String {
    let mut prompt = format!(
        "You are an expert networking tutor watching a student's terminal during \
         the lab \"{title}\".\n\n{tone}\n\n\
         The student's recent terminal activity below is ground truth — trust it \
         over any assumption about the device state, and reference it as \
         \"I can see in your terminal...\".\n\n\
         Student's recent terminal activity:\n{terminal}\n",
        title = if state.lab_context.title.is_empty() {
            &state.lab_context.lab_id
        } else {
            &state.lab_context.title
        },
        tone = mastery_tone(state.mastery_level),
        terminal = terminal_activity_block(&state.cli_history, &state.cli_diagnoses),
    );

    let docs = docs_sections(state);
    if !docs.is_empty() {
        prompt.push_str(&format!("\nReference material:\n{docs}"));
    } else if state.retrieval_unavailable {
        prompt.push_str("\nNo reference material is available; rely on the terminal activity.\n");
    }

    prompt.push_str(
        "\nRules:\n\
         - Never suggest CIDR prefix notation (like 192.168.1.1/24) in a command; \
           Cisco IOS interface commands take dotted-decimal masks.\n\
         - When a diagnosis and fix are already listed under a command, paraphrase \
           them for the student in your own words instead of re-deriving the cause.\n\
         - Quote exact commands and addresses verbatim.\n",
    );

    if tools_enabled {
        prompt.push_str(
            "- If you need the device's actual configuration to answer, call the \
             available tool; otherwise answer directly.\n",
        );
    } else {
        prompt.push_str(
            "- Answer from the terminal activity and reference material alone.\n",
        );
    }

    prompt.push_str("\nBe concise, specific, and encouraging.\n");
    prompt
}

/// Cleanup instruction set for the paraphraser call.
pub fn paraphrase_instructions() -> String {
    "Rewrite the assistant draft below into the final answer shown to a student. \
     Apply exactly these edits and nothing else:\n\
     - Remove narration preambles such as \"Based on...\", \"Looking at...\", or \
       \"According to the documentation...\".\n\
     - Remove internal identifiers: ALL_CAPS_SNAKE_CASE error codes and any \
       mention of tool or function names.\n\
     - If the entire draft is wrapped in quotation marks, remove the wrapping \
       quotes.\n\
     - Preserve code blocks, CLI commands, bullet structure, numbers, and IP \
       addresses exactly as written.\n\
     Return only the rewritten answer."
        .to_string()
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// Last `window` messages of the conversation, for prompt assembly.
fn trimmed_history(history: &[ChatMessage], window: usize) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(window);
    history[start..].to_vec()
}

fn doc_ids(state: &TurnState) -> Vec<String> {
    state
        .retrieved_docs
        .iter()
        .filter_map(|d| d.metadata.get("chunk_id").cloned())
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────
