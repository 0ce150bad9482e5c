//! Streaming driver: sessions, turn execution, and the typed event
//! stream handed to the transport.
//!
//! One turn walks the agent graph and yields
//! `Info* (Content | Info)* Metadata Done` on success or `Info* Error`
//! on recoverable failure. Cancellation (the receiver dropped) stops
//! event production between emissions and before each I/O await; a
//! cancelled turn emits nothing further and leaves the session history
//! untouched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, TEACHING_DEADLINE_S, TROUBLESHOOTING_DEADLINE_S};
use crate::embedding::EmbeddingClient;
use crate::error::TutorError;
use crate::events::TutorEvent;
use crate::filter::ContentFilter;
use crate::graph::{successor, Node};
use crate::labs::load_lab;
use crate::llm::LlmGateway;
use crate::nodes::{AgentNodes, TurnEmitter};
use crate::patterns::PatternRegistry;
use crate::retriever::Retriever;
use crate::router::classify;
use crate::simulator::SimulatorClient;
use crate::tools::ToolExecutor;
use crate::types::{ChatMessage, CliEntry, Intent, LabContext, MasteryLevel, TurnState};

// ── Session state ─────────────────────────────────────────────────────────

struct SessionState {
    lab_context: LabContext,
    mastery_level: MasteryLevel,
    conversation_history: Vec<ChatMessage>,
    cli_history: Vec<CliEntry>,
}

/// Result of a non-streaming turn (the `complete_turn` variant kept for
/// tests and non-streaming callers).
#[derive(Debug)]
pub struct TurnOutcome {
    pub final_message: String,
    pub intent: Intent,
    pub doc_ids_used: Vec<String>,
    /// Detector results for the consumed CLI window, slot-aligned.
    pub diagnoses: Vec<Option<crate::types::Diagnosis>>,
    /// Every `Info` phase observed during the turn, in order.
    pub phases: Vec<String>,
    /// Concatenated filtered content deltas.
    pub streamed_text: String,
}

// ── Tutor ─────────────────────────────────────────────────────────────────

/// The orchestration core behind the transport boundary.
pub struct Tutor {
    nodes: Arc<AgentNodes>,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
    labs_dir: String,
    cli_window: usize,
}

impl Tutor {
    /// Wire every component from configuration. Pattern problems are
    /// fatal here; a missing index only disables retrieval.
    pub fn new(config: &Config) -> Result<Self, TutorError> {
        let registry = if Path::new(&config.patterns_dir).is_dir() {
            PatternRegistry::from_dir(
                Path::new(&config.patterns_dir),
                Path::new(&config.cisco_vocabulary_path),
            )?
        } else {
            warn!(dir = %config.patterns_dir, "patterns directory missing, using built-in set");
            PatternRegistry::builtin()?
        };

        let llm = Arc::new(LlmGateway::new(config)?);
        let simulator = Arc::new(SimulatorClient::new(config)?);
        let tools = Arc::new(ToolExecutor::new(simulator, config.simulator_timeout_s));
        let embedder = Arc::new(EmbeddingClient::new(config));
        let retriever = Arc::new(Retriever::new(config, embedder));

        let nodes = AgentNodes::new(llm, tools, retriever, Arc::new(registry), config);

        Ok(Self {
            nodes: Arc::new(nodes),
            sessions: Mutex::new(HashMap::new()),
            labs_dir: config.labs_dir.clone(),
            cli_window: config.cli_history_entries,
        })
    }

    /// Assemble from pre-built components (tests).
    pub fn from_parts(nodes: AgentNodes, labs_dir: &str, cli_window: usize) -> Self {
        Self {
            nodes: Arc::new(nodes),
            sessions: Mutex::new(HashMap::new()),
            labs_dir: labs_dir.to_string(),
            cli_window,
        }
    }

    // ── Session surface ──────────────────────────────────────────────

    /// Start a session for a lab; returns the session id.
    pub async fn start_session(
        &self,
        lab_id: &str,
        mastery_level: MasteryLevel,
    ) -> Result<String, TutorError> {
        let lab_context = load_lab(&self.labs_dir, lab_id)?;
        let session_id = Uuid::new_v4().to_string();

        let state = SessionState {
            lab_context,
            mastery_level,
            conversation_history: Vec::new(),
            cli_history: Vec::new(),
        };

        self.sessions
            .lock()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(state)));

        info!(session_id = %session_id, lab_id, "session started");
        Ok(session_id)
    }

    /// Number of messages currently in a session's conversation history.
    pub async fn history_len(&self, session_id: &str) -> Result<usize, TutorError> {
        let session = self.session(session_id).await?;
        let guard = session.lock().await;
        Ok(guard.conversation_history.len())
    }

    async fn session(&self, session_id: &str) -> Result<Arc<Mutex<SessionState>>, TutorError> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| TutorError::Session(format!("unknown session '{session_id}'")))
    }

    // ── Streaming turn ───────────────────────────────────────────────

    /// Run one turn, yielding the typed event stream. Dropping the
    /// receiver cancels the turn.
    pub async fn ask(
        &self,
        session_id: &str,
        message: &str,
        cli_history: Option<Vec<CliEntry>>,
    ) -> Result<UnboundedReceiver<TutorEvent>, TutorError> {
        let session = self.session(session_id).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let nodes = Arc::clone(&self.nodes);
        let cli_window = self.cli_window;
        let question = message.to_string();
        tokio::spawn(async move {
            run_streaming_turn(nodes, cli_window, session, question, cli_history, tx).await;
        });

        Ok(rx)
    }

    // ── Non-streaming turn ───────────────────────────────────────────

    /// Non-streaming variant of a turn: same graph, collected output.
    pub async fn complete_turn(
        &self,
        session_id: &str,
        message: &str,
        cli_history: Option<Vec<CliEntry>>,
    ) -> Result<TurnOutcome, TutorError> {
        let session = self.session(session_id).await?;
        let mut session_guard = session.lock().await;
        let mut state =
            build_turn_state(&mut session_guard, message, cli_history, self.cli_window);

        let forbidden = self.nodes.registry().snapshot().error_types();
        let mut emitter = CollectingEmitter {
            filter: ContentFilter::new(forbidden.clone()),
            phases: Vec::new(),
            text: String::new(),
        };

        execute_graph(&self.nodes, &mut state, &mut emitter).await?;
        let tail = emitter.filter.finish();
        emitter.text.push_str(&tail);
        state.final_message = scrub_final(&state.final_message, &forbidden);

        session_guard
            .conversation_history
            .push(ChatMessage::user(state.student_question.clone()));
        session_guard
            .conversation_history
            .push(ChatMessage::assistant(state.final_message.clone()));

        Ok(TurnOutcome {
            final_message: state.final_message,
            intent: state.intent,
            doc_ids_used: state.doc_ids_used,
            diagnoses: state.cli_diagnoses,
            phases: emitter.phases,
            streamed_text: emitter.text,
        })
    }
}

// ── Turn execution ────────────────────────────────────────────────────────

async fn run_streaming_turn(
    nodes: Arc<AgentNodes>,
    cli_window: usize,
    session: Arc<Mutex<SessionState>>,
    question: String,
    cli_history: Option<Vec<CliEntry>>,
    tx: UnboundedSender<TutorEvent>,
) {
    // The session is owned by this turn until it completes.
    let mut session_guard = session.lock().await;
    let mut state = build_turn_state(&mut session_guard, &question, cli_history, cli_window);

    let forbidden = nodes.registry().snapshot().error_types();
    let mut emitter = ChannelEmitter {
        tx: tx.clone(),
        filter: ContentFilter::new(forbidden.clone()),
    };

    match execute_graph(&nodes, &mut state, &mut emitter).await {
        Ok(()) => {
            emitter.flush();
            state.final_message = scrub_final(&state.final_message, &forbidden);

            // History grows by exactly two entries per successful turn.
            session_guard
                .conversation_history
                .push(ChatMessage::user(state.student_question.clone()));
            session_guard
                .conversation_history
                .push(ChatMessage::assistant(state.final_message.clone()));

            let follow_ups = suggested_follow_ups(&state);
            let _ = tx.send(TutorEvent::Metadata {
                final_message: state.final_message.clone(),
                intent: state.intent,
                doc_ids_used: state.doc_ids_used.clone(),
                suggested_follow_ups: follow_ups,
                diagnoses: state.cli_diagnoses.clone(),
            });
            let _ = tx.send(TutorEvent::Done);
        }
        Err(TutorError::Cancelled) => {
            info!("turn cancelled by transport");
        }
        Err(e) => {
            warn!(error = %e, "turn failed");
            let _ = tx.send(TutorEvent::Error {
                message: format!("{}: {e}", e.kind()),
            });
        }
    }
}

fn build_turn_state(
    session: &mut SessionState,
    question: &str,
    cli_history: Option<Vec<CliEntry>>,
    cli_window: usize,
) -> TurnState {
    if let Some(entries) = cli_history {
        session.cli_history = entries;
    }

    // Only the last N entries are consumed per turn.
    let start = session.cli_history.len().saturating_sub(cli_window);
    let window = session.cli_history[start..].to_vec();

    TurnState::new(
        question,
        session.conversation_history.clone(),
        window,
        session.lab_context.clone(),
        session.mastery_level,
    )
}

async fn execute_graph(
    nodes: &AgentNodes,
    state: &mut TurnState,
    emit: &mut dyn TurnEmitter,
) -> Result<(), TutorError> {
    let started = tokio::time::Instant::now();
    let mut node = Node::IntentRouter;

    loop {
        match node {
            Node::IntentRouter => {
                state.intent = classify(&state.student_question, &state.cli_history);
                if !emit.info(&format!("routed:{}", state.intent.as_str())) {
                    return Err(TutorError::Cancelled);
                }
            }
            Node::TeachingRetrieval => {
                if emit.is_cancelled() {
                    return Err(TutorError::Cancelled);
                }
                nodes.run_teaching_retrieval(state).await?;
                if state.retrieval_unavailable && !emit.info("retrieval:unavailable") {
                    return Err(TutorError::Cancelled);
                }
            }
            Node::Retrieval => {
                if emit.is_cancelled() {
                    return Err(TutorError::Cancelled);
                }
                nodes.run_retrieval(state).await?;
                if state.retrieval_unavailable && !emit.info("retrieval:unavailable") {
                    return Err(TutorError::Cancelled);
                }
            }
            Node::TeachingFeedback => {
                nodes.run_teaching_feedback(state, emit).await?;
            }
            Node::Feedback => {
                let deadline =
                    started + std::time::Duration::from_secs(TROUBLESHOOTING_DEADLINE_S);
                nodes.run_feedback(state, emit, deadline).await?;
            }
            Node::Paraphrase => {
                if emit.is_cancelled() {
                    return Err(TutorError::Cancelled);
                }
                nodes.run_paraphrase(state).await?;
            }
            Node::End => break,
        }
        node = successor(node, state.intent);
    }

    // The teaching deadline is advisory: log when exceeded so slow
    // provider turns are visible in traces.
    if state.intent != Intent::Troubleshooting
        && started.elapsed() > std::time::Duration::from_secs(TEACHING_DEADLINE_S)
    {
        warn!(elapsed_s = started.elapsed().as_secs(), "teaching turn exceeded soft deadline");
    }

    Ok(())
}

/// Run the final message through a fresh content filter so metadata and
/// history never carry sentinels or internal error-type tokens.
fn scrub_final(text: &str, forbidden: &[String]) -> String {
    let mut filter = ContentFilter::new(forbidden.to_vec());
    let mut out = filter.push(text);
    out.push_str(&filter.finish());
    out
}

fn suggested_follow_ups(state: &TurnState) -> Vec<String> {
    state
        .lab_context
        .objectives
        .first()
        .map(|obj| vec![format!("Next objective: {obj}")])
        .unwrap_or_default()
}

// ── Emitters ──────────────────────────────────────────────────────────────

/// Streams events into the transport channel through the content filter.
struct ChannelEmitter {
    tx: UnboundedSender<TutorEvent>,
    filter: ContentFilter,
}

impl ChannelEmitter {
    fn flush(&mut self) {
        let tail = self.filter.finish();
        if !tail.is_empty() {
            let _ = self.tx.send(TutorEvent::content(tail));
        }
    }
}

impl TurnEmitter for ChannelEmitter {
    fn info(&mut self, phase: &str) -> bool {
        self.tx.send(TutorEvent::info(phase)).is_ok()
    }

    fn text(&mut self, delta: &str) -> bool {
        let safe = self.filter.push(delta);
        if safe.is_empty() {
            // Nothing to emit; the closed channel still signals cancel.
            return !self.tx.is_closed();
        }
        self.tx.send(TutorEvent::content(safe)).is_ok()
    }

    fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Collects everything in memory for `complete_turn`.
struct CollectingEmitter {
    filter: ContentFilter,
    phases: Vec<String>,
    text: String,
}

impl TurnEmitter for CollectingEmitter {
    fn info(&mut self, phase: &str) -> bool {
        self.phases.push(phase.to_string());
        true
    }

    fn text(&mut self, delta: &str) -> bool {
        self.text.push_str(&self.filter.push(delta));
        true
    }

    // Non-streaming callers have no transport to lose.
    fn is_cancelled(&self) -> bool {
        false
    }
}
