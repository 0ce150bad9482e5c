//! Typed event stream yielded by the streaming driver.
//!
//! For any turn the emitted sequence is
//! `Info* (Content | Info)* Metadata Done` on success, or `Info* Error`
//! on recoverable failure. `Metadata` appears exactly once on success.

use serde::Serialize;

use crate::types::{Diagnosis, Intent};

/// One event at the driver/transport boundary, discriminated by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TutorEvent {
    /// Lifecycle milestone, e.g. `routed:troubleshooting` or
    /// `tool:get_device_running_config`.
    Info { phase: String },
    /// User-visible text delta. Internal markers are already removed.
    Content { text: String },
    /// Terminal metadata emitted once on success.
    Metadata {
        final_message: String,
        intent: Intent,
        doc_ids_used: Vec<String>,
        suggested_follow_ups: Vec<String>,
        /// Detector results for the consumed CLI window, slot-aligned.
        diagnoses: Vec<Option<Diagnosis>>,
    },
    /// Recoverable failure; terminates the stream with no `Done`.
    Error { message: String },
    /// Successful end of stream.
    Done,
}

impl TutorEvent {
    pub fn info(phase: impl Into<String>) -> Self {
        Self::Info {
            phase: phase.into(),
        }
    }

    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
