//! Intent router: a pure keyword heuristic, no LLM, no I/O.
//!
//! Classification runs the ordered rule list over fixed keyword sets and
//! the CLI window. Identical inputs always produce the same label.

use crate::types::{CliEntry, Intent};

/// Keywords signalling a conceptual question.
pub const TEACH_KEYWORDS: &[&str] = &[
    "why",
    "what",
    "explain",
    "how",
    "describe",
    "tell",
    "when",
    "difference",
    "concept",
];

/// Keywords signalling a debugging request.
pub const TROUBLE_KEYWORDS: &[&str] = &[
    "wrong",
    "error",
    "fix",
    "broken",
    "failed",
    "stuck",
    "doesn't",
    "won't",
    "not working",
    "invalid",
];

/// Named IOS error fragments (the bare `%` pre-filter lives in the
/// detector; the router requires one of these plus a `%`).
const NAMED_ERROR_FRAGMENTS: &[&str] = &[
    "% Invalid input",
    "% Incomplete command",
    "% Ambiguous command",
    "% Unknown command",
    "% Unrecognized",
];

/// Classify a question against the CLI window (already trimmed to the
/// last 5 entries).
pub fn classify(question: &str, cli_window: &[CliEntry]) -> Intent {
    let lower = question.to_lowercase();
    let teach_kw = TEACH_KEYWORDS
        .iter()
        .filter(|kw| contains_keyword(&lower, kw))
        .count();
    let trouble_kw = TROUBLE_KEYWORDS
        .iter()
        .filter(|kw| contains_keyword(&lower, kw))
        .count();

    let has_cli_error = cli_window.iter().any(|e| {
        e.output.contains('%') && NAMED_ERROR_FRAGMENTS.iter().any(|f| e.output.contains(f))
    });

    // Ordered rules; the first that applies wins.
    if has_cli_error && teach_kw > 0 && trouble_kw == 0 {
        // A concept question despite visible errors stays teaching.
        Intent::Teaching
    } else if has_cli_error {
        Intent::Troubleshooting
    } else if trouble_kw > teach_kw {
        Intent::Troubleshooting
    } else if teach_kw > trouble_kw {
        Intent::Teaching
    } else if teach_kw == trouble_kw && teach_kw > 0 {
        Intent::Ambiguous
    } else {
        Intent::Teaching
    }
}

/// Keyword membership. Multi-word keywords match as substrings; single
/// words match whole tokens (apostrophes kept, so `doesn't` is one
/// token).
fn contains_keyword(lower_text: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        return lower_text.contains(keyword);
    }
    tokens(lower_text).any(|t| t == keyword)
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches('\''))
}

// ── Tests ─────────────────────────────────────────────────────────────────
