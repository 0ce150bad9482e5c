//! Deterministic CLI error detection.
//!
//! [`detect`] classifies a single `(command, output)` pair against a
//! [`PatternSet`] snapshot: fast-reject on missing IOS error fragments,
//! then priority-ordered signature / command-regex / marker checks, then
//! template rendering and an optional fuzzy vocabulary lookup for the
//! word under the `^` marker.
//!
//! The detector is a pure function of its inputs and the snapshot — no
//! I/O, no clocks, no randomness.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::{FUZZY_MAX_DISTANCE, FUZZY_MIN_SIMILARITY};
use crate::error::TutorError;
use crate::patterns::{ErrorPattern, MarkerPosition, PatternSet};
use crate::types::{CliEntry, Diagnosis, FuzzyMatch};

/// IOS error fragments used for the fast-reject step. The bare `%` keeps
/// unusual error strings from slipping past the pre-filter.
pub const IOS_ERROR_FRAGMENTS: &[&str] = &[
    "% Invalid input",
    "% Incomplete command",
    "% Ambiguous command",
    "% Unknown command",
    "% Unrecognized",
    "%",
];

// ── Public API ────────────────────────────────────────────────────────────

/// Classify one `(command, output)` pair. Returns at most one diagnosis:
/// the highest-priority matching pattern, insertion order breaking ties.
pub fn detect(command: &str, output: &str, set: &PatternSet) -> Option<Diagnosis> {
    if !IOS_ERROR_FRAGMENTS.iter().any(|f| output.contains(f)) {
        return None;
    }

    for pattern in set.iter_by_priority() {
        match try_pattern(pattern, command, output, set) {
            Ok(Some(diagnosis)) => {
                debug!(
                    pattern_id = %pattern.pattern_id,
                    error_type = %pattern.error_type,
                    "pattern matched"
                );
                return Some(diagnosis);
            }
            Ok(None) => continue,
            Err(e) => {
                // A template referencing an unknown variable disables the
                // pattern for this turn; detection falls through.
                warn!(pattern_id = %pattern.pattern_id, error = %e, "pattern disabled for turn");
                continue;
            }
        }
    }

    None
}

/// Run the detector over a CLI window, producing a result slot per entry.
/// `results[i]` corresponds to `entries[i]`; `None` means no detection.
pub fn detect_window(entries: &[CliEntry], set: &PatternSet) -> Vec<Option<Diagnosis>> {
    entries
        .iter()
        .map(|e| detect(&e.command, &e.output, set))
        .collect()
}

// ── Per-pattern matching ──────────────────────────────────────────────────

fn try_pattern(
    pattern: &ErrorPattern,
    command: &str,
    output: &str,
    set: &PatternSet,
) -> Result<Option<Diagnosis>, TutorError> {
    // All signatures must be substrings of the output. The check is
    // case-sensitive regardless of the command-regex flags.
    if !pattern.signatures.iter().all(|s| output.contains(s)) {
        return Ok(None);
    }

    let Some(m) = pattern.command_regex.captures(command) else {
        return Ok(None);
    };

    if let Some(position) = pattern.marker_check {
        if !marker_matches(position, output, m.get(0).map(|g| g.as_str()).unwrap_or("")) {
            return Ok(None);
        }
    }

    let variables = extract_variables(pattern, command, &m);
    let diagnosis = render_template(&pattern.diagnosis_template, &variables, &pattern.pattern_id)?;
    let fix = render_template(&pattern.fix_template, &variables, &pattern.pattern_id)?;

    let fuzzy_match = pattern
        .fuzzy
        .as_ref()
        .filter(|f| f.enabled)
        .and_then(|f| {
            let typed = caret_word(output)?;
            let vocab = set.vocabulary(&f.vocabulary_scope)?;
            find_suggestion(&typed, vocab)
        });

    Ok(Some(Diagnosis {
        error_type: pattern.error_type.clone(),
        pattern_id: pattern.pattern_id.clone(),
        command: command.to_string(),
        diagnosis,
        fix,
        variables,
        fuzzy_match,
    }))
}

fn extract_variables(
    pattern: &ErrorPattern,
    command: &str,
    m: &regex::Captures<'_>,
) -> HashMap<String, String> {
    let mut variables = HashMap::new();
    variables.insert("command".to_string(), command.to_string());

    for name in pattern.command_regex.capture_names().flatten() {
        if let Some(g) = m.name(name) {
            variables.insert(name.to_string(), g.as_str().to_string());
        }
    }

    // Positional variables: the i-th declared name takes group i+1.
    for (i, name) in pattern.diagnosis_variables.iter().enumerate() {
        if let Some(g) = m.get(i + 1) {
            variables.insert(name.clone(), g.as_str().to_string());
        }
    }

    variables
}

// ── Marker handling ───────────────────────────────────────────────────────

/// Locate the last `^` marker line: `(line_index, caret_column)` in chars.
/// Prefers lines that are nothing but whitespace and a single caret.
fn locate_marker(output: &str) -> Option<(usize, usize)> {
    let lines: Vec<&str> = output.lines().collect();

    let bare = lines
        .iter()
        .enumerate()
        .rev()
        .find(|(_, l)| l.trim() == "^");
    let (idx, line) = match bare {
        Some((i, l)) => (i, *l),
        None => {
            let (i, l) = lines
                .iter()
                .enumerate()
                .rev()
                .find(|(_, l)| l.contains('^'))?;
            (i, *l)
        }
    };

    let col = line.chars().position(|c| c == '^')?;
    Some((idx, col))
}

fn marker_matches(position: MarkerPosition, output: &str, matched_text: &str) -> bool {
    let Some((line_idx, col)) = locate_marker(output) else {
        // Missing marker with marker_check enabled: the pattern simply
        // does not match.
        return false;
    };

    let lines: Vec<&str> = output.lines().collect();
    let echo_len = line_idx
        .checked_sub(1)
        .and_then(|i| lines.get(i))
        .map(|l| l.chars().count())
        .unwrap_or(0);

    match position {
        MarkerPosition::BeforeSlash => matched_text.contains('/'),
        MarkerPosition::AtChar => line_idx > 0 && col < echo_len,
        MarkerPosition::EndOfCommand => echo_len > 0 && col as f64 > echo_len as f64 * 0.7,
    }
}

/// Extract the whitespace-delimited word the caret points at in the
/// echoed command line (the line above the marker). `#` terminates a
/// word on the left so the prompt never bleeds into it.
fn caret_word(output: &str) -> Option<String> {
    let (line_idx, col) = locate_marker(output)?;
    let lines: Vec<&str> = output.lines().collect();
    let echo: Vec<char> = lines.get(line_idx.checked_sub(1)?)?.chars().collect();
    if echo.is_empty() {
        return None;
    }

    let mut pos = col.min(echo.len() - 1);
    if is_boundary(echo[pos]) {
        // Caret between words: fall back to the previous word.
        while pos > 0 && is_boundary(echo[pos]) {
            pos -= 1;
        }
        if is_boundary(echo[pos]) {
            return None;
        }
    }

    let mut start = pos;
    while start > 0 && !is_boundary(echo[start - 1]) {
        start -= 1;
    }
    let mut end = pos;
    while end + 1 < echo.len() && !is_boundary(echo[end + 1]) {
        end += 1;
    }

    Some(echo[start..=end].iter().collect())
}

fn is_boundary(c: char) -> bool {
    c.is_whitespace() || c == '#'
}

// ── Template rendering ────────────────────────────────────────────────────

/// Render a brace-placeholder template. `{{` and `}}` are literal braces;
/// an unknown variable is an error (never silently substituted).
pub fn render_template(
    template: &str,
    variables: &HashMap<String, String>,
    pattern_id: &str,
) -> Result<String, TutorError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    // Unterminated placeholder renders literally.
                    out.push('{');
                    out.push_str(&name);
                    break;
                }
                match variables.get(&name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(TutorError::MissingVariable {
                            pattern_id: pattern_id.to_string(),
                            variable: name,
                        })
                    }
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

// ── Fuzzy matching ────────────────────────────────────────────────────────

/// Damerau-Levenshtein distance (optimal string alignment): edits are
/// insertion, deletion, substitution, and adjacent transposition.
pub fn damerau_levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    // Three-row DP: transposition needs the row before last.
    let mut prev2 = vec![0usize; n + 1];
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                curr[j] = curr[j].min(prev2[j - 2] + 1);
            }
        }
        std::mem::swap(&mut prev2, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity (1.0 = identical).
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (damerau_levenshtein(a, b) as f64 / max_len as f64)
}

/// Look the typed word up in a vocabulary scope. A word already present
/// in the vocabulary is not a typo; otherwise the closest word wins when
/// similarity ≥ 0.7 or edit distance ≤ 2, whichever is looser.
fn find_suggestion(typed: &str, vocab: &[String]) -> Option<FuzzyMatch> {
    let typed_lower = typed.to_lowercase();
    if vocab.iter().any(|w| *w == typed_lower) {
        return None;
    }

    let mut best: Option<(&String, usize, f64)> = None;
    for word in vocab {
        let dist = damerau_levenshtein(&typed_lower, word);
        let sim = similarity(&typed_lower, word);
        let better = match best {
            None => true,
            Some((_, _, best_sim)) => sim > best_sim,
        };
        if better {
            best = Some((word, dist, sim));
        }
    }

    let (word, dist, sim) = best?;
    if sim >= FUZZY_MIN_SIMILARITY || dist <= FUZZY_MAX_DISTANCE {
        Some(FuzzyMatch {
            typed_word: typed.to_string(),
            suggested_word: word.clone(),
            similarity: sim,
        })
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
