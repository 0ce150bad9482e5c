//! Error-pattern registry and JSON loader.
//!
//! Patterns are declared in JSON documents with a `patterns` array and a
//! required `version` field. Loading validates every field and compiles
//! `command_regex` up front; a single invalid pattern fails the whole load
//! with [`TutorError::PatternLoad`] naming the offending pattern and field.
//!
//! The registry hands out immutable [`PatternSet`] snapshots behind an
//! `Arc`; [`PatternRegistry::reload`] swaps the snapshot atomically so a
//! concurrent reader sees either the old set or the new one, never a mix.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::TutorError;

/// Built-in pattern set shipped with the crate.
const BUILTIN_PATTERNS: &str = include_str!("../data/patterns/hardcoded.json");
/// Built-in Cisco vocabulary (per-mode word lists).
const BUILTIN_VOCABULARY: &str = include_str!("../data/cisco_vocabulary.json");

// ── JSON schema ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PatternFile {
    version: Option<String>,
    patterns: Option<Vec<PatternSpec>>,
}

/// Raw pattern definition as it appears in JSON.
#[derive(Debug, Clone, Deserialize)]
struct PatternSpec {
    pattern_id: Option<String>,
    description: Option<String>,
    priority: Option<i64>,
    signatures: Option<Vec<String>>,
    command_regex: Option<String>,
    #[serde(default)]
    regex_flags: Option<String>,
    #[serde(default)]
    marker_check: Option<MarkerCheckSpec>,
    error_type: Option<String>,
    diagnosis_template: Option<String>,
    #[serde(default)]
    diagnosis_variables: Vec<String>,
    fix_template: Option<String>,
    #[serde(default)]
    fix_examples: Vec<String>,
    #[serde(default)]
    affected_modes: Vec<String>,
    #[serde(default)]
    fuzzy: Option<FuzzySpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct MarkerCheckSpec {
    #[serde(default = "default_true")]
    enabled: bool,
    expected_position: String,
}

fn default_true() -> bool {
    true
}

/// Fuzzy-matching declaration on a pattern.
#[derive(Debug, Clone, Deserialize)]
pub struct FuzzySpec {
    pub enabled: bool,
    /// Named vocabulary scope (e.g. `global_config`, `interface_config`).
    pub vocabulary_scope: String,
}

#[derive(Debug, Deserialize)]
struct VocabularyFile {
    #[serde(flatten)]
    scopes: HashMap<String, Vec<String>>,
}

// ── Compiled pattern ──────────────────────────────────────────────────────

/// Position class the `^` marker must map to for a pattern to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerPosition {
    BeforeSlash,
    AtChar,
    EndOfCommand,
}

impl MarkerPosition {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "before_slash" => Some(Self::BeforeSlash),
            "at_char" => Some(Self::AtChar),
            "end_of_command" => Some(Self::EndOfCommand),
            _ => None,
        }
    }
}

/// A validated, compiled error pattern.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    pub pattern_id: String,
    pub description: String,
    pub priority: i64,
    /// Substrings that must all appear in the output (case-sensitive;
    /// `regex_flags` affects only the command regex).
    pub signatures: Vec<String>,
    pub command_regex: Regex,
    pub marker_check: Option<MarkerPosition>,
    pub error_type: String,
    pub diagnosis_template: String,
    pub diagnosis_variables: Vec<String>,
    pub fix_template: String,
    pub fix_examples: Vec<String>,
    pub affected_modes: Vec<String>,
    pub fuzzy: Option<FuzzySpec>,
}

// ── Pattern set (immutable snapshot) ──────────────────────────────────────

/// An immutable collection of compiled patterns plus the fuzzy vocabulary.
///
/// Patterns are held in descending priority order; within equal priority
/// the first-loaded pattern wins.
#[derive(Debug, Default)]
pub struct PatternSet {
    patterns: Vec<ErrorPattern>,
    by_id: HashMap<String, usize>,
    vocabulary: HashMap<String, Vec<String>>,
}

impl PatternSet {
    /// Build a set from raw JSON documents plus a vocabulary document.
    pub fn from_sources(sources: &[&str], vocabulary_json: &str) -> Result<Self, TutorError> {
        let mut set = PatternSet {
            vocabulary: parse_vocabulary(vocabulary_json)?,
            ..Default::default()
        };

        for source in sources {
            let file: PatternFile = serde_json::from_str(source).map_err(|e| {
                TutorError::PatternLoad {
                    pattern_id: "<document>".into(),
                    field: "<root>".into(),
                    reason: e.to_string(),
                }
            })?;

            if file.version.is_none() {
                return Err(TutorError::PatternLoad {
                    pattern_id: "<document>".into(),
                    field: "version".into(),
                    reason: "missing required field".into(),
                });
            }

            let specs = file.patterns.ok_or_else(|| TutorError::PatternLoad {
                pattern_id: "<document>".into(),
                field: "patterns".into(),
                reason: "missing 'patterns' array".into(),
            })?;

            for spec in specs {
                let pattern = compile_pattern(spec)?;
                set.insert(pattern)?;
            }
        }

        // Stable sort preserves insertion order within equal priority.
        set.patterns.sort_by_key(|p| std::cmp::Reverse(p.priority));
        set.by_id = set
            .patterns
            .iter()
            .enumerate()
            .map(|(i, p)| (p.pattern_id.clone(), i))
            .collect();

        for pattern in &set.patterns {
            if let Some(fuzzy) = &pattern.fuzzy {
                if fuzzy.enabled && !set.vocabulary.contains_key(&fuzzy.vocabulary_scope) {
                    warn!(
                        pattern_id = %pattern.pattern_id,
                        scope = %fuzzy.vocabulary_scope,
                        "fuzzy vocabulary scope not present in vocabulary file"
                    );
                }
            }
        }

        info!(
            patterns = set.patterns.len(),
            scopes = set.vocabulary.len(),
            "pattern set loaded"
        );
        Ok(set)
    }

    /// Load every `*.json` file in `dir` (sorted by file name) plus the
    /// vocabulary file at `vocabulary_path`.
    pub fn load_dir(dir: &Path, vocabulary_path: &Path) -> Result<Self, TutorError> {
        let vocabulary_json = std::fs::read_to_string(vocabulary_path)?;

        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        files.sort();

        let mut sources = Vec::with_capacity(files.len());
        for path in &files {
            debug!(path = %path.display(), "reading pattern file");
            sources.push(std::fs::read_to_string(path)?);
        }

        let refs: Vec<&str> = sources.iter().map(String::as_str).collect();
        Self::from_sources(&refs, &vocabulary_json)
    }

    /// The built-in pattern set embedded in the crate.
    pub fn builtin() -> Result<Self, TutorError> {
        Self::from_sources(&[BUILTIN_PATTERNS], BUILTIN_VOCABULARY)
    }

    fn insert(&mut self, pattern: ErrorPattern) -> Result<(), TutorError> {
        if self.by_id.contains_key(&pattern.pattern_id) {
            return Err(TutorError::PatternLoad {
                pattern_id: pattern.pattern_id,
                field: "pattern_id".into(),
                reason: "duplicate pattern id".into(),
            });
        }
        self.by_id.insert(pattern.pattern_id.clone(), 0);
        self.patterns.push(pattern);
        Ok(())
    }

    /// Patterns in descending priority, then insertion order.
    pub fn iter_by_priority(&self) -> impl Iterator<Item = &ErrorPattern> {
        self.patterns.iter()
    }

    /// Point lookup by id.
    pub fn find(&self, pattern_id: &str) -> Result<&ErrorPattern, TutorError> {
        self.by_id
            .get(pattern_id)
            .map(|&i| &self.patterns[i])
            .ok_or_else(|| TutorError::PatternLoad {
                pattern_id: pattern_id.to_string(),
                field: "pattern_id".into(),
                reason: "pattern not found".into(),
            })
    }

    /// Word list for a fuzzy vocabulary scope.
    pub fn vocabulary(&self, scope: &str) -> Option<&[String]> {
        self.vocabulary.get(scope).map(Vec::as_slice)
    }

    /// `true` if the word appears in any vocabulary scope. Used by the
    /// retriever to keep Cisco-vocabulary tokens when building queries.
    pub fn is_cisco_word(&self, word: &str) -> bool {
        let lower = word.to_lowercase();
        self.vocabulary
            .values()
            .any(|words| words.iter().any(|w| w == &lower))
    }

    /// All declared error-type tokens. The content filter scrubs these
    /// from user-visible output.
    pub fn error_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.patterns.iter().map(|p| p.error_type.clone()).collect();
        types.sort();
        types.dedup();
        types
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// ── Validation / compilation ──────────────────────────────────────────────

fn compile_pattern(spec: PatternSpec) -> Result<ErrorPattern, TutorError> {
    let id_for_err = spec
        .pattern_id
        .clone()
        .unwrap_or_else(|| "<unnamed>".to_string());

    let fail = |field: &str, reason: &str| TutorError::PatternLoad {
        pattern_id: id_for_err.clone(),
        field: field.to_string(),
        reason: reason.to_string(),
    };

    let pattern_id = spec
        .pattern_id
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| fail("pattern_id", "missing or empty"))?;
    let description = spec
        .description
        .clone()
        .ok_or_else(|| fail("description", "missing"))?;
    let priority = spec.priority.ok_or_else(|| fail("priority", "missing"))?;
    let signatures = spec
        .signatures
        .clone()
        .ok_or_else(|| fail("signatures", "missing"))?;
    let error_type = spec
        .error_type
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| fail("error_type", "missing or empty"))?;
    let diagnosis_template = spec
        .diagnosis_template
        .clone()
        .ok_or_else(|| fail("diagnosis_template", "missing"))?;
    let fix_template = spec
        .fix_template
        .clone()
        .ok_or_else(|| fail("fix_template", "missing"))?;

    let raw_regex = spec
        .command_regex
        .clone()
        .ok_or_else(|| fail("command_regex", "missing"))?;

    let mut ignore_case = false;
    if let Some(flags) = &spec.regex_flags {
        match flags.as_str() {
            "" => {}
            "IGNORECASE" | "i" => ignore_case = true,
            other => return Err(fail("regex_flags", &format!("unknown flag '{other}'"))),
        }
    }

    let regex_src = if ignore_case {
        format!("(?i){raw_regex}")
    } else {
        raw_regex
    };
    let command_regex =
        Regex::new(&regex_src).map_err(|e| fail("command_regex", &e.to_string()))?;

    let marker_check = match &spec.marker_check {
        Some(mc) if mc.enabled => Some(
            MarkerPosition::parse(&mc.expected_position).ok_or_else(|| {
                fail(
                    "marker_check.expected_position",
                    &format!("unknown position class '{}'", mc.expected_position),
                )
            })?,
        ),
        _ => None,
    };

    if let Some(fuzzy) = &spec.fuzzy {
        if fuzzy.enabled && fuzzy.vocabulary_scope.is_empty() {
            return Err(fail("fuzzy.vocabulary_scope", "empty scope name"));
        }
    }

    Ok(ErrorPattern {
        pattern_id,
        description,
        priority,
        signatures,
        command_regex,
        marker_check,
        error_type,
        diagnosis_template,
        diagnosis_variables: spec.diagnosis_variables,
        fix_template,
        fix_examples: spec.fix_examples,
        affected_modes: spec.affected_modes,
        fuzzy: spec.fuzzy,
    })
}

fn parse_vocabulary(json: &str) -> Result<HashMap<String, Vec<String>>, TutorError> {
    let file: VocabularyFile = serde_json::from_str(json).map_err(|e| TutorError::PatternLoad {
        pattern_id: "<vocabulary>".into(),
        field: "<root>".into(),
        reason: e.to_string(),
    })?;
    Ok(file
        .scopes
        .into_iter()
        .map(|(scope, words)| {
            let words = words.into_iter().map(|w| w.to_lowercase()).collect();
            (scope, words)
        })
        .collect())
}

// ── Registry (atomic-swap handle) ─────────────────────────────────────────

/// Shared handle over an immutable [`PatternSet`] snapshot.
///
/// Readers clone the `Arc` under a brief read lock; `reload` builds the
/// replacement set off-lock and swaps the pointer in one write.
pub struct PatternRegistry {
    inner: RwLock<Arc<PatternSet>>,
    /// Where `reload` re-reads from; `None` for in-memory registries.
    sources: Option<(std::path::PathBuf, std::path::PathBuf)>,
}

impl PatternRegistry {
    /// Registry over the built-in pattern set.
    pub fn builtin() -> Result<Self, TutorError> {
        Ok(Self {
            inner: RwLock::new(Arc::new(PatternSet::builtin()?)),
            sources: None,
        })
    }

    /// Registry loading from a patterns directory + vocabulary file.
    pub fn from_dir(dir: &Path, vocabulary_path: &Path) -> Result<Self, TutorError> {
        let set = PatternSet::load_dir(dir, vocabulary_path)?;
        Ok(Self {
            inner: RwLock::new(Arc::new(set)),
            sources: Some((dir.to_path_buf(), vocabulary_path.to_path_buf())),
        })
    }

    /// Registry over an already-built set (tests).
    pub fn from_set(set: PatternSet) -> Self {
        Self {
            inner: RwLock::new(Arc::new(set)),
            sources: None,
        }
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<PatternSet> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rebuild the set from its sources and swap it in atomically.
    ///
    /// In-memory registries reload the built-in set.
    pub fn reload(&self) -> Result<(), TutorError> {
        let fresh = match &self.sources {
            Some((dir, vocab)) => PatternSet::load_dir(dir, vocab)?,
            None => PatternSet::builtin()?,
        };
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(fresh);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pattern_json(id: &str, priority: i64) -> String {
        format!(
            r#"{{
              "version": "1",
              "patterns": [{{
                "pattern_id": "{id}",
                "description": "test",
                "priority": {priority},
                "signatures": ["% Invalid input"],
                "command_regex": "^test",
                "error_type": "TEST_ERROR",
                "diagnosis_template": "bad",
                "fix_template": "good"
              }}]
            }}"#
        )
    }

    #[test]
    fn builtin_set_loads() {
        let set = PatternSet::builtin().unwrap();
        assert!(!set.is_empty());
        assert!(set.vocabulary("global_config").is_some());
    }

    #[test]
    fn missing_version_fails() {
        let src = r#"{"patterns": []}"#;
        let err = PatternSet::from_sources(&[src], "{}").unwrap_err();
        match err {
            TutorError::PatternLoad { field, .. } => assert_eq!(field, "version"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_regex_names_pattern_and_field() {
        let src = r#"{
          "version": "1",
          "patterns": [{
            "pattern_id": "broken",
            "description": "d",
            "priority": 1,
            "signatures": [],
            "command_regex": "([unclosed",
            "error_type": "X",
            "diagnosis_template": "",
            "fix_template": ""
          }]
        }"#;
        let err = PatternSet::from_sources(&[src], "{}").unwrap_err();
        match err {
            TutorError::PatternLoad {
                pattern_id, field, ..
            } => {
                assert_eq!(pattern_id, "broken");
                assert_eq!(field, "command_regex");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_id_fails() {
        let a = minimal_pattern_json("dup", 1);
        let b = minimal_pattern_json("dup", 2);
        let err = PatternSet::from_sources(&[&a, &b], "{}").unwrap_err();
        match err {
            TutorError::PatternLoad { field, .. } => assert_eq!(field, "pattern_id"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn priority_order_with_insertion_tiebreak() {
        let src = r#"{
          "version": "1",
          "patterns": [
            {"pattern_id": "low", "description": "d", "priority": 10,
             "signatures": [], "command_regex": ".", "error_type": "A",
             "diagnosis_template": "", "fix_template": ""},
            {"pattern_id": "first_high", "description": "d", "priority": 50,
             "signatures": [], "command_regex": ".", "error_type": "B",
             "diagnosis_template": "", "fix_template": ""},
            {"pattern_id": "second_high", "description": "d", "priority": 50,
             "signatures": [], "command_regex": ".", "error_type": "C",
             "diagnosis_template": "", "fix_template": ""}
          ]
        }"#;
        let set = PatternSet::from_sources(&[src], "{}").unwrap();
        let ids: Vec<_> = set.iter_by_priority().map(|p| p.pattern_id.as_str()).collect();
        assert_eq!(ids, vec!["first_high", "second_high", "low"]);
    }

    #[test]
    fn reload_swaps_snapshot() {
        let registry = PatternRegistry::builtin().unwrap();
        let before = registry.snapshot();
        registry.reload().unwrap();
        let after = registry.snapshot();
        // Old snapshot stays usable; new one is a distinct allocation.
        assert_eq!(before.len(), after.len());
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn find_missing_pattern_errors() {
        let set = PatternSet::builtin().unwrap();
        assert!(set.find("no_such_pattern").is_err());
    }

    #[test]
    fn unknown_marker_position_fails() {
        let src = r#"{
          "version": "1",
          "patterns": [{
            "pattern_id": "m",
            "description": "d",
            "priority": 1,
            "signatures": [],
            "command_regex": ".",
            "marker_check": {"enabled": true, "expected_position": "somewhere"},
            "error_type": "X",
            "diagnosis_template": "",
            "fix_template": ""
          }]
        }"#;
        let err = PatternSet::from_sources(&[src], "{}").unwrap_err();
        match err {
            TutorError::PatternLoad { field, .. } => {
                assert_eq!(field, "marker_check.expected_position")
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
