//! Tests for [`netlab_tutor::patterns`]

use std::sync::Arc;

use netlab_tutor::error::TutorError;
use netlab_tutor::patterns::{PatternRegistry, PatternSet};

const EMPTY_VOCAB: &str = "{}";

fn pattern_json(id: &str, priority: i64, error_type: &str) -> String {
    format!(
        r#"{{
            "pattern_id": "{id}",
            "description": "test pattern",
            "priority": {priority},
            "signatures": ["% Invalid input"],
            "command_regex": "^{id}",
            "error_type": "{error_type}",
            "diagnosis_template": "diagnosis for {{command}}",
            "fix_template": "fix for {{command}}"
        }}"#
    )
}

fn document(patterns: &[String]) -> String {
    format!(
        r#"{{"version": "1", "patterns": [{}]}}"#,
        patterns.join(",")
    )
}

#[test]
fn builtin_patterns_cover_the_known_error_types() {
    let set = PatternSet::builtin().unwrap();
    let types = set.error_types();
    for expected in [
        "AMBIGUOUS_COMMAND",
        "CIDR_NOT_SUPPORTED",
        "INCOMPLETE_COMMAND",
        "INVALID_INPUT",
        "TYPO_IN_COMMAND",
        "UNKNOWN_COMMAND",
        "WRONG_MODE",
    ] {
        assert!(types.iter().any(|t| t == expected), "missing {expected}");
    }
}

#[test]
fn builtin_vocabulary_has_mode_scopes() {
    let set = PatternSet::builtin().unwrap();
    for scope in [
        "user_exec",
        "privileged_exec",
        "global_config",
        "interface_config",
        "line_config",
    ] {
        assert!(set.vocabulary(scope).is_some(), "missing scope {scope}");
    }
    assert!(set.vocabulary("nonexistent_scope").is_none());
}

#[test]
fn is_cisco_word_spans_all_scopes() {
    let set = PatternSet::builtin().unwrap();
    assert!(set.is_cisco_word("hostname"));
    assert!(set.is_cisco_word("SHUTDOWN"));
    assert!(set.is_cisco_word("configure"));
    assert!(!set.is_cisco_word("banana"));
}

#[test]
fn iter_by_priority_is_descending_with_stable_ties() {
    let doc = document(&[
        pattern_json("alpha", 10, "A"),
        pattern_json("beta", 90, "B"),
        pattern_json("gamma", 90, "C"),
        pattern_json("delta", 50, "D"),
    ]);
    let set = PatternSet::from_sources(&[&doc], EMPTY_VOCAB).unwrap();
    let ids: Vec<_> = set.iter_by_priority().map(|p| p.pattern_id.as_str()).collect();
    assert_eq!(ids, vec!["beta", "gamma", "delta", "alpha"]);
}

#[test]
fn find_returns_the_pattern_or_errors() {
    let doc = document(&[pattern_json("alpha", 10, "A")]);
    let set = PatternSet::from_sources(&[&doc], EMPTY_VOCAB).unwrap();
    assert_eq!(set.find("alpha").unwrap().error_type, "A");
    assert!(set.find("beta").is_err());
}

#[test]
fn missing_required_field_names_pattern_and_field() {
    let doc = r#"{
        "version": "1",
        "patterns": [{
            "pattern_id": "incomplete",
            "description": "d",
            "priority": 5,
            "signatures": [],
            "command_regex": ".",
            "error_type": "X",
            "diagnosis_template": "d"
        }]
    }"#;
    match PatternSet::from_sources(&[doc], EMPTY_VOCAB).unwrap_err() {
        TutorError::PatternLoad {
            pattern_id, field, ..
        } => {
            assert_eq!(pattern_id, "incomplete");
            assert_eq!(field, "fix_template");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn version_field_is_required() {
    let doc = r#"{"patterns": []}"#;
    match PatternSet::from_sources(&[doc], EMPTY_VOCAB).unwrap_err() {
        TutorError::PatternLoad { field, .. } => assert_eq!(field, "version"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn registry_reload_is_atomic_for_held_snapshots() {
    let registry = Arc::new(PatternRegistry::builtin().unwrap());
    let before = registry.snapshot();
    let before_len = before.len();

    registry.reload().unwrap();

    // The old snapshot still answers consistently.
    assert_eq!(before.len(), before_len);
    assert!(before.find("cidr_on_interface").is_ok());

    // And new readers see a complete set.
    let after = registry.snapshot();
    assert_eq!(after.len(), before_len);
}

#[test]
fn concurrent_snapshot_readers_see_old_or_new_never_a_mix() {
    let registry = Arc::new(PatternRegistry::builtin().unwrap());
    let expected_len = registry.snapshot().len();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let registry = Arc::clone(&registry);
        handles.push(std::thread::spawn(move || {
            for _ in 0..200 {
                let snap = registry.snapshot();
                // A mixed set would differ in length or miss an id.
                assert_eq!(snap.len(), expected_len);
                assert!(snap.find("typo_global_config").is_ok());
            }
        }));
    }
    for _ in 0..10 {
        registry.reload().unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn load_dir_reads_every_json_file() {
    let dir = std::env::temp_dir().join(format!("tutor_patterns_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    std::fs::write(
        dir.join("a.json"),
        document(&[pattern_json("from_a", 10, "A")]),
    )
    .unwrap();
    std::fs::write(
        dir.join("b.json"),
        document(&[pattern_json("from_b", 20, "B")]),
    )
    .unwrap();
    // The vocabulary lives outside the patterns directory so the loader
    // does not try to parse it as a pattern document.
    let vocab_dir = std::env::temp_dir().join(format!("tutor_vocab_{}", std::process::id()));
    std::fs::create_dir_all(&vocab_dir).unwrap();
    let vocab_path = vocab_dir.join("cisco_vocabulary.json");
    std::fs::write(&vocab_path, r#"{"global_config": ["hostname"]}"#).unwrap();

    let set = PatternSet::load_dir(&dir, &vocab_path).unwrap();
    assert!(set.find("from_a").is_ok());
    assert!(set.find("from_b").is_ok());

    let _ = std::fs::remove_dir_all(&dir);
    let _ = std::fs::remove_dir_all(&vocab_dir);
}
