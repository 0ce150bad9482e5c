//! Tests for [`netlab_tutor::router`]
//!
//! The router is pure: every case here runs without network or clock.

use netlab_tutor::router::{classify, TEACH_KEYWORDS, TROUBLE_KEYWORDS};
use netlab_tutor::types::{CliEntry, Intent};

fn entry(command: &str, output: &str) -> CliEntry {
    CliEntry {
        command: command.into(),
        output: output.into(),
        timestamp: String::new(),
        device_id: String::new(),
    }
}

fn invalid_input_entry() -> CliEntry {
    entry(
        "hostnane S1",
        "Switch(config)#hostnane S1\n                     ^\n% Invalid input detected at '^' marker.",
    )
}

#[test]
fn keyword_sets_match_the_contract() {
    for kw in ["why", "what", "explain", "how", "describe", "tell", "when", "difference", "concept"]
    {
        assert!(TEACH_KEYWORDS.contains(&kw), "missing teach keyword {kw}");
    }
    for kw in [
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
    ] {
        assert!(TROUBLE_KEYWORDS.contains(&kw), "missing trouble keyword {kw}");
    }
}

#[test]
fn teaching_questions() {
    let cases = [
        "Why do we need the login keyword?",
        "What is the difference between enable and enable secret?",
        "Explain how VLANs work",
        "What does the configure terminal command do?",
        "When should I use static routing?",
        "Describe the purpose of the subnet mask",
    ];
    for q in cases {
        assert_eq!(classify(q, &[]), Intent::Teaching, "{q}");
    }
}

#[test]
fn troubleshooting_questions() {
    let cases = [
        "Something is broken, help!",
        "I'm stuck, it failed twice",
        "This doesn't work and it's not working at all",
        "Invalid input again, please fix it",
    ];
    for q in cases {
        assert_eq!(classify(q, &[]), Intent::Troubleshooting, "{q}");
    }
}

#[test]
fn cli_error_dominates_unless_pure_concept_question() {
    let window = vec![invalid_input_entry()];

    // Mixed signals with a visible error: troubleshooting.
    assert_eq!(
        classify("what did I do wrong?", &window),
        Intent::Troubleshooting
    );

    // Pure concept question despite the error: teaching.
    assert_eq!(
        classify("Why do we need the login keyword?", &window),
        Intent::Teaching
    );
}

#[test]
fn tie_without_cli_error_is_ambiguous() {
    assert_eq!(classify("what did I do wrong?", &[]), Intent::Ambiguous);
}

#[test]
fn zero_keywords_defaults_to_teaching() {
    assert_eq!(classify("hmm okay then", &[]), Intent::Teaching);
}

#[test]
fn determinism_over_repeated_calls() {
    let window = vec![invalid_input_entry(), entry("show version", "Cisco IOS")];
    let expected = classify("how do I fix this error?", &window);
    for _ in 0..50 {
        assert_eq!(classify("how do I fix this error?", &window), expected);
    }
}

#[test]
fn percent_without_named_fragment_is_not_an_error() {
    let window = vec![entry("show interfaces", "utilization 40% on Gi0/0")];
    assert_eq!(classify("looks fine?", &window), Intent::Teaching);
}

#[test]
fn only_last_five_entries_matter_upstream() {
    // The driver trims the window; the router just reads what it gets.
    let clean: Vec<CliEntry> = (0..5).map(|i| entry(&format!("cmd{i}"), "ok")).collect();
    assert_eq!(classify("anything odd?", &clean), Intent::Teaching);
}
