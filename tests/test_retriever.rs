//! Tests for [`netlab_tutor::retriever`]
//!
//! Uses an in-memory index and a deterministic stub embedder — no
//! provider endpoint involved.

use std::sync::Arc;

use async_trait::async_trait;
use netlab_tutor::embedding::Embedder;
use netlab_tutor::error::TutorError;
use netlab_tutor::index::{ChunkMeta, VectorIndex};
use netlab_tutor::patterns::PatternSet;
use netlab_tutor::retriever::Retriever;
use netlab_tutor::types::{CliEntry, DocClass, Intent};

const DIM: usize = 4;

/// Deterministic embedder: a fixed unit vector for every query.
struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, TutorError> {
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }
}

/// Embedder that always fails, for degradation tests.
struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, TutorError> {
        Err(TutorError::Embedding("endpoint down".into()))
    }
}

fn chunk(id: &str, class: DocClass, lab_id: Option<&str>) -> ChunkMeta {
    ChunkMeta {
        chunk_id: id.to_string(),
        content: format!("content of {id}"),
        doc_class: class,
        lab_id: lab_id.map(str::to_string),
        source_file: "labs.md".to_string(),
        offset: 0,
    }
}

/// Vector whose first component decreases with `rank`, so lower ranks
/// score higher against the stub query.
fn ranked_vector(rank: usize) -> Vec<f32> {
    let x = 1.0 - rank as f32 * 0.05;
    vec![x, (1.0 - x * x).max(0.0).sqrt(), 0.0, 0.0]
}

fn build_retriever(chunks: Vec<ChunkMeta>) -> Retriever {
    let rows: Vec<Vec<f32>> = (0..chunks.len()).map(ranked_vector).collect();
    let index = VectorIndex::from_parts(DIM, rows, chunks).unwrap();
    Retriever::with_index(Some(index), Arc::new(StubEmbedder), 3, 12)
}

fn entry(command: &str, output: &str) -> CliEntry {
    CliEntry {
        command: command.into(),
        output: output.into(),
        timestamp: String::new(),
        device_id: String::new(),
    }
}

fn vocab() -> PatternSet {
    PatternSet::builtin().unwrap()
}

#[tokio::test]
async fn teaching_mode_returns_at_most_three() {
    let chunks = (0..8)
        .map(|i| chunk(&format!("c{i}"), DocClass::CommandReference, None))
        .collect();
    let retriever = build_retriever(chunks);

    let outcome = retriever
        .retrieve(Intent::Teaching, "What is a VLAN?", &[], None, &vocab())
        .await;

    assert!(!outcome.unavailable);
    assert_eq!(outcome.query, "Explain the concept: What is a VLAN?");
    assert_eq!(outcome.docs.len(), 3);
}

#[tokio::test]
async fn troubleshooting_cap_is_five() {
    let mut chunks = Vec::new();
    for i in 0..4 {
        chunks.push(chunk(&format!("e{i}"), DocClass::ErrorPatterns, None));
    }
    for i in 0..4 {
        chunks.push(chunk(&format!("c{i}"), DocClass::CommandReference, None));
    }
    for i in 0..4 {
        chunks.push(chunk(&format!("l{i}"), DocClass::LabSpecific, None));
    }
    let retriever = build_retriever(chunks);

    let window = vec![entry(
        "hostnane R1",
        "Router(config)#hostnane R1\n  ^\n% Invalid input detected at '^' marker.",
    )];
    let outcome = retriever
        .retrieve(Intent::Troubleshooting, "what's wrong?", &window, None, &vocab())
        .await;

    assert!(outcome.docs.len() <= 5);
    assert_eq!(outcome.docs.len(), 5);

    // Error context: 2 error-pattern + 2 command-reference + 1 lab chunk.
    let by_class = |class: DocClass| outcome.docs.iter().filter(|d| d.doc_class == class).count();
    assert_eq!(by_class(DocClass::ErrorPatterns), 2);
    assert_eq!(by_class(DocClass::CommandReference), 2);
    assert_eq!(by_class(DocClass::LabSpecific), 1);
}

#[tokio::test]
async fn docs_sorted_by_class_then_score() {
    let chunks = vec![
        chunk("l0", DocClass::LabSpecific, None),
        chunk("e0", DocClass::ErrorPatterns, None),
        chunk("c0", DocClass::CommandReference, None),
        chunk("e1", DocClass::ErrorPatterns, None),
    ];
    let retriever = build_retriever(chunks);

    let window = vec![entry("ip address", "% Incomplete command.")];
    let outcome = retriever
        .retrieve(Intent::Troubleshooting, "help", &window, None, &vocab())
        .await;

    let classes: Vec<u8> = outcome.docs.iter().map(|d| d.doc_class.priority()).collect();
    let mut sorted = classes.clone();
    sorted.sort();
    assert_eq!(classes, sorted, "docs must be grouped by class priority");

    for pair in outcome.docs.windows(2) {
        if pair[0].doc_class == pair[1].doc_class {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}

#[tokio::test]
async fn missing_index_degrades_to_unavailable() {
    let retriever = Retriever::with_index(None, Arc::new(StubEmbedder), 3, 12);
    let outcome = retriever
        .retrieve(Intent::Teaching, "What is OSPF?", &[], None, &vocab())
        .await;

    assert!(outcome.unavailable);
    assert!(outcome.docs.is_empty());
    // The query is still rewritten for observability.
    assert!(outcome.query.starts_with("Explain the concept:"));
}

#[tokio::test]
async fn failing_embedder_degrades_to_unavailable() {
    let chunks = vec![chunk("c0", DocClass::CommandReference, None)];
    let rows = vec![ranked_vector(0)];
    let index = VectorIndex::from_parts(DIM, rows, chunks).unwrap();
    let retriever = Retriever::with_index(Some(index), Arc::new(FailingEmbedder), 3, 12);

    let outcome = retriever
        .retrieve(Intent::Teaching, "What is OSPF?", &[], None, &vocab())
        .await;

    assert!(outcome.unavailable);
    assert!(outcome.docs.is_empty());
}

#[tokio::test]
async fn other_labs_chunks_are_filtered() {
    let chunks = vec![
        chunk("mine", DocClass::LabSpecific, Some("01-basic-routing")),
        chunk("other", DocClass::LabSpecific, Some("07-acls")),
        chunk("shared", DocClass::CommandReference, None),
    ];
    let retriever = build_retriever(chunks);

    let outcome = retriever
        .retrieve(
            Intent::Troubleshooting,
            "help",
            &[entry("ip address", "% Incomplete command.")],
            Some("01-basic-routing"),
            &vocab(),
        )
        .await;

    let ids: Vec<&str> = outcome
        .docs
        .iter()
        .filter_map(|d| d.metadata.get("chunk_id").map(String::as_str))
        .collect();
    assert!(ids.contains(&"mine"));
    assert!(ids.contains(&"shared"));
    assert!(!ids.contains(&"other"));
}

#[tokio::test]
async fn caret_error_query_names_invalid_input() {
    let retriever = build_retriever(vec![chunk("c0", DocClass::CommandReference, None)]);
    let window = vec![entry(
        "interfase g0/0",
        "Switch(config)#interfase g0/0\n  ^\n% Invalid input detected at '^' marker.",
    )];
    let outcome = retriever
        .retrieve(Intent::Troubleshooting, "fix?", &window, None, &vocab())
        .await;

    assert!(outcome.query.starts_with("Invalid input detected"));
    assert!(outcome.query.ends_with("error pattern"));
}
