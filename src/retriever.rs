//! Retrieval over the lab corpus: error-aware query rewriting, cosine
//! search, and doc-class prioritization.
//!
//! The retriever never fails a turn. A missing index or a failed query
//! embedding produces an empty document list with `unavailable = true`;
//! the feedback node answers from prompt context alone.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::config::{Config, RETRIEVED_DOCS_CAP};
use crate::detector::IOS_ERROR_FRAGMENTS;
use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::patterns::PatternSet;
use crate::types::{CliEntry, DocClass, Intent, RetrievedDoc};

/// Result of one retrieval pass.
#[derive(Debug)]
pub struct RetrievalOutcome {
    /// The rewritten query actually sent to the index.
    pub query: String,
    /// Final prioritized list, capped at 5, sorted by doc-class priority
    /// then similarity.
    pub docs: Vec<RetrievedDoc>,
    /// `true` when the index or the embedding endpoint was unusable.
    pub unavailable: bool,
}

pub struct Retriever {
    index: Option<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    k_teaching: usize,
    k_troubleshooting: usize,
}

impl Retriever {
    /// Load the index from the configured paths. A load failure is
    /// recorded and degrades every turn to `unavailable` instead of
    /// failing construction.
    pub fn new(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        let index = match VectorIndex::load(
            Path::new(&config.retriever_index_path),
            Path::new(&config.retriever_metadata_path),
            config.embeddings_dim,
        ) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!(error = %e, "vector index unavailable, retrieval disabled");
                None
            }
        };

        Self {
            index,
            embedder,
            k_teaching: config.retriever_k_teaching,
            k_troubleshooting: config.retriever_k_troubleshooting,
        }
    }

    /// Build from parts (tests).
    pub fn with_index(
        index: Option<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        k_teaching: usize,
        k_troubleshooting: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            k_teaching,
            k_troubleshooting,
        }
    }

    /// One retrieval pass for a turn.
    pub async fn retrieve(
        &self,
        intent: Intent,
        question: &str,
        cli_window: &[CliEntry],
        lab_id: Option<&str>,
        vocab: &PatternSet,
    ) -> RetrievalOutcome {
        let teaching = intent != Intent::Troubleshooting;
        let (query, error_context) = rewrite_query(intent, question, cli_window, vocab);

        let Some(index) = &self.index else {
            return RetrievalOutcome {
                query,
                docs: Vec::new(),
                unavailable: true,
            };
        };

        let embedding = match self.embedder.embed_query(&query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed, retrieval skipped");
                return RetrievalOutcome {
                    query,
                    docs: Vec::new(),
                    unavailable: true,
                };
            }
        };

        let k = if teaching {
            self.k_teaching
        } else {
            self.k_troubleshooting
        };

        let mut candidates: Vec<RetrievedDoc> = index
            .search(&embedding, k)
            .into_iter()
            .map(|(i, score)| {
                let meta = index.meta(i);
                let mut map = std::collections::HashMap::new();
                map.insert("chunk_id".to_string(), meta.chunk_id.clone());
                map.insert("source_file".to_string(), meta.source_file.clone());
                if let Some(lab) = &meta.lab_id {
                    map.insert("lab_id".to_string(), lab.clone());
                }
                RetrievedDoc {
                    content: meta.content.clone(),
                    score,
                    doc_class: meta.doc_class,
                    metadata: map,
                }
            })
            // Lab-specific chunks from other labs are never relevant.
            .filter(|doc| {
                doc.doc_class != DocClass::LabSpecific
                    || match (lab_id, doc.metadata.get("lab_id")) {
                        (Some(current), Some(doc_lab)) => doc_lab.as_str() == current,
                        _ => true,
                    }
            })
            .collect();

        let mut docs = if teaching {
            candidates.truncate(self.k_teaching);
            candidates
        } else {
            prioritize(candidates, error_context)
        };

        sort_by_class_then_score(&mut docs);

        RetrievalOutcome {
            query,
            docs,
            unavailable: false,
        }
    }
}

// ── Query rewriting ───────────────────────────────────────────────────────

/// Rewrite the student question into the query actually searched.
///
/// Returns `(query, error_context)`; `error_context` selects the
/// error-weighted prioritization quotas downstream.
pub fn rewrite_query(
    intent: Intent,
    question: &str,
    cli_window: &[CliEntry],
    vocab: &PatternSet,
) -> (String, bool) {
    if intent != Intent::Troubleshooting {
        return (format!("Explain the concept: {question}"), false);
    }

    // Most recent failed command in the window.
    let failed = cli_window
        .iter()
        .rev()
        .find(|e| IOS_ERROR_FRAGMENTS.iter().any(|f| e.output.contains(f)));

    if let Some(entry) = failed {
        let keywords = command_keywords(&entry.command, vocab);

        if entry.output.contains('^') {
            return (
                format!("Invalid input detected {keywords} error pattern"),
                true,
            );
        }

        // Name the error kind in the query, e.g. "Incomplete command".
        let error_tokens = IOS_ERROR_FRAGMENTS
            .iter()
            .find(|f| **f != "%" && entry.output.contains(**f))
            .map(|f| f.trim_start_matches("% "))
            .unwrap_or("error");

        return (format!("{error_tokens} {keywords} Cisco IOS"), true);
    }

    if let Some(last) = cli_window.last() {
        let keywords = command_keywords(&last.command, vocab);
        if !keywords.is_empty() {
            return (format!("Cisco IOS {keywords} command syntax"), false);
        }
    }

    (format!("Cisco IOS {question}"), false)
}

/// Deduplicated command tokens, stopword-filtered to Cisco-vocabulary
/// words.
fn command_keywords(command: &str, vocab: &PatternSet) -> String {
    let mut seen = Vec::new();
    for token in command.split_whitespace() {
        let token = token.to_lowercase();
        if vocab.is_cisco_word(&token) && !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen.join(" ")
}

// ── Prioritization ────────────────────────────────────────────────────────

/// Troubleshooting-mode doc-class quotas over the candidate pool, capped
/// at [`RETRIEVED_DOCS_CAP`]. Short buckets are backfilled from the
/// remaining candidates in score order.
fn prioritize(candidates: Vec<RetrievedDoc>, error_context: bool) -> Vec<RetrievedDoc> {
    let quotas: &[(DocClass, usize)] = if error_context {
        &[
            (DocClass::ErrorPatterns, 2),
            (DocClass::CommandReference, 2),
            (DocClass::LabSpecific, 1),
        ]
    } else {
        &[(DocClass::CommandReference, 3), (DocClass::LabSpecific, 2)]
    };

    let mut picked: Vec<RetrievedDoc> = Vec::new();
    let mut remaining: Vec<RetrievedDoc> = Vec::new();

    for (class, quota) in quotas {
        for doc in candidates
            .iter()
            .filter(|d| d.doc_class == *class)
            .take(*quota)
        {
            picked.push(doc.clone());
        }
    }

    for doc in candidates {
        let already = picked
            .iter()
            .any(|p| p.metadata.get("chunk_id") == doc.metadata.get("chunk_id"));
        if !already {
            remaining.push(doc);
        }
    }

    // Backfill from any class, best score first.
    remaining.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    for doc in remaining {
        if picked.len() >= RETRIEVED_DOCS_CAP {
            break;
        }
        picked.push(doc);
    }

    picked.truncate(RETRIEVED_DOCS_CAP);
    picked
}

fn sort_by_class_then_score(docs: &mut [RetrievedDoc]) {
    docs.sort_by(|a, b| {
        a.doc_class
            .priority()
            .cmp(&b.doc_class.priority())
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, class: DocClass, score: f32) -> RetrievedDoc {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("chunk_id".to_string(), id.to_string());
        RetrievedDoc {
            content: format!("doc {id}"),
            score,
            doc_class: class,
            metadata,
        }
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

    #[test]
    fn teaching_query_gets_concept_prefix() {
        let (q, err) = rewrite_query(Intent::Teaching, "What is a VLAN?", &[], &vocab());
        assert_eq!(q, "Explain the concept: What is a VLAN?");
        assert!(!err);
    }

    #[test]
    fn caret_error_rewrites_to_invalid_input_query() {
        let window = vec![entry(
            "hostnane Router1",
            "Router(config)#hostnane Router1\n  ^\n% Invalid input detected at '^' marker.",
        )];
        let (q, err) = rewrite_query(Intent::Troubleshooting, "what's wrong?", &window, &vocab());
        assert!(q.starts_with("Invalid input detected"));
        assert!(q.ends_with("error pattern"));
        assert!(err);
    }

    #[test]
    fn incomplete_error_names_error_kind() {
        let window = vec![entry("ip address", "% Incomplete command.")];
        let (q, err) = rewrite_query(Intent::Troubleshooting, "help", &window, &vocab());
        assert!(q.starts_with("Incomplete command"));
        assert!(q.contains("ip"));
        assert!(q.ends_with("Cisco IOS"));
        assert!(err);
    }

    #[test]
    fn clean_window_uses_command_syntax_query() {
        let window = vec![entry("show running-config", "Building configuration...")];
        let (q, err) = rewrite_query(Intent::Troubleshooting, "help", &window, &vocab());
        assert_eq!(q, "Cisco IOS show running-config command syntax");
        assert!(!err);
    }

    #[test]
    fn empty_window_falls_back_to_question() {
        let (q, err) = rewrite_query(Intent::Troubleshooting, "my ping fails", &[], &vocab());
        assert_eq!(q, "Cisco IOS my ping fails");
        assert!(!err);
    }

    #[test]
    fn keywords_deduplicate_and_filter() {
        let set = vocab();
        let kw = command_keywords("ip ip address 10.0.0.1 banana", &set);
        assert_eq!(kw, "ip address");
    }

    #[test]
    fn error_quotas_cap_at_five() {
        let candidates = vec![
            doc("e1", DocClass::ErrorPatterns, 0.9),
            doc("e2", DocClass::ErrorPatterns, 0.8),
            doc("e3", DocClass::ErrorPatterns, 0.7),
            doc("c1", DocClass::CommandReference, 0.95),
            doc("c2", DocClass::CommandReference, 0.6),
            doc("c3", DocClass::CommandReference, 0.5),
            doc("l1", DocClass::LabSpecific, 0.4),
            doc("l2", DocClass::LabSpecific, 0.3),
        ];
        let picked = prioritize(candidates, true);
        assert_eq!(picked.len(), 5);
        let eps = picked
            .iter()
            .filter(|d| d.doc_class == DocClass::ErrorPatterns)
            .count();
        let crs = picked
            .iter()
            .filter(|d| d.doc_class == DocClass::CommandReference)
            .count();
        let lss = picked
            .iter()
            .filter(|d| d.doc_class == DocClass::LabSpecific)
            .count();
        assert_eq!((eps, crs, lss), (2, 2, 1));
    }

    #[test]
    fn short_bucket_backfills_from_other_classes() {
        let candidates = vec![
            doc("c1", DocClass::CommandReference, 0.9),
            doc("c2", DocClass::CommandReference, 0.8),
            doc("c3", DocClass::CommandReference, 0.7),
            doc("c4", DocClass::CommandReference, 0.6),
            doc("c5", DocClass::CommandReference, 0.5),
        ];
        // Error context quotas want 2 EP + 2 CR + 1 LS; with only command
        // reference available everything backfills from that class.
        let picked = prioritize(candidates, true);
        assert_eq!(picked.len(), 5);
        assert!(picked.iter().all(|d| d.doc_class == DocClass::CommandReference));
    }

    #[test]
    fn no_error_quotas_prefer_reference_docs() {
        let candidates = vec![
            doc("e1", DocClass::ErrorPatterns, 0.99),
            doc("c1", DocClass::CommandReference, 0.9),
            doc("c2", DocClass::CommandReference, 0.8),
            doc("c3", DocClass::CommandReference, 0.7),
            doc("l1", DocClass::LabSpecific, 0.6),
            doc("l2", DocClass::LabSpecific, 0.5),
        ];
        let picked = prioritize(candidates, false);
        assert_eq!(picked.len(), 5);
        let crs = picked
            .iter()
            .filter(|d| d.doc_class == DocClass::CommandReference)
            .count();
        let lss = picked
            .iter()
            .filter(|d| d.doc_class == DocClass::LabSpecific)
            .count();
        assert_eq!((crs, lss), (3, 2));
    }

    #[test]
    fn final_sort_is_class_then_score() {
        let mut docs = vec![
            doc("l1", DocClass::LabSpecific, 0.9),
            doc("e1", DocClass::ErrorPatterns, 0.2),
            doc("c1", DocClass::CommandReference, 0.8),
            doc("e2", DocClass::ErrorPatterns, 0.7),
        ];
        sort_by_class_then_score(&mut docs);
        let ids: Vec<_> = docs
            .iter()
            .map(|d| d.metadata.get("chunk_id").unwrap().as_str())
            .collect();
        assert_eq!(ids, vec!["e2", "e1", "c1", "l1"]);
    }
}
