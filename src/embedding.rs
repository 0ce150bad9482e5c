//! Embedding client for the OpenAI-compatible `/embeddings` endpoint.
//!
//! Query embeddings are produced remotely by the configured provider;
//! the pre-built index was embedded with the same model at build time.

use async_trait::async_trait;
use serde_json::json;

use crate::config::Config;
use crate::error::TutorError;

/// Seam for query embedding, so retrieval can be tested without a
/// provider endpoint.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, TutorError>;
}

/// HTTP client for the provider's embeddings endpoint.
pub struct EmbeddingClient {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: String,
    model_name: String,
    dim: usize,
}

impl EmbeddingClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint_url: config.embeddings_endpoint_url.clone(),
            api_key: config.llm_api_key.clone(),
            model_name: config.embeddings_model_name.clone(),
            dim: config.embeddings_dim,
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, TutorError> {
        let url = format!("{}/embeddings", self.endpoint_url.trim_end_matches('/'));

        let body = json!({
            "model": self.model_name,
            "input": [text],
            // Asymmetric retrieval models embed queries and passages
            // differently; the index side used "passage".
            "input_type": "query",
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(TutorError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(unreadable body)".to_string());
            return Err(TutorError::Embedding(format!(
                "embeddings endpoint returned {status}: {}",
                truncate(&body, 200)
            )));
        }

        let raw: serde_json::Value = response.json().await.map_err(TutorError::Http)?;

        let embedding: Vec<f32> = raw
            .pointer("/data/0/embedding")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .ok_or_else(|| {
                TutorError::Embedding("response missing data[0].embedding".to_string())
            })?;

        if embedding.len() != self.dim {
            return Err(TutorError::Embedding(format!(
                "expected {}-dim embedding, got {}",
                self.dim,
                embedding.len()
            )));
        }

        Ok(embedding)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}…[truncated]")
    } else {
        s.to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_string_unchanged() {
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn truncate_long_string_marks_cut() {
        let out = truncate(&"x".repeat(300), 200);
        assert!(out.ends_with("…[truncated]"));
        assert!(out.chars().count() < 300);
    }
}
