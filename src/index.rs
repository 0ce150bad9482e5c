//! Persistent vector index: packed `f32` vectors plus an aligned chunk
//! metadata file, produced ahead of time by the indexer.
//!
//! File layout of the vector file: an 8-byte header (`u32` LE count,
//! `u32` LE dim) followed by `count * dim` little-endian `f32` values.
//! The metadata file is a JSON array whose i-th record describes the
//! i-th vector. The index is read-only after load; lookups are cosine
//! similarity over normalized vectors and safe to share across tasks.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::TutorError;
use crate::types::DocClass;

/// One chunk record, aligned 1:1 with a stored vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub chunk_id: String,
    pub content: String,
    pub doc_class: DocClass,
    #[serde(default)]
    pub lab_id: Option<String>,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub offset: usize,
}

/// In-memory index over normalized vectors.
#[derive(Debug)]
pub struct VectorIndex {
    dim: usize,
    /// Row-major, normalized at load.
    vectors: Vec<f32>,
    metadata: Vec<ChunkMeta>,
}

impl VectorIndex {
    /// Load the vector file and aligned metadata file.
    ///
    /// Any missing file, short read, or misalignment yields
    /// [`TutorError::IndexUnavailable`] — the caller degrades to
    /// retrieval-free answers rather than failing the turn.
    pub fn load(index_path: &Path, metadata_path: &Path, dim: usize) -> Result<Self, TutorError> {
        let unavailable = |reason: String| TutorError::IndexUnavailable(reason);

        let bytes = std::fs::read(index_path)
            .map_err(|e| unavailable(format!("{}: {e}", index_path.display())))?;

        if bytes.len() < 8 {
            return Err(unavailable(format!(
                "{}: truncated header",
                index_path.display()
            )));
        }

        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let file_dim = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

        if file_dim != dim {
            return Err(unavailable(format!(
                "dimension mismatch: file has {file_dim}, configured {dim}"
            )));
        }

        let expected = 8 + count * dim * 4;
        if bytes.len() != expected {
            return Err(unavailable(format!(
                "size mismatch: expected {expected} bytes for {count} vectors, found {}",
                bytes.len()
            )));
        }

        let mut vectors = Vec::with_capacity(count * dim);
        for chunk in bytes[8..].chunks_exact(4) {
            vectors.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        let meta_raw = std::fs::read_to_string(metadata_path)
            .map_err(|e| unavailable(format!("{}: {e}", metadata_path.display())))?;
        let metadata: Vec<ChunkMeta> = serde_json::from_str(&meta_raw)
            .map_err(|e| unavailable(format!("{}: {e}", metadata_path.display())))?;

        if metadata.len() != count {
            return Err(unavailable(format!(
                "metadata misaligned: {} records for {count} vectors",
                metadata.len()
            )));
        }

        let mut index = Self {
            dim,
            vectors,
            metadata,
        };
        index.normalize_rows();

        info!(
            vectors = count,
            dim,
            path = %index_path.display(),
            "vector index loaded"
        );
        Ok(index)
    }

    /// Build an index directly from parts (tests and the indexer).
    pub fn from_parts(
        dim: usize,
        rows: Vec<Vec<f32>>,
        metadata: Vec<ChunkMeta>,
    ) -> Result<Self, TutorError> {
        if rows.len() != metadata.len() {
            return Err(TutorError::IndexUnavailable(format!(
                "metadata misaligned: {} records for {} vectors",
                metadata.len(),
                rows.len()
            )));
        }
        if rows.iter().any(|r| r.len() != dim) {
            return Err(TutorError::IndexUnavailable(
                "row dimension mismatch".to_string(),
            ));
        }

        let mut index = Self {
            dim,
            vectors: rows.into_iter().flatten().collect(),
            metadata,
        };
        index.normalize_rows();
        Ok(index)
    }

    /// Serialize vectors + metadata in the on-disk layout. Used by the
    /// indexer and by tests building fixture files.
    pub fn write_files(
        index_path: &Path,
        metadata_path: &Path,
        dim: usize,
        rows: &[Vec<f32>],
        metadata: &[ChunkMeta],
    ) -> Result<(), TutorError> {
        let mut bytes = Vec::with_capacity(8 + rows.len() * dim * 4);
        bytes.extend_from_slice(&(rows.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(dim as u32).to_le_bytes());
        for row in rows {
            for v in row {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        std::fs::write(index_path, bytes)?;
        std::fs::write(metadata_path, serde_json::to_string_pretty(metadata)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn meta(&self, i: usize) -> &ChunkMeta {
        &self.metadata[i]
    }

    /// Cosine top-k: `(row index, similarity)` in descending similarity.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dim || k == 0 || self.is_empty() {
            return Vec::new();
        }

        let norm = dot(query, query).sqrt();
        if norm == 0.0 {
            return Vec::new();
        }
        let query: Vec<f32> = query.iter().map(|v| v / norm).collect();

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|i| {
                let row = &self.vectors[i * self.dim..(i + 1) * self.dim];
                (i, dot(&query, row))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn normalize_rows(&mut self) {
        for row in self.vectors.chunks_exact_mut(self.dim) {
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in row.iter_mut() {
                    *v /= norm;
                }
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ── Tests ─────────────────────────────────────────────────────────────────
