//! Persistent similarity index over embedded policy chunks.
//!
//! The whole index lives in a single `index.json` inside the index directory:
//! a manifest describing how it was built, the serialized embedder, and every
//! chunk with its vector. Search is exhaustive cosine similarity, which is
//! plenty for a handful of policy PDFs.

use crate::config::{EmbeddingBackend, RagConfig};
use crate::document_processor::{pdf_paths, DocumentProcessor};
use crate::embedding_service::{
    cosine_similarity, EmbeddingDescriptor, EmbeddingService, EmbeddingState,
};
use crate::models::{DocumentChunk, ScoredChunk};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

pub const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedding: EmbeddingDescriptor,
    pub created_at: DateTime<Utc>,
    /// Describes the source PDFs and chunking settings the index was built
    /// from; a mismatch means the index is stale.
    pub source_fingerprint: Option<String>,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk: DocumentChunk,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    manifest: &'a IndexManifest,
    embedder: EmbeddingState,
    entries: &'a [IndexEntry],
}

#[derive(Deserialize)]
struct IndexFile {
    manifest: IndexManifest,
    embedder: EmbeddingState,
    entries: Vec<IndexEntry>,
}

pub struct VectorStore {
    embedding: EmbeddingService,
    entries: Vec<IndexEntry>,
    manifest: IndexManifest,
}

impl VectorStore {
    /// Fit the embedder on the chunks and embed every one of them.
    pub fn from_chunks(chunks: Vec<DocumentChunk>, mut embedding: EmbeddingService) -> Result<Self> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        embedding.fit(&texts);
        let vectors = embedding.embed_documents(&texts)?;

        if vectors.len() != chunks.len() {
            bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            embedding: embedding.descriptor(),
            created_at: Utc::now(),
            source_fingerprint: None,
            chunk_count: entries.len(),
        };

        log::info!("Built vector index with {} chunks", entries.len());
        Ok(Self {
            embedding,
            entries,
            manifest,
        })
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.manifest.source_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &DocumentChunk> {
        self.entries.iter().map(|entry| &entry.chunk)
    }

    pub fn save_local(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create index directory {}", dir.display()))?;

        let file = IndexFileRef {
            manifest: &self.manifest,
            embedder: self.embedding.state(),
            entries: &self.entries,
        };
        let json = serde_json::to_vec(&file).context("failed to serialize vector index")?;

        // Write next to the target and rename so readers never see a torn file.
        let target = dir.join(INDEX_FILE);
        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &target)
            .with_context(|| format!("failed to move index into {}", target.display()))?;

        log::info!("Saved vector index to {}", target.display());
        Ok(())
    }

    pub fn load_local(dir: &Path) -> Result<Self> {
        let path = dir.join(INDEX_FILE);
        let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let file: IndexFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        if file.manifest.format_version != FORMAT_VERSION {
            bail!(
                "index format version {} is not supported (expected {})",
                file.manifest.format_version,
                FORMAT_VERSION
            );
        }

        let embedding = EmbeddingService::from_state(file.embedder)?;
        log::info!(
            "Loaded vector index with {} chunks from {}",
            file.entries.len(),
            path.display()
        );

        Ok(Self {
            embedding,
            entries: file.entries,
            manifest: file.manifest,
        })
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(INDEX_FILE).is_file()
    }

    /// Reload the persisted index when it is present and current, otherwise
    /// rebuild it from the policy PDFs and save it.
    pub fn load_or_build(config: &RagConfig, force_rebuild: bool) -> Result<Self> {
        let fingerprint = source_fingerprint(config);

        if !force_rebuild && Self::exists(&config.index_dir) {
            match Self::load_local(&config.index_dir) {
                Ok(store) => match store.staleness(config, fingerprint.as_ref().ok()) {
                    None => return Ok(store),
                    Some(reason) => log::warn!("Rebuilding vector index: {}", reason),
                },
                Err(e) => log::warn!("Could not load existing index, rebuilding: {:#}", e),
            }
        }

        let fingerprint = fingerprint?;
        let processor = DocumentProcessor::new(config.chunk_size, config.chunk_overlap)?;
        let chunks = processor.process_documents(&config.documents_path)?;
        if chunks.is_empty() {
            bail!(
                "no text could be extracted from {}",
                config.documents_path.display()
            );
        }

        let embedding = EmbeddingService::new(config.embedding_backend)?;
        let store = Self::from_chunks(chunks, embedding)?.with_fingerprint(fingerprint);
        store.save_local(&config.index_dir)?;
        Ok(store)
    }

    fn staleness(&self, config: &RagConfig, fingerprint: Option<&String>) -> Option<String> {
        if self.embedding.backend() != config.embedding_backend {
            return Some(format!(
                "built with {} embeddings but {:?} is configured",
                self.manifest.embedding.backend, config.embedding_backend
            ));
        }
        match (fingerprint, &self.manifest.source_fingerprint) {
            (Some(current), Some(stored)) if current != stored => {
                Some("policy documents or chunking settings changed".to_string())
            }
            // The PDFs being unavailable is not a reason to drop a good index.
            _ => None,
        }
    }

    pub fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedding.embed_query(query)?;
        Ok(self.similarity_search_by_vector(&query_embedding, k))
    }

    /// Top-`k` chunks by cosine similarity, best first; equal scores keep
    /// index order.
    pub fn similarity_search_by_vector(&self, query_embedding: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (idx, cosine_similarity(query_embedding, &entry.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .map(|(idx, score)| ScoredChunk {
                chunk: self.entries[idx].chunk.clone(),
                score,
            })
            .collect()
    }

    pub fn embedding_backend(&self) -> EmbeddingBackend {
        self.embedding.backend()
    }
}

/// Summarise the source PDFs (name, size, mtime) and chunking settings.
pub fn source_fingerprint(config: &RagConfig) -> Result<String> {
    let mut parts = vec![format!(
        "chunk={}/{}",
        config.chunk_size, config.chunk_overlap
    )];

    for pdf in pdf_paths(&config.documents_path)? {
        let meta = fs::metadata(&pdf).with_context(|| format!("failed to stat {}", pdf.display()))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let name = pdf
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        parts.push(format!("{}:{}:{}", name, meta.len(), modified));
    }

    Ok(parts.join(";"))
}
