use crate::models::ScoredChunk;
use crate::vector_store::VectorStore;
use anyhow::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct Retriever {
    store: Arc<VectorStore>,
    k: usize,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, k: usize) -> Self {
        Self { store, k: k.max(1) }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        self.retrieve_k(query, self.k)
    }

    pub fn retrieve_k(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let chunks = self.store.similarity_search(query, k)?;
        log::info!("Found {} relevant chunks", chunks.len());
        Ok(chunks)
    }
}
