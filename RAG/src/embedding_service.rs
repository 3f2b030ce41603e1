use crate::config::EmbeddingBackend;
use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[cfg(feature = "minilm")]
use crate::minilm::MiniLmEncoder;

const VOCABULARY_SIZE: usize = 1000;
const MIN_TOKEN_LEN: usize = 3;

/// Identifies the embedder that produced the vectors of a persisted index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingDescriptor {
    pub backend: String,
    pub model: String,
    pub dimension: usize,
}

/// Serializable form of an embedder, stored next to the vectors so a reloaded
/// index embeds queries exactly the way it embedded its chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum EmbeddingState {
    Tfidf(TfidfModel),
    MiniLm { model_id: String },
}

pub enum EmbeddingService {
    Tfidf(TfidfModel),
    #[cfg(feature = "minilm")]
    MiniLm(MiniLmEncoder),
}

impl EmbeddingService {
    pub fn new(backend: EmbeddingBackend) -> Result<Self> {
        log::info!("Initializing {:?} embedding service...", backend);
        match backend {
            EmbeddingBackend::Tfidf => Ok(Self::Tfidf(TfidfModel::default())),
            #[cfg(feature = "minilm")]
            EmbeddingBackend::MiniLm => Ok(Self::MiniLm(MiniLmEncoder::load_default()?)),
            #[cfg(not(feature = "minilm"))]
            EmbeddingBackend::MiniLm => {
                bail!("the minilm embedding backend requires building with `--features minilm`")
            }
        }
    }

    pub fn from_state(state: EmbeddingState) -> Result<Self> {
        match state {
            EmbeddingState::Tfidf(model) => Ok(Self::Tfidf(model)),
            #[cfg(feature = "minilm")]
            EmbeddingState::MiniLm { model_id } => Ok(Self::MiniLm(MiniLmEncoder::load(&model_id)?)),
            #[cfg(not(feature = "minilm"))]
            EmbeddingState::MiniLm { model_id } => bail!(
                "index was built with {} but the minilm feature is disabled",
                model_id
            ),
        }
    }

    pub fn state(&self) -> EmbeddingState {
        match self {
            Self::Tfidf(model) => EmbeddingState::Tfidf(model.clone()),
            #[cfg(feature = "minilm")]
            Self::MiniLm(encoder) => EmbeddingState::MiniLm {
                model_id: encoder.model_id().to_string(),
            },
        }
    }

    pub fn backend(&self) -> EmbeddingBackend {
        match self {
            Self::Tfidf(_) => EmbeddingBackend::Tfidf,
            #[cfg(feature = "minilm")]
            Self::MiniLm(_) => EmbeddingBackend::MiniLm,
        }
    }

    pub fn descriptor(&self) -> EmbeddingDescriptor {
        match self {
            Self::Tfidf(model) => EmbeddingDescriptor {
                backend: "tfidf".to_string(),
                model: format!("tfidf-top{}", VOCABULARY_SIZE),
                dimension: model.dimension(),
            },
            #[cfg(feature = "minilm")]
            Self::MiniLm(encoder) => EmbeddingDescriptor {
                backend: "minilm".to_string(),
                model: encoder.model_id().to_string(),
                dimension: encoder.dimension(),
            },
        }
    }

    pub fn dimension(&self) -> usize {
        self.descriptor().dimension
    }

    /// Prepare the embedder for a corpus. Only the TF-IDF backend learns
    /// anything here; pretrained models ignore the call.
    pub fn fit(&mut self, texts: &[&str]) {
        match self {
            Self::Tfidf(model) => model.fit(texts),
            #[cfg(feature = "minilm")]
            Self::MiniLm(_) => {}
        }
    }

    pub fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        log::info!("Generating embeddings for {} chunks...", texts.len());
        match self {
            Self::Tfidf(model) => model.embed_batch(texts),
            #[cfg(feature = "minilm")]
            Self::MiniLm(encoder) => encoder.embed_batch(texts),
        }
    }

    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        match self {
            Self::Tfidf(model) => model.embed(query),
            #[cfg(feature = "minilm")]
            Self::MiniLm(encoder) => encoder.embed(query),
        }
    }
}

/// Term-frequency / inverse-document-frequency vectors over the most frequent
/// terms of the indexed chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TfidfModel {
    vocabulary: HashMap<String, usize>,
    idf_scores: HashMap<String, f32>,
    /// A corpus without a single usable token still fits, to an empty
    /// vocabulary.
    #[serde(default)]
    fitted: bool,
}

impl TfidfModel {
    pub fn is_fitted(&self) -> bool {
        self.fitted || !self.vocabulary.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn fit(&mut self, texts: &[&str]) {
        let mut word_counts: HashMap<String, usize> = HashMap::new();
        let mut doc_frequencies: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let words = tokenize(text);
            let unique_words: HashSet<&String> = words.iter().collect();

            for word in unique_words {
                *doc_frequencies.entry(word.clone()).or_insert(0) += 1;
            }
            for word in words {
                *word_counts.entry(word).or_insert(0) += 1;
            }
        }

        // Smoothed so that a term present in every chunk still carries weight.
        let total_docs = texts.len() as f32;
        self.idf_scores = doc_frequencies
            .iter()
            .map(|(word, df)| {
                let idf = ((1.0 + total_docs) / (1.0 + *df as f32)).ln() + 1.0;
                (word.clone(), idf)
            })
            .collect();

        let mut word_freq_pairs: Vec<(String, usize)> = word_counts.into_iter().collect();
        word_freq_pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        self.vocabulary = word_freq_pairs
            .into_iter()
            .take(VOCABULARY_SIZE)
            .enumerate()
            .map(|(idx, (word, _))| (word, idx))
            .collect();
        self.fitted = true;

        log::info!(
            "Fitted TF-IDF vocabulary of {} terms over {} chunks",
            self.vocabulary.len(),
            texts.len()
        );
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.ensure_fitted()?;
        Ok(texts.par_iter().map(|text| self.vectorize(text)).collect())
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.ensure_fitted()?;
        Ok(self.vectorize(text))
    }

    fn ensure_fitted(&self) -> Result<()> {
        if !self.is_fitted() {
            bail!("TF-IDF model has no vocabulary; build the index before embedding");
        }
        Ok(())
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0; self.vocabulary.len()];
        let words = tokenize(text);
        if words.is_empty() || embedding.is_empty() {
            return embedding;
        }
        let total_words = words.len() as f32;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *counts.entry(word.as_str()).or_insert(0) += 1;
        }

        for (word, count) in counts {
            if let Some(&idx) = self.vocabulary.get(word) {
                let tf = count as f32 / total_words;
                let idf = self.idf_scores.get(word).copied().unwrap_or(1.0);
                embedding[idx] = tf * idf;
            }
        }

        normalize(&mut embedding);
        embedding
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|word| word.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|word| word.chars().count() >= MIN_TOKEN_LEN)
        .collect()
}

pub(crate) fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let min_len = a.len().min(b.len());

    let dot_product: f32 = a[..min_len].iter().zip(&b[..min_len]).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a[..min_len].iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b[..min_len].iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
