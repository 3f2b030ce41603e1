use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::llm_service::LlmProvider;

pub const DEFAULT_COMPANY_NAME: &str = "Prakash Software Solutions Pvt. Ltd.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Tfidf,
    MiniLm,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "tfidf" | "tf-idf" => Ok(Self::Tfidf),
            "minilm" | "all-minilm-l6-v2" => Ok(Self::MiniLm),
            other => Err(anyhow!("unknown embedding backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    Basic,
    Cited,
}

impl FromStr for PromptStyle {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "cited" => Ok(Self::Cited),
            other => Err(anyhow!("unknown prompt style '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key: String,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let provider = LlmProvider::Groq;
        Self {
            provider,
            model: provider.default_model().to_string(),
            temperature: 0.1,
            max_tokens: 1024,
            api_key: String::new(),
            base_url: provider.default_base_url().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub documents_path: PathBuf,
    pub index_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retriever_k: usize,
    pub embedding_backend: EmbeddingBackend,
    pub llm: LlmConfig,
    pub prompt_style: PromptStyle,
    pub company_name: String,
    pub conversational: bool,
    pub memory_turns: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            documents_path: PathBuf::from("data"),
            index_dir: PathBuf::from("policy_index"),
            chunk_size: 1000,
            chunk_overlap: 200,
            retriever_k: 4,
            embedding_backend: EmbeddingBackend::Tfidf,
            llm: LlmConfig::default(),
            prompt_style: PromptStyle::Cited,
            company_name: DEFAULT_COMPANY_NAME.to_string(),
            conversational: false,
            memory_turns: 5,
        }
    }
}

impl RagConfig {
    /// Build the configuration from the process environment, reading `.env`
    /// first when present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let provider = match lookup("LLM_PROVIDER") {
            Some(value) => value.parse::<LlmProvider>()?,
            None => LlmProvider::Groq,
        };
        let api_key = lookup(provider.api_key_var()).unwrap_or_default();
        if api_key.trim().is_empty() {
            log::warn!(
                "{} is not set; answering questions will fail until it is",
                provider.api_key_var()
            );
        }

        let llm = LlmConfig {
            provider,
            model: lookup("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            temperature: parse_or(&lookup, "LLM_TEMPERATURE", defaults.llm.temperature)?,
            max_tokens: parse_or(&lookup, "LLM_MAX_TOKENS", defaults.llm.max_tokens)?,
            api_key,
            base_url: lookup("LLM_BASE_URL")
                .unwrap_or_else(|| provider.default_base_url().to_string()),
        };

        let config = Self {
            documents_path: lookup("POLICY_DOCUMENTS")
                .map(PathBuf::from)
                .unwrap_or(defaults.documents_path),
            index_dir: lookup("INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_dir),
            chunk_size: parse_or(&lookup, "CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_or(&lookup, "CHUNK_OVERLAP", defaults.chunk_overlap)?,
            retriever_k: parse_or(&lookup, "RETRIEVER_K", defaults.retriever_k)?,
            embedding_backend: parse_or(&lookup, "EMBEDDING_BACKEND", defaults.embedding_backend)?,
            llm,
            prompt_style: parse_or(&lookup, "PROMPT_STYLE", defaults.prompt_style)?,
            company_name: lookup("COMPANY_NAME").unwrap_or(defaults.company_name),
            conversational: parse_bool(&lookup, "CONVERSATIONAL", defaults.conversational)?,
            memory_turns: parse_or(&lookup, "MEMORY_TURNS", defaults.memory_turns)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("CHUNK_SIZE must be greater than zero");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        if self.retriever_k == 0 {
            bail!("RETRIEVER_K must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("LLM_TEMPERATURE must be between 0.0 and 2.0");
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("invalid value for {}: '{}'", key, v)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = RagConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.retriever_k, 4);
        assert_eq!(config.llm.provider, LlmProvider::Groq);
        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(config.prompt_style, PromptStyle::Cited);
        assert!(!config.conversational);
    }

    #[test]
    fn test_gemini_provider_picks_its_own_defaults() {
        let config = RagConfig::from_lookup(lookup_from(&[
            ("LLM_PROVIDER", "gemini"),
            ("GEMINI_API_KEY", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Gemini);
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        assert_eq!(config.llm.api_key, "secret");
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = RagConfig::from_lookup(lookup_from(&[
            ("CHUNK_SIZE", "500"),
            ("CHUNK_OVERLAP", "50"),
            ("RETRIEVER_K", "6"),
            ("CONVERSATIONAL", "yes"),
            ("PROMPT_STYLE", "basic"),
            ("INDEX_DIR", "/tmp/idx"),
        ]))
        .unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.retriever_k, 6);
        assert!(config.conversational);
        assert_eq!(config.prompt_style, PromptStyle::Basic);
        assert_eq!(config.index_dir, PathBuf::from("/tmp/idx"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let err = RagConfig::from_lookup(lookup_from(&[
            ("CHUNK_SIZE", "100"),
            ("CHUNK_OVERLAP", "100"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CHUNK_OVERLAP"));
    }

    #[test]
    fn test_rejects_garbage_numbers_and_names() {
        assert!(RagConfig::from_lookup(lookup_from(&[("RETRIEVER_K", "many")])).is_err());
        assert!(RagConfig::from_lookup(lookup_from(&[("RETRIEVER_K", "0")])).is_err());
        assert!(RagConfig::from_lookup(lookup_from(&[("LLM_PROVIDER", "openai")])).is_err());
        assert!(RagConfig::from_lookup(lookup_from(&[("CONVERSATIONAL", "maybe")])).is_err());
    }
}
