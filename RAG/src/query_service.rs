use crate::config::RagConfig;
use crate::llm_service::LlmService;
use crate::memory::ConversationMemory;
use crate::models::*;
use crate::prompt::{build_context, PromptTemplate};
use crate::retriever::Retriever;
use crate::vector_store::VectorStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

const EXCERPT_GRAPHEMES: usize = 200;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question must not be empty")]
    EmptyQuestion,
}

/// Retrieval-augmented QA chain: retrieve, stuff into the prompt, generate.
pub struct QueryService {
    retriever: Retriever,
    llm: LlmService,
    prompt: PromptTemplate,
    condense_prompt: PromptTemplate,
    memory: Option<ConversationMemory>,
}

impl QueryService {
    pub fn new(retriever: Retriever, llm: LlmService, prompt: PromptTemplate) -> Self {
        Self {
            retriever,
            llm,
            prompt,
            condense_prompt: PromptTemplate::condense(),
            memory: None,
        }
    }

    pub fn with_memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Load (or build and persist) the index, then wire the retriever, the
    /// hosted model and the configured prompt together.
    pub async fn from_config(config: &RagConfig) -> Result<Self> {
        log::info!("Initializing QA chain...");

        let llm = LlmService::new(config.llm.clone())?;
        let store = Self::load_index(config, false).await?;

        let retriever = Retriever::new(store, config.retriever_k);
        let prompt = PromptTemplate::for_style(config.prompt_style, &config.company_name);
        let mut service = Self::new(retriever, llm, prompt);
        if config.conversational {
            service = service.with_memory(ConversationMemory::new(config.memory_turns));
        }

        log::info!(
            "QA chain ready: {} chunks, {} / {}, conversational={}",
            service.indexed_chunks(),
            service.llm.provider(),
            service.llm.model(),
            service.is_conversational()
        );
        Ok(service)
    }

    /// PDF parsing and embedding are CPU bound, so they run off the runtime.
    pub async fn load_index(config: &RagConfig, force_rebuild: bool) -> Result<Arc<VectorStore>> {
        let config = config.clone();
        let store = tokio::task::spawn_blocking(move || {
            VectorStore::load_or_build(&config, force_rebuild)
        })
        .await
        .context("index build task panicked")??;
        Ok(Arc::new(store))
    }

    pub fn indexed_chunks(&self) -> usize {
        self.retriever.store().len()
    }

    pub fn is_conversational(&self) -> bool {
        self.memory.is_some()
    }

    /// Answer one turn of a conversation. `history` holds the earlier turns
    /// of the session, oldest first, without the current question.
    pub async fn ask(&self, question: &str, history: &[ChatMessage]) -> Result<QaAnswer> {
        self.answer(question, history, self.retriever.k()).await
    }

    /// Single-turn question with an optional override of how many chunks are
    /// retrieved.
    pub async fn query(&self, question: &str, max_results: Option<usize>) -> Result<QaAnswer> {
        let k = max_results.filter(|k| *k > 0).unwrap_or(self.retriever.k());
        self.answer(question, &[], k).await
    }

    async fn answer(&self, question: &str, history: &[ChatMessage], k: usize) -> Result<QaAnswer> {
        let start_time = std::time::Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion.into());
        }

        let standalone_question = match self.memory {
            Some(memory) if !memory.recent(history).is_empty() => {
                self.condense_question(&memory, question, history).await?
            }
            _ => question.to_string(),
        };

        let relevant_chunks = self.retriever.retrieve_k(&standalone_question, k)?;

        let context = build_context(&relevant_chunks);
        let prompt = self
            .prompt
            .format(&[
                ("context", context.as_str()),
                ("question", standalone_question.as_str()),
            ])?;
        let answer = self.llm.generate(&prompt).await?;

        let sources = create_citations(&relevant_chunks);
        let processing_time_ms = start_time.elapsed().as_millis();
        log::info!(
            "Answered question in {} ms using {} chunks",
            processing_time_ms,
            sources.len()
        );

        Ok(QaAnswer {
            answer,
            standalone_question,
            sources,
            processing_time_ms,
        })
    }

    async fn condense_question(
        &self,
        memory: &ConversationMemory,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<String> {
        let chat_history = memory.render(history);
        let prompt = self
            .condense_prompt
            .format(&[("chat_history", chat_history.as_str()), ("question", question)])?;

        let condensed = self.llm.generate(&prompt).await?;
        let condensed = condensed.lines().next().unwrap_or("").trim();
        if condensed.is_empty() {
            Ok(question.to_string())
        } else {
            log::debug!("Condensed follow-up '{}' into '{}'", question, condensed);
            Ok(condensed.to_string())
        }
    }
}

fn create_citations(chunks: &[ScoredChunk]) -> Vec<Citation> {
    chunks
        .iter()
        .map(|scored| Citation {
            document: scored.chunk.source.clone(),
            page: scored.chunk.page,
            text_excerpt: excerpt(&scored.chunk.content),
            confidence_score: scored.score,
        })
        .collect()
}

fn excerpt(content: &str) -> String {
    let mut graphemes = content.graphemes(true);
    let head: String = graphemes.by_ref().take(EXCERPT_GRAPHEMES).collect();
    if graphemes.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
