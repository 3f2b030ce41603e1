pub mod config;
pub mod document_processor;
pub mod embedding_service;
pub mod llm_service;
pub mod memory;
#[cfg(feature = "minilm")]
pub mod minilm;
pub mod models;
pub mod prompt;
pub mod query_service;
pub mod retriever;
pub mod text_splitter;
pub mod vector_store;

pub use config::{EmbeddingBackend, LlmConfig, PromptStyle, RagConfig};
pub use document_processor::DocumentProcessor;
pub use embedding_service::EmbeddingService;
pub use llm_service::{LlmError, LlmProvider, LlmService};
pub use memory::ConversationMemory;
pub use models::*;
pub use prompt::PromptTemplate;
pub use query_service::{QueryError, QueryService};
pub use retriever::Retriever;
pub use text_splitter::RecursiveCharacterTextSplitter;
pub use vector_store::VectorStore;
