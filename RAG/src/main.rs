// Command-line companion to the chat server: builds the policy index ahead of
// time and answers one-off questions from the terminal.

use anyhow::Result;
use clap::{Parser, Subcommand};
use policy_rag::{QueryService, RagConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "policy-index", about = "Build and query the HR policy index")]
struct Cli {
    /// PDF file or directory of PDFs (overrides POLICY_DOCUMENTS)
    #[arg(long, global = true)]
    documents: Option<PathBuf>,

    /// Index directory (overrides INDEX_DIR)
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the index, building it from the PDFs when missing or stale
    Build {
        /// Rebuild even if a current index exists
        #[arg(long)]
        force: bool,
    },
    /// Show the chunks retrieved for a query without calling the LLM
    Search {
        /// Chunks to show (defaults to RETRIEVER_K)
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Answer a question with the full QA chain
    Ask {
        #[arg(required = true)]
        question: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut config = RagConfig::from_env()?;
    if let Some(documents) = cli.documents {
        config.documents_path = documents;
    }
    if let Some(index_dir) = cli.index_dir {
        config.index_dir = index_dir;
    }

    match cli.command {
        Command::Build { force } => {
            let store = QueryService::load_index(&config, force).await?;
            let manifest = store.manifest();
            println!(
                "Index at {} holds {} chunks ({} embeddings, {} dimensions, built {})",
                config.index_dir.display(),
                store.len(),
                manifest.embedding.backend,
                manifest.embedding.dimension,
                manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        Command::Search { k, query } => {
            let store = QueryService::load_index(&config, false).await?;
            let k = k.unwrap_or(config.retriever_k);
            for hit in store.similarity_search(&query.join(" "), k)? {
                println!(
                    "[{:.3}] {} p.{}: {}",
                    hit.score,
                    hit.chunk.source,
                    hit.chunk.page,
                    hit.chunk.content.replace('\n', " ")
                );
            }
        }
        Command::Ask { question } => {
            let service = QueryService::from_config(&config).await?;
            let answer = service.query(&question.join(" "), None).await?;
            println!("{}", answer.answer);
            for source in answer.sources {
                println!("  - {} (page {}, score {:.3})", source.document, source.page, source.confidence_score);
            }
        }
    }

    Ok(())
}
