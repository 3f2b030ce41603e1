mod app;
mod error;
mod query_payload;
mod rag_response;
mod session;
mod transcript;
mod utils;

use anyhow::Result;
use policy_rag::{QueryService, RagConfig};
use std::sync::Arc;

use crate::app::{build_router, AppState, ServerConfig};
use crate::transcript::FileTranscriptStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let rag_config = RagConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;

    let qa = QueryService::from_config(&rag_config).await?;
    let transcripts = FileTranscriptStore::new(&server_config.chat_log_dir)?;
    log::info!("Writing chat transcripts to {}", transcripts.dir().display());

    let state = AppState::new(qa, Arc::new(transcripts));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(server_config.bind_addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {}", e);
            }
            log::info!("Shutting down");
        })
        .await?;

    Ok(())
}
