use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use policy_rag::QueryService;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::ApiError;
use crate::query_payload::{ChatPayload, CreateSessionPayload, QueryPayload, SessionLookup};
use crate::rag_response::{ChatResponse, HealthResponse, QueryResponse, SessionResponse};
use crate::session::{ChatSession, SessionRegistry, SharedSession};
use crate::transcript::TranscriptStore;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_CHAT_LOG_DIR: &str = "chat_logs";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub chat_log_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse()
            .with_context(|| format!("BIND_ADDR '{}' is not a socket address", bind_addr))?;
        let chat_log_dir = lookup("CHAT_LOG_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CHAT_LOG_DIR.to_string());

        Ok(Self {
            bind_addr,
            chat_log_dir: PathBuf::from(chat_log_dir),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub qa: Arc<QueryService>,
    pub sessions: Arc<SessionRegistry>,
    pub transcripts: Arc<dyn TranscriptStore>,
}

impl AppState {
    pub fn new(qa: QueryService, transcripts: Arc<dyn TranscriptStore>) -> Self {
        Self {
            qa: Arc::new(qa),
            sessions: Arc::new(SessionRegistry::new()),
            transcripts,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/messages", post(post_message))
        .route("/query", post(query))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index_page() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        indexed_chunks: state.qa.indexed_chunks(),
        conversational: state.qa.is_conversational(),
    })
}

async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    // A bare POST without a JSON body starts an anonymous session.
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(JsonRejection::MissingJsonContentType(_)) => CreateSessionPayload::default(),
        Err(rejection) => return Err(rejection.into()),
    };
    let session = ChatSession::new(payload.user_id.as_deref());
    log::info!(
        "Started session {} for {}",
        session.session_id,
        session.user_id
    );

    let response = SessionResponse::from(session.clone());
    state.sessions.insert(session).await;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_session(
    State(state): State<AppState>,
    AxumPath(session_id): AxumPath<String>,
    Query(lookup): Query<SessionLookup>,
) -> Result<Json<SessionResponse>, ApiError> {
    let shared = find_session(&state, &session_id, lookup.user_id.as_deref()).await?;
    let session = shared.lock().await.clone();
    Ok(Json(SessionResponse::from(session)))
}

async fn post_message(
    State(state): State<AppState>,
    AxumPath(session_id): AxumPath<String>,
    payload: Result<Json<ChatPayload>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(payload) = payload?;
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let shared = find_session(&state, &session_id, None).await?;
    // Held for the whole turn so a session's turns run one at a time.
    let mut session = shared.lock().await;

    let answer = state.qa.ask(content, &session.messages).await?;
    session.push_turn(content, &answer.answer);

    let snapshot = session.clone();
    persist(&state, snapshot.clone()).await;

    Ok(Json(ChatResponse {
        session_id: snapshot.session_id,
        answer: answer.answer,
        sources: answer.sources,
        messages: snapshot.messages,
        processing_time_ms: answer.processing_time_ms,
    }))
}

async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryPayload>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(payload) = payload?;
    log::info!("Query: {}", payload.query);

    let answer = state.qa.query(&payload.query, payload.max_results).await?;

    Ok(Json(QueryResponse {
        status: "success".to_string(),
        response: answer.answer,
        citations: answer.sources,
        processing_time_ms: answer.processing_time_ms,
    }))
}

/// Live sessions first, then transcripts left by an earlier run. Knowing the
/// owner lets the store open the transcript directly instead of scanning.
async fn find_session(
    state: &AppState,
    session_id: &str,
    user_id: Option<&str>,
) -> Result<SharedSession, ApiError> {
    if let Some(shared) = state.sessions.get(session_id).await {
        return Ok(shared);
    }

    let store = Arc::clone(&state.transcripts);
    let id = session_id.to_string();
    let user = user_id.map(str::to_string);
    let stored = tokio::task::spawn_blocking(move || match user {
        Some(user) => store.load(&user, &id),
        None => store.find(&id),
    })
        .await
        .context("transcript lookup task panicked")??;

    match stored {
        Some(transcript) => {
            log::info!("Restored session {} from its transcript", session_id);
            state
                .sessions
                .get_or_restore(session_id, || Some(transcript))
                .await
                .ok_or_else(|| ApiError::SessionNotFound(session_id.to_string()))
        }
        None => Err(ApiError::SessionNotFound(session_id.to_string())),
    }
}

/// Losing a transcript write must not cost the user their answer.
async fn persist(state: &AppState, session: ChatSession) {
    let store = Arc::clone(&state.transcripts);
    let session_id = session.session_id.clone();
    let result = tokio::task::spawn_blocking(move || store.save(&session)).await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Failed to save transcript for {}: {:#}", session_id, e),
        Err(e) => log::warn!("Transcript task for {} failed: {}", session_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::MemoryTranscriptStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use policy_rag::config::{EmbeddingBackend, LlmConfig, PromptStyle};
    use policy_rag::{
        ConversationMemory, DocumentChunk, EmbeddingService, LlmProvider, LlmService,
        PromptTemplate, Retriever, VectorStore,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunk(idx: usize, page: u32, content: &str) -> DocumentChunk {
        DocumentChunk {
            id: format!("chunk-{}", idx),
            source: "hr_policy.pdf".to_string(),
            page,
            chunk_index: idx,
            content: content.to_string(),
            start_position: 0,
            end_position: content.chars().count(),
        }
    }

    fn qa_service(server: &MockServer) -> QueryService {
        let chunks = vec![
            chunk(0, 3, "Employees are entitled to eighteen days of paid annual leave."),
            chunk(1, 7, "The notice period for confirmed employees is two months."),
            chunk(2, 11, "Work from home requires prior approval from the reporting manager."),
        ];
        let embedding = EmbeddingService::new(EmbeddingBackend::Tfidf).unwrap();
        let store = Arc::new(VectorStore::from_chunks(chunks, embedding).unwrap());
        let llm = LlmService::new(LlmConfig {
            provider: LlmProvider::Groq,
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.1,
            max_tokens: 256,
            api_key: "test-key".to_string(),
            base_url: server.uri(),
        })
        .unwrap();

        QueryService::new(
            Retriever::new(store, 2),
            llm,
            PromptTemplate::for_style(PromptStyle::Cited, "Acme"),
        )
        .with_memory(ConversationMemory::new(5))
    }

    async fn mock_answer(server: &MockServer, text: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": text}}]
            })))
            .mount(server)
            .await;
    }

    fn state(server: &MockServer) -> (AppState, Arc<MemoryTranscriptStore>) {
        let store = Arc::new(MemoryTranscriptStore::new());
        let state = AppState::new(qa_service(server), store.clone());
        (state, store)
    }

    async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = build_router(state.clone())
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn new_session(state: &AppState, user: &str) -> String {
        let (status, body) = send(state, "POST", "/sessions", Some(json!({"user_id": user}))).await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_server_config_defaults_and_overrides() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(config.chat_log_dir, PathBuf::from("chat_logs"));

        let env: HashMap<&str, &str> =
            [("BIND_ADDR", "127.0.0.1:8080"), ("CHAT_LOG_DIR", "/tmp/logs")].into();
        let config = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.chat_log_dir, PathBuf::from("/tmp/logs"));

        assert!(ServerConfig::from_lookup(|_| Some("nowhere".to_string())).is_err());
    }

    #[tokio::test]
    async fn test_health_reports_index_size() {
        let server = MockServer::start().await;
        let (state, _) = state(&server);

        let (status, body) = send(&state, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["indexed_chunks"], 3);
        assert_eq!(body["conversational"], true);
    }

    #[tokio::test]
    async fn test_index_page_is_served() {
        let server = MockServer::start().await;
        let (state, _) = state(&server);

        let response = build_router(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("<form"));
    }

    #[tokio::test]
    async fn test_create_session_without_body_is_anonymous() {
        let server = MockServer::start().await;
        let (state, _) = state(&server);

        let (status, body) = send(&state, "POST", "/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user_id"], "anonymous");
        assert_eq!(body["messages"], json!([]));
    }

    #[tokio::test]
    async fn test_chat_turn_answers_and_persists_transcript() {
        let server = MockServer::start().await;
        mock_answer(&server, "You get eighteen days. For more information, refer to page 3.").await;
        let (state, store) = state(&server);
        let session_id = new_session(&state, "emp042").await;

        let uri = format!("/sessions/{}/messages", session_id);
        let (status, body) = send(
            &state,
            "POST",
            &uri,
            Some(json!({"content": "How much annual leave do I get?"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["answer"].as_str().unwrap().contains("eighteen days"));
        assert_eq!(body["sources"][0]["page"], 3);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "assistant");

        let saved = store.find(&session_id).unwrap().unwrap();
        assert_eq!(saved.user_id, "emp042");
        assert_eq!(saved.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_blank_message_is_bad_request() {
        let server = MockServer::start().await;
        let (state, store) = state(&server);
        let session_id = new_session(&state, "emp042").await;

        let uri = format!("/sessions/{}/messages", session_id);
        let (status, body) = send(&state, "POST", &uri, Some(json!({"content": "  "}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(store.find(&session_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let server = MockServer::start().await;
        let (state, _) = state(&server);

        let (status, body) = send(&state, "GET", "/sessions/2020-01-01_00-00-00_abcdef", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");

        let (status, _) = send(
            &state,
            "POST",
            "/sessions/2020-01-01_00-00-00_abcdef/messages",
            Some(json!({"content": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_is_restored_from_transcript() {
        let server = MockServer::start().await;
        let (state, store) = state(&server);
        let mut earlier = ChatSession::new(Some("emp042"));
        earlier.push_turn("What is the notice period?", "Two months.");
        store.save(&earlier).unwrap();

        let uri = format!("/sessions/{}", earlier.session_id);
        let (status, body) = send(&state, "GET", &uri, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "emp042");
        assert_eq!(body["messages"][1]["content"], "Two months.");
        assert!(state.sessions.get(&earlier.session_id).await.is_some());
    }

    #[tokio::test]
    async fn test_session_restore_with_owner_uses_direct_load() {
        let server = MockServer::start().await;
        let (state, store) = state(&server);
        let mut earlier = ChatSession::new(Some("emp042"));
        earlier.push_turn("Is there a dress code?", "Business casual.");
        store.save(&earlier).unwrap();

        let uri = format!("/sessions/{}?user_id=someone-else", earlier.session_id);
        let (status, _) = send(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/sessions/{}?user_id=emp042", earlier.session_id);
        let (status, body) = send(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"][1]["content"], "Business casual.");
    }

    #[tokio::test]
    async fn test_llm_failure_is_bad_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("over capacity"))
            .mount(&server)
            .await;
        let (state, store) = state(&server);
        let session_id = new_session(&state, "emp042").await;

        let uri = format!("/sessions/{}/messages", session_id);
        let (status, body) = send(&state, "POST", &uri, Some(json!({"content": "Notice period?"}))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["status"], "error");
        assert!(store.find(&session_id).unwrap().is_none());

        let (_, session) = send(&state, "GET", &format!("/sessions/{}", session_id), None).await;
        assert_eq!(session["messages"], json!([]));
    }

    #[tokio::test]
    async fn test_malformed_body_is_json_bad_request() {
        let server = MockServer::start().await;
        let (state, _) = state(&server);

        let (status, body) = send(&state, "POST", "/query", Some(json!({"q": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(body["error"].as_str().unwrap().contains("query"));

        let session_id = new_session(&state, "emp042").await;
        let uri = format!("/sessions/{}/messages", session_id);
        let (status, body) = send(&state, "POST", &uri, Some(json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let (status, body) = send(&state, "POST", "/sessions", Some(json!({"user_id": 42}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_stateless_query() {
        let server = MockServer::start().await;
        mock_answer(&server, "Two months.").await;
        let (state, _) = state(&server);

        let (status, body) = send(
            &state,
            "POST",
            "/query",
            Some(json!({"query": "What is the notice period?", "max_results": 1})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["response"], "Two months.");
        assert_eq!(body["citations"].as_array().unwrap().len(), 1);
        assert_eq!(body["citations"][0]["page"], 7);

        let (status, _) = send(&state, "POST", "/query", Some(json!({"query": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
