use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct QueryPayload {
    pub query: String,
    pub max_results: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionPayload {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatPayload {
    pub content: String,
}

/// Optional owner hint for `GET /sessions/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct SessionLookup {
    pub user_id: Option<String>,
}
