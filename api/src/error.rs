use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use policy_rag::{LlmError, QueryError};
use thiserror::Error;

use crate::rag_response::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("language model unavailable: {0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(query_error) = err.downcast_ref::<QueryError>() {
            return ApiError::BadRequest(query_error.to_string());
        }
        if let Some(llm_error) = err.downcast_ref::<LlmError>() {
            return ApiError::Upstream(llm_error.to_string());
        }
        ApiError::Internal(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(err) => {
                log::error!("Internal error: {:#}", err);
                "internal error".to_string()
            }
            ApiError::Upstream(detail) => {
                log::error!("LLM call failed: {}", detail);
                self.to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            status: "error".to_string(),
            error: message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_rag::LlmProvider;

    #[test]
    fn test_query_error_maps_to_bad_request() {
        let err: ApiError = anyhow::Error::from(QueryError::EmptyQuestion).into();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_llm_error_maps_to_bad_gateway() {
        let err: ApiError = anyhow::Error::from(LlmError::EmptyResponse {
            provider: LlmProvider::Groq,
        })
        .into();
        assert!(matches!(err, ApiError::Upstream(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_other_errors_are_internal() {
        let err: ApiError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::SessionNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
