use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Insufficient credits")]
    InsufficientCredits { required: i64 },
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("Upstream service unavailable")]
    Upstream(#[source] anyhow::Error),
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::InvalidSignature | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::InsufficientCredits { .. } => "insufficient_credits",
            ApiError::InvalidSignature => "invalid_signature",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Upstream(_) => "upstream_unavailable",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Upstream(error) | ApiError::Internal(error) => {
                tracing::error!(error = ?error, kind = self.kind(), "request failed");
            }
            _ => {}
        }

        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if let ApiError::InsufficientCredits { required } = &self {
            body["required"] = json!(required);
        }

        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            // Callers that know the cost map this themselves; zero means unknown.
            StoreError::InsufficientCredits => ApiError::InsufficientCredits { required: 0 },
            StoreError::NotFound => ApiError::NotFound("Profile not found."),
            StoreError::Unavailable(inner) => ApiError::Upstream(inner),
        }
    }
}
