use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::server::services::{
    analyst::AnalysisError, cache::CacheError, files::FileStoreError, llm::LlmError,
    token::TokenError, upstream::UpstreamError,
};

/// Top-level request failure, mapped onto the HTTP surface.
///
/// Every handler returns `Result<_, ApiError>`; the response body is always
/// `{"detail": "..."}` with a kind-specific human-readable message and never
/// internal stack detail.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("unknown interface: {0}")]
    UnknownInterface(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("upstream request timed out")]
    UpstreamTimeout,
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("result exceeds the size limit")]
    ResultTooLarge,
    #[error("cache I/O failure")]
    CacheIo(String),
    #[error("filename escapes the user directory")]
    PathViolation,
    #[error("file exceeds the 10 MiB limit")]
    TooLarge,
    #[error("{0} not found")]
    NotFound(String),
    #[error("could not parse file: {0}")]
    Parse(String),
    #[error("analysis model unreachable")]
    ModelUnreachable(String),
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::UnknownInterface(_)
            | ApiError::InvalidParameters(_)
            | ApiError::PathViolation
            | ApiError::Parse(_) => StatusCode::BAD_REQUEST,
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Upstream(_) | ApiError::ModelUnreachable(_) => StatusCode::BAD_GATEWAY,
            ApiError::ResultTooLarge | ApiError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::CacheIo(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The user-visible message. Internal variants carry context for the
    /// logs but render a generic line.
    fn detail(&self) -> String {
        match self {
            ApiError::CacheIo(_) => "storage failure, please retry".to_string(),
            ApiError::Internal(_) => "internal error".to_string(),
            ApiError::ModelUnreachable(_) => "analysis model is unreachable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::CacheIo(context) | ApiError::Internal(context) => {
                tracing::error!(%status, %context, "request failed");
            }
            ApiError::ModelUnreachable(context) => {
                tracing::warn!(%status, %context, "model unreachable");
            }
            other => {
                tracing::debug!(%status, error = %other, "request rejected");
            }
        }

        let body = Json(json!({ "detail": self.detail() }));
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        // Coarse on purpose: the caller learns the token was refused, not
        // which of malformed/bad-signature/expired applied.
        match err {
            TokenError::Expired => ApiError::Unauthorized("token expired".to_string()),
            TokenError::Malformed | TokenError::BadSignature => {
                ApiError::Unauthorized("invalid token".to_string())
            }
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::UnknownInterface(name) => ApiError::UnknownInterface(name),
            UpstreamError::InvalidParameters(detail) => ApiError::InvalidParameters(detail),
            UpstreamError::Timeout => ApiError::UpstreamTimeout,
            UpstreamError::ResultTooLarge { .. } => ApiError::ResultTooLarge,
            UpstreamError::Status { status, .. } => {
                ApiError::Upstream(format!("upstream returned {status}"))
            }
            UpstreamError::Transport(detail) | UpstreamError::Decode(detail) => {
                ApiError::Upstream(detail)
            }
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Upstream(inner) => inner.into(),
            CacheError::Io(io) => ApiError::CacheIo(io.to_string()),
        }
    }
}

impl From<FileStoreError> for ApiError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::PathViolation => ApiError::PathViolation,
            FileStoreError::TooLarge => ApiError::TooLarge,
            FileStoreError::NotFound(name) => ApiError::NotFound(name),
            FileStoreError::Parse(detail) => ApiError::Parse(detail),
            FileStoreError::Io(io) => ApiError::Internal(io.to_string()),
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Unreachable(detail) => ApiError::ModelUnreachable(detail),
            LlmError::Api(detail) => ApiError::Upstream(detail),
            LlmError::Parse(detail) => ApiError::Upstream(detail),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        // Both the model and the degraded path failed to answer.
        match err {
            AnalysisError::DegradedFetch(detail) => ApiError::ModelUnreachable(detail),
        }
    }
}
