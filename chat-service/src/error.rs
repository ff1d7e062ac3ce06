use crate::dtos::QuotaErrorResponse;
use crate::services::providers::ProviderError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::{AppError, ErrorBody};
use thiserror::Error;

/// Message shown to the browser for any upstream failure.
pub const UPSTREAM_FAILURE_MESSAGE: &str = "An error occurred while processing your request";

/// Terminal outcomes of the chat pipeline other than success.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    ContentPolicy(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },

    #[error("Daily message limit reached ({used}/{limit})")]
    QuotaExceeded { limit: u32, used: u32 },

    #[error("Upstream completion failed: {0}")]
    Upstream(#[from] ProviderError),
}

impl ChatError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "validation",
            ChatError::ContentPolicy(_) => "content_policy",
            ChatError::RateLimited { .. } => "rate_limited",
            ChatError::QuotaExceeded { .. } => "quota_exceeded",
            ChatError::Upstream(_) => "upstream",
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        match self {
            ChatError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)).into_response(),
            ChatError::ContentPolicy(msg) => {
                AppError::Forbidden(anyhow::anyhow!(msg)).into_response()
            }
            ChatError::RateLimited { retry_after } => AppError::TooManyRequests(
                "Too many messages. Please slow down and try again later.".to_string(),
                Some(retry_after),
            )
            .into_response(),
            ChatError::QuotaExceeded { limit, used } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(QuotaErrorResponse {
                    error: "Daily message limit reached. Come back tomorrow.".to_string(),
                    limit,
                    used,
                }),
            )
                .into_response(),
            // Detail stays in the logs; the client gets a generic message.
            ChatError::Upstream(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(UPSTREAM_FAILURE_MESSAGE)),
            )
                .into_response(),
        }
    }
}
