use crate::dtos::HealthResponse;
use axum::{http::StatusCode, Json};

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    tracing::debug!("Health check requested");
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            message: "Dumb-GPT server is running".to_string(),
        }),
    )
}
