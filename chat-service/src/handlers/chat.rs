use crate::dtos::{ChatRequest, ChatResponse};
use crate::error::ChatError;
use crate::startup::AppState;
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::request::Parts,
    Json,
};
use service_core::middleware::rate_limit::client_ip;
use std::convert::Infallible;
use std::net::IpAddr;

/// Caller address: the socket peer, or the forwarded client behind a
/// trusted proxy.
pub struct ClientIp(pub Option<IpAddr>);

#[axum::async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(
            &parts.headers,
            &parts.extensions,
            &state.trusted_proxies,
        )))
    }
}

/// `POST /api/chat`
pub async fn chat(
    State(state): State<AppState>,
    ClientIp(addr): ClientIp,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ChatError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection, "Invalid request body");
        ChatError::Validation("Message is required".to_string())
    })?;

    let response = state.relay.handle(request, addr).await?;
    Ok(Json(ChatResponse { response }))
}
