#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    Extension,
    http::{Request, StatusCode},
    Router,
};
use chat_service::config::{ChatConfig, Environment};
use chat_service::services::providers::mock::MockCompletionProvider;
use chat_service::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::util::ServiceExt;

/// Socket peer every test request appears to come from.
pub const PEER: ([u8; 4], u16) = ([203, 0, 113, 9], 40_000);

pub fn test_config() -> ChatConfig {
    let mut config = ChatConfig::default();
    config.environment = Environment::Test;
    config.common.host = "127.0.0.1".to_string();
    config.common.port = 0;
    config.chat.max_message_chars = 100;
    config.chat.history_window = 6;
    config.rate_limit.api_requests = 1_000;
    config.rate_limit.chat_requests = 100;
    config.usage.daily_message_limit = 100;
    config
}

pub struct TestApp {
    pub state: AppState,
    pub provider: Arc<MockCompletionProvider>,
    router: Router,
}

impl TestApp {
    pub fn new(config: ChatConfig) -> Self {
        Self::with_provider(config, MockCompletionProvider::new("nonsense"))
    }

    pub fn with_provider(config: ChatConfig, provider: MockCompletionProvider) -> Self {
        let provider = Arc::new(provider);
        let state = AppState::new(config, provider.clone());
        let router = build_router(state.clone()).layer(Extension(ConnectInfo(SocketAddr::from(PEER))));

        Self {
            state,
            provider,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value, axum::http::HeaderMap) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body, headers)
    }

    pub async fn post_chat(&self, body: Value) -> (StatusCode, Value) {
        let (status, body, _) = self.send(chat_request(body.to_string())).await;
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value, axum::http::HeaderMap) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }
}

pub fn chat_request_with_headers(body: Value, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn chat_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}
