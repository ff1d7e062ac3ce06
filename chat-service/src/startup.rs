//! Application startup and lifecycle management.
//!
//! Builds the shared state, the HTTP router and the background sweeper, and
//! runs them until a shutdown signal arrives.

use crate::config::ChatConfig;
use crate::handlers::{chat::chat, health::health_check, metrics::metrics};
use crate::services::providers::CompletionProvider;
use crate::services::{ChatRelay, Sweeper};
use axum::{
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{keyed_rate_limit_middleware, RateLimitState, TrustedProxies},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state, created once at startup and injected into
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ChatConfig,
    pub relay: Arc<ChatRelay>,
    pub trusted_proxies: TrustedProxies,
}

impl AppState {
    pub fn new(config: ChatConfig, provider: Arc<dyn CompletionProvider>) -> Self {
        let relay = Arc::new(ChatRelay::new(&config, provider));
        let trusted_proxies = TrustedProxies::new(config.trusted_proxies.iter().copied());

        Self {
            config,
            relay,
            trusted_proxies,
        }
    }

    /// Background sweeper over this state's stores and limiters.
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.relay.clone(),
            Duration::from_secs(self.config.usage.sweep_interval_seconds),
            Duration::from_secs(self.config.chat.session_idle_ttl_seconds),
        )
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

/// `/api/chat` spends the coarse API budget inside the relay, after the
/// content filter and keyed on the body `sessionId`. Body-less API routes
/// spend it here.
pub fn build_router(state: AppState) -> Router {
    let rate_limit = RateLimitState {
        limiter: state.relay.api_limiter().clone(),
        trusted_proxies: state.trusted_proxies.clone(),
    };
    let health_routes = Router::new()
        .route("/api/health", get(health_check))
        .route_layer(from_fn_with_state(rate_limit, keyed_rate_limit_middleware));

    Router::new()
        .merge(health_routes)
        .route("/api/chat", post(chat))
        .route("/metrics", get(metrics))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Bind the listener and assemble state. Port 0 picks a random port.
    pub async fn build(
        config: ChatConfig,
        provider: Arc<dyn CompletionProvider>,
    ) -> Result<Self, AppError> {
        let address = config.common.address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let api_key_status = if config.openai.api_key.expose_secret().is_empty() {
            "MISSING"
        } else {
            "Configured"
        };

        tracing::info!(
            service = %config.service_name,
            url = %format!("http://localhost:{}", port),
            api_key = api_key_status,
            provider = provider.name(),
            model = %config.openai.model,
            endpoints = "GET /api/health, POST /api/chat, GET /metrics",
            "Dumb-GPT server is running"
        );

        let state = AppState::new(config, provider);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve HTTP and run the sweeper until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = CancellationToken::new();
        let sweeper = tokio::spawn(self.state.sweeper().run(shutdown.clone()));

        let router = build_router(self.state);
        let result = axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        shutdown.cancel();
        if let Err(e) = sweeper.await {
            tracing::error!("Sweeper task failed: {}", e);
        }

        result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            e
        })
    }
}

