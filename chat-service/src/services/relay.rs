//! The chat pipeline: filter, rate limit, quota, session window, upstream.
//!
//! Each step short-circuits on failure, so a message rejected early never
//! reaches the session store or the provider.

use crate::config::ChatConfig;
use crate::dtos::ChatRequest;
use crate::error::ChatError;
use crate::models::ChatMessage;
use crate::services::content_filter::{ContentFilter, Rejection};
use crate::services::metrics;
use crate::services::providers::{CompletionProvider, GenerationParams};
use crate::services::session_store::{SessionStore, SYSTEM_PROMPT};
use crate::services::usage_tracker::UsageTracker;
use chrono::Utc;
use service_core::middleware::rate_limit::{
    client_key, create_keyed_rate_limiter, retry_after_secs, KeyedRateLimiter,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

/// Conversation used when the client sends no session token.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Limiter/quota key when neither a token nor an address is known.
const ANONYMOUS_KEY: &str = "anonymous";

/// Stored and returned when the model answers with nothing.
pub const EMPTY_COMPLETION_FALLBACK: &str = "No response generated";

pub struct ChatRelay {
    filter: ContentFilter,
    api_limiter: KeyedRateLimiter,
    chat_limiter: KeyedRateLimiter,
    usage: UsageTracker,
    sessions: SessionStore,
    provider: Arc<dyn CompletionProvider>,
    params: GenerationParams,
}

impl ChatRelay {
    pub fn new(config: &ChatConfig, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            filter: ContentFilter::new(config.chat.max_message_chars),
            api_limiter: create_keyed_rate_limiter(
                config.rate_limit.api_requests,
                config.rate_limit.api_window_seconds,
            ),
            chat_limiter: create_keyed_rate_limiter(
                config.rate_limit.chat_requests,
                config.rate_limit.chat_window_seconds,
            ),
            usage: UsageTracker::new(config.usage.daily_message_limit),
            sessions: SessionStore::new(SYSTEM_PROMPT, config.chat.history_window),
            provider,
            params: GenerationParams {
                temperature: config.openai.temperature,
                max_tokens: config.openai.max_tokens,
            },
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Coarse limiter shared by every `/api/*` route.
    pub fn api_limiter(&self) -> &KeyedRateLimiter {
        &self.api_limiter
    }

    pub fn chat_limiter(&self) -> &KeyedRateLimiter {
        &self.chat_limiter
    }

    /// Run one chat request end to end and return the assistant's reply.
    pub async fn handle(
        &self,
        request: ChatRequest,
        addr: Option<IpAddr>,
    ) -> Result<String, ChatError> {
        let result = self.run(request, addr).await;
        metrics::record_chat_outcome(match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        });
        result
    }

    async fn run(&self, request: ChatRequest, addr: Option<IpAddr>) -> Result<String, ChatError> {
        let message = self
            .filter
            .check(request.message.as_deref())
            .map_err(|rejection| self.rejection_error(rejection))?
            .to_string();

        let supplied_id = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let session_id = supplied_id.unwrap_or(DEFAULT_SESSION_ID);
        let key = client_key(supplied_id, addr).unwrap_or_else(|| ANONYMOUS_KEY.to_string());

        tracing::info!(
            session_id = %session_id,
            message_chars = message.chars().count(),
            "Processing chat request"
        );

        for (tier, limiter) in [("api", &self.api_limiter), ("chat", &self.chat_limiter)] {
            if let Err(wait) = limiter.check(&key) {
                tracing::warn!(key = %key, tier, "Rate limit exceeded");
                return Err(ChatError::RateLimited {
                    retry_after: retry_after_secs(wait),
                });
            }
        }

        let reservation = self.usage.reserve(&key, addr, Utc::now()).map_err(|exceeded| {
            tracing::warn!(
                key = %key,
                limit = exceeded.limit,
                used = exceeded.used,
                "Daily message quota exceeded"
            );
            ChatError::QuotaExceeded {
                limit: exceeded.limit,
                used: exceeded.used,
            }
        })?;

        let window = self.sessions.append(session_id, ChatMessage::user(message));

        tracing::info!(
            provider = self.provider.name(),
            context_messages = window.len(),
            "Sending request to completion provider"
        );

        let started = Instant::now();
        let result = self.provider.complete(&window, &self.params).await;
        let elapsed = started.elapsed();
        metrics::record_upstream_call(self.provider.name(), result.is_ok(), elapsed.as_secs_f64());

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    provider = self.provider.name(),
                    status = ?e.status(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Completion provider call failed"
                );
                return Err(ChatError::Upstream(e));
            }
        };

        let tokens = response.total_tokens();
        let reply = response
            .text
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| EMPTY_COMPLETION_FALLBACK.to_string());

        tracing::info!(
            elapsed_ms = elapsed.as_millis() as u64,
            reply_chars = reply.chars().count(),
            tokens,
            "Completion provider responded"
        );

        self.sessions
            .append(session_id, ChatMessage::assistant(reply.clone()));
        reservation.commit(tokens, Utc::now());
        metrics::record_tokens(tokens);

        Ok(reply)
    }

    fn rejection_error(&self, rejection: Rejection) -> ChatError {
        match rejection {
            Rejection::Missing => {
                tracing::warn!("Invalid request: message is missing");
                ChatError::Validation("Message is required".to_string())
            }
            Rejection::TooLong { length, max } => {
                tracing::warn!(length, max, "Invalid request: message too long");
                ChatError::Validation(format!(
                    "Message is too long (maximum is {} characters)",
                    max
                ))
            }
            Rejection::Forbidden => {
                tracing::warn!("Rejected message matching a forbidden pattern");
                ChatError::ContentPolicy("Message contains forbidden content".to_string())
            }
        }
    }
}
