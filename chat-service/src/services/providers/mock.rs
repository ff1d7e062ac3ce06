//! Mock provider implementation for testing.

use super::{CompletionProvider, GenerationParams, ProviderError, ProviderResponse};
use crate::models::ChatMessage;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Canned-answer provider that remembers every context it was sent.
pub struct MockCompletionProvider {
    reply: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockCompletionProvider {
    /// Always answers with `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always fails as an unreachable upstream would.
    pub fn failing() -> Self {
        Self {
            reply: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Hold every answer for `delay`, like a slow upstream.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Contexts forwarded so far, oldest call first.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let Some(reply) = &self.reply else {
            return Err(ProviderError::NetworkError(
                "mock upstream unavailable".to_string(),
            ));
        };

        let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        Ok(ProviderResponse {
            text: Some(reply.clone()),
            input_tokens: (prompt_chars / 4) as u32,
            output_tokens: (reply.len() / 4).max(1) as u32,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
