//! Completion provider abstraction.
//!
//! The relay talks to the language model through [`CompletionProvider`] so
//! the OpenAI client can be swapped for the in-process mock in tests.

pub mod mock;
pub mod openai;

use crate::models::ChatMessage;
use async_trait::async_trait;
use thiserror::Error;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Upstream HTTP status, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Sampling settings sent with every completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Result of one completion call.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    /// Generated text; `None` when the model returned no content.
    pub text: Option<String>,

    /// Prompt tokens consumed.
    pub input_tokens: u32,

    /// Completion tokens generated.
    pub output_tokens: u32,
}

impl ProviderResponse {
    pub fn total_tokens(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// A chat-completion backend. One call, one answer, no retries.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Name used in logs and metrics labels.
    fn name(&self) -> &str;
}
