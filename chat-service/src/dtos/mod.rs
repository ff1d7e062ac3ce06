//! Request and response bodies of the public HTTP API.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/chat`.
///
/// `message` is optional at the serde level so a missing field surfaces as
/// our own 400 rather than a generic deserialization rejection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// 429 body for an exhausted daily quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaErrorResponse {
    pub error: String,
    pub limit: u32,
    pub used: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_reads_camel_case_session_id() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"message":"hi","sessionId":"abc"}"#).unwrap();
        assert_eq!(req.message.as_deref(), Some("hi"));
        assert_eq!(req.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn chat_request_tolerates_missing_fields() {
        let req: ChatRequest = serde_json::from_str("{}").unwrap();
        assert!(req.message.is_none());
        assert!(req.session_id.is_none());
    }
}
