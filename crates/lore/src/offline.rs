//! Inference backend for offline maintenance.
//!
//! Maintenance commands never generate text. Anything that tries gets a
//! backend error instead of a network call.

use async_trait::async_trait;

use lore_llm::{CompletionRequest, CompletionResponse, LlmBackend, LlmError};

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineBackend;

#[async_trait]
impl LlmBackend for OfflineBackend {
    async fn complete(&self, request: CompletionRequest) -> lore_llm::Result<CompletionResponse> {
        tracing::debug!(model = %request.model, "Inference requested while offline");
        Err(LlmError::Backend(
            "no inference backend is available in maintenance mode".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "offline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_llm::Message;

    #[tokio::test]
    async fn test_complete_fails_without_retry() {
        let request = CompletionRequest::new("default", vec![Message::user("hi")], 10);
        let err = OfflineBackend.complete(request).await.unwrap_err();

        assert!(matches!(err, LlmError::Backend(_)));
        assert!(!err.is_retryable());
    }
}
