//! Inference backend trait and test implementation.
//!
//! The inference collaborator accepts an ordered list of prompt entries plus
//! generation parameters and returns generated text, either all at once or as
//! an incremental stream of text deltas terminated by a stop event.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{LlmError, Result, is_retryable};
use crate::types::{CompletionRequest, CompletionResponse, StopReason, Usage};

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures, rate limits).
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if is_retryable(&e) && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt = attempt,
                    max_retries = max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Types
// ─────────────────────────────────────────────────────────────────────────────

/// A streaming response from an inference backend.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'static>>;

/// Events emitted during streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chunk of generated text.
    Delta(String),
    /// Generation finished.
    Stop {
        stop_reason: StopReason,
        usage: Usage,
    },
    /// The backend reported an error mid-stream.
    Error { message: String },
}

impl StreamEvent {
    /// Returns true if this is the final event in a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Stop { .. } | StreamEvent::Error { .. })
    }
}

/// Drain a stream into the full generated text.
///
/// Stops at the first terminal event. An error event becomes
/// [`LlmError::Stream`].
pub async fn collect_stream(mut stream: ResponseStream) -> Result<String> {
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Delta(chunk) => text.push_str(&chunk),
            StreamEvent::Stop { .. } => break,
            StreamEvent::Error { message } => return Err(LlmError::Stream(message)),
        }
    }
    Ok(text)
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for inference backends.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Execute a completion request and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Execute a completion request and return a stream of events.
    ///
    /// The default implementation wraps [`complete`](Self::complete) in a
    /// single-delta stream.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<ResponseStream> {
        let response = self.complete(request).await?;
        let events = vec![
            Ok(StreamEvent::Delta(response.text)),
            Ok(StreamEvent::Stop {
                stop_reason: response.stop_reason.unwrap_or(StopReason::EndTurn),
                usage: response.usage,
            }),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }

    /// Get the name of this backend.
    fn name(&self) -> &str;
}

/// A backend that can be shared across threads.
pub type SharedBackend = Arc<dyn LlmBackend>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

/// A mock backend for testing purposes.
///
/// Returns pre-configured responses in order. A repeating mock returns the
/// same text forever. Every request is logged, and the number of concurrent
/// calls is tracked so single-flight guarantees can be asserted.
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    responses: Mutex<Vec<String>>,
    repeat: Option<String>,
    failure: Option<String>,
    delay: Option<Duration>,
    request_log: Mutex<Vec<CompletionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockBackend {
    /// Create a mock that returns the given texts in order.
    ///
    /// If more requests are made than responses available, an error is
    /// returned.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            name: "mock".to_string(),
            responses: Mutex::new(responses),
            repeat: None,
            failure: None,
            delay: None,
            request_log: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Create a mock with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![text.into()])
    }

    /// Create a mock that answers every request with the same text.
    pub fn repeating(text: impl Into<String>) -> Self {
        Self {
            repeat: Some(text.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Create a mock whose every request fails with a backend error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Delay every response (useful for overlap and cancellation tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all requests that were made to this backend.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.request_log.lock().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }

    /// Highest number of requests that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_text(&self) -> Result<String> {
        if let Some(message) = &self.failure {
            return Err(LlmError::Backend(message.clone()));
        }
        if let Some(text) = &self.repeat {
            return Ok(text.clone());
        }
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            return Err(LlmError::Backend(
                "MockBackend: no more responses available".to_string(),
            ));
        }
        Ok(responses.remove(0))
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request.model.clone();
        self.request_log.lock().push(request);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.next_text();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = result?;
        let count = self.request_count();
        Ok(CompletionResponse::new(
            format!("mock_msg_{count}"),
            model,
            text,
            StopReason::EndTurn,
            Usage::new(10, 20),
        ))
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<ResponseStream> {
        let response = self.complete(request).await?;

        // Split on whitespace boundaries so consumers see several deltas.
        let mut events: Vec<Result<StreamEvent>> = response
            .text
            .split_inclusive(' ')
            .map(|chunk| Ok(StreamEvent::Delta(chunk.to_string())))
            .collect();
        events.push(Ok(StreamEvent::Stop {
            stop_reason: response.stop_reason.unwrap_or(StopReason::EndTurn),
            usage: response.usage,
        }));

        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest::new("test-model", vec![Message::user(text)], 100)
    }

    #[tokio::test]
    async fn test_mock_backend_single_response() {
        let backend = MockBackend::with_text("Hello!");

        let response = backend.complete(request("Hi")).await.unwrap();

        assert_eq!(response.text(), "Hello!");
        assert_eq!(response.model, "test-model");
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_backend_multiple_responses() {
        let backend = MockBackend::new(vec!["First".into(), "Second".into()]);

        let r1 = backend.complete(request("1")).await.unwrap();
        let r2 = backend.complete(request("2")).await.unwrap();

        assert_eq!(r1.text(), "First");
        assert_eq!(r2.text(), "Second");
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_backend_exhausted() {
        let backend = MockBackend::new(vec![]);
        assert!(backend.complete(request("Hi")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_backend_repeating() {
        let backend = MockBackend::repeating("again");
        for _ in 0..3 {
            let r = backend.complete(request("x")).await.unwrap();
            assert_eq!(r.text(), "again");
        }
    }

    #[tokio::test]
    async fn test_mock_backend_failing() {
        let backend = MockBackend::failing("down");
        let err = backend.complete(request("x")).await.unwrap_err();
        assert!(matches!(err, LlmError::Backend(ref m) if m == "down"));
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_backend_stream() {
        let backend = MockBackend::with_text("Streamed reply here");

        let mut stream = backend.complete_stream(request("Hi")).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], StreamEvent::Delta("Streamed ".into()));
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_collect_stream() {
        let backend = MockBackend::with_text("one two three");
        let stream = backend.complete_stream(request("Hi")).await.unwrap();
        assert_eq!(collect_stream(stream).await.unwrap(), "one two three");
    }

    #[tokio::test]
    async fn test_collect_stream_error_event() {
        let events = vec![
            Ok(StreamEvent::Delta("partial".into())),
            Ok(StreamEvent::Error {
                message: "overloaded".into(),
            }),
        ];
        let stream: ResponseStream = Box::pin(futures::stream::iter(events));
        let err = collect_stream(stream).await.unwrap_err();
        assert!(matches!(err, LlmError::Stream(ref m) if m == "overloaded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_transient_error() {
        let attempts = AtomicUsize::new(0);
        let result = with_retry(3, Duration::from_millis(10), "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Network("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_on_permanent_error() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = with_retry(3, Duration::from_millis(1), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::InvalidRequest("bad".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausts_attempts() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = with_retry(2, Duration::from_millis(1), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::RateLimit("slow down".into())) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::RateLimit(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_backend_tracks_concurrency() {
        let backend = Arc::new(MockBackend::repeating("ok").with_delay(Duration::from_millis(50)));

        let a = {
            let b = backend.clone();
            tokio::spawn(async move { b.complete(request("a")).await })
        };
        let b = {
            let b = backend.clone();
            tokio::spawn(async move { b.complete(request("b")).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(backend.max_in_flight(), 2);
    }
}
