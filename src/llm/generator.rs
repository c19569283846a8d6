use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Incremental text deltas from a streaming generation call.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One OpenAI-style chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Text generation service.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Single-shot completion.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Streaming completion. The stream ends when the service signals done.
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TextStream>;

    fn name(&self) -> &str;
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Arc<T> {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        (**self).chat(messages).await
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        (**self).chat_stream(messages).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock generator for testing.
///
/// `chat` returns the concatenated deltas unless a separate response is set.
#[derive(Debug)]
pub struct MockGenerator {
    deltas: Vec<String>,
    response: Option<String>,
    always_fail: bool,
    fail_first: u32,
    stream_unavailable: bool,
    stream_fails_after: Option<usize>,
    delay: Duration,
    chat_calls: AtomicU32,
    stream_calls: AtomicU32,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            deltas: vec!["mock reply".to_string()],
            response: None,
            always_fail: false,
            fail_first: 0,
            stream_unavailable: false,
            stream_fails_after: None,
            delay: Duration::ZERO,
            chat_calls: AtomicU32::new(0),
            stream_calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply with one delta carrying the whole text.
    pub fn with_response(mut self, response: &str) -> Self {
        self.deltas = vec![response.to_string()];
        self.response = None;
        self
    }

    pub fn with_deltas<S: AsRef<str>>(mut self, deltas: &[S]) -> Self {
        self.deltas = deltas.iter().map(|d| d.as_ref().to_string()).collect();
        self
    }

    /// Separate reply for the non-streaming `chat` call.
    pub fn with_chat_response(mut self, response: &str) -> Self {
        self.response = Some(response.to_string());
        self
    }

    /// Fail every call with a retryable error.
    pub fn with_failure(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Fail the first `n` calls of either kind, then succeed.
    pub fn failing_times(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// Make `chat_stream` fail to open while `chat` still works.
    pub fn stream_unavailable(mut self) -> Self {
        self.stream_unavailable = true;
        self
    }

    /// Yield `n` deltas, then a stream error.
    pub fn stream_fails_after(mut self, n: usize) -> Self {
        self.stream_fails_after = Some(n);
        self
    }

    /// Pause before each delta.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn chat_calls(&self) -> u32 {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> u32 {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Message lists received so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Record the request and report whether this call should fail.
    fn record(&self, messages: &[ChatMessage]) -> bool {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        let previous = self.chat_calls() + self.stream_calls();
        self.always_fail || previous < self.fail_first
    }
}

fn mock_failure() -> PipelineError {
    PipelineError::generation("mock generation failure", true)
}

#[async_trait]
impl Generator for MockGenerator {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let failing = self.record(messages);
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if failing {
            return Err(mock_failure());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self
            .response
            .clone()
            .unwrap_or_else(|| self.deltas.concat()))
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let failing = self.record(messages);
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if failing {
            return Err(mock_failure());
        }
        if self.stream_unavailable {
            return Err(PipelineError::generation("streaming not available", false));
        }

        let mut items: Vec<Result<String>> = self.deltas.iter().cloned().map(Ok).collect();
        if let Some(n) = self.stream_fails_after {
            items.truncate(n);
            items.push(Err(PipelineError::generation("mock stream interrupted", true)));
        }

        let delay = self.delay;
        let stream = futures_util::stream::unfold(items.into_iter(), move |mut items| async move {
            let item = items.next()?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Some((item, items))
        });
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn collect(stream: TextStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_mock_chat_concatenates_deltas() {
        let generator = MockGenerator::new().with_deltas(&["Hello", "|", "World"]);
        let reply = generator.chat(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply, "Hello|World");
        assert_eq!(generator.chat_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_stream_yields_deltas_in_order() {
        let generator = MockGenerator::new().with_deltas(&["a", "b", "c"]);
        let items = collect(generator.chat_stream(&[]).await.unwrap()).await;
        let deltas: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(deltas, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_mock_stream_fails_after() {
        let generator = MockGenerator::new()
            .with_deltas(&["a", "b", "c"])
            .stream_fails_after(1);
        let items = collect(generator.chat_stream(&[]).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_mock_stream_unavailable_but_chat_works() {
        let generator = MockGenerator::new()
            .with_response("whole reply")
            .stream_unavailable();
        assert!(generator.chat_stream(&[]).await.is_err());
        assert_eq!(generator.chat(&[]).await.unwrap(), "whole reply");
    }

    #[tokio::test]
    async fn test_mock_failing_times() {
        let generator = MockGenerator::new().failing_times(1);
        assert!(generator.chat(&[]).await.is_err());
        assert!(generator.chat(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let generator = MockGenerator::new();
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hello")];
        generator.chat(&messages).await.unwrap();
        assert_eq!(generator.requests(), vec![messages]);
    }

    #[test]
    fn test_chat_message_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "ok");
    }
}
