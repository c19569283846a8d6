use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Trait for speech recognition.
///
/// This trait allows swapping implementations (HTTP service vs mock).
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an uploaded audio container to text.
    ///
    /// # Arguments
    /// * `audio` - Raw audio file bytes as uploaded
    /// * `language` - Source language hint, e.g. `"minnan"`
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String>;

    /// Human-readable backend name for logs
    fn name(&self) -> &str;
}

/// Implement Transcriber for Arc<T> to allow sharing across sessions.
#[async_trait]
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String> {
        (**self).transcribe(audio, language).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock transcriber for testing
#[derive(Debug)]
pub struct MockTranscriber {
    response: String,
    always_fail: bool,
    fail_first: u32,
    delay: Duration,
    calls: AtomicU32,
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            response: "mock transcription".to_string(),
            always_fail: false,
            fail_first: 0,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail every call with a retryable error
    pub fn with_failure(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Fail the first `n` calls with a retryable error, then succeed
    pub fn failing_times(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `transcribe` calls made so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: &[u8], _language: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.always_fail || call < self.fail_first {
            return Err(PipelineError::recognition(
                "mock transcription failure",
                true,
            ));
        }
        Ok(self.response.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
