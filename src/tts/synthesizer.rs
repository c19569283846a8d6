use crate::audio::wav;
use crate::defaults;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Who speaks and how fast.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub speaker: String,
    pub rate: f32,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            speaker: defaults::SPEAKER.to_string(),
            rate: defaults::RATE,
        }
    }
}

/// Speech synthesis service. Every call returns a complete WAV container.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &Voice) -> Result<Vec<u8>>;

    /// Whether `synthesize_batch` is backed by a server-side endpoint.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Synthesize all segments in one request, returning merged audio.
    async fn synthesize_batch(&self, _segments: &[String], _voice: &Voice) -> Result<Vec<u8>> {
        Err(PipelineError::synthesis(
            "batch synthesis not supported by this backend",
            false,
        ))
    }

    fn name(&self) -> &str;
}

#[async_trait]
impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    async fn synthesize(&self, text: &str, voice: &Voice) -> Result<Vec<u8>> {
        (**self).synthesize(text, voice).await
    }

    fn supports_batch(&self) -> bool {
        (**self).supports_batch()
    }

    async fn synthesize_batch(&self, segments: &[String], voice: &Voice) -> Result<Vec<u8>> {
        (**self).synthesize_batch(segments, voice).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock synthesizer for testing.
///
/// Produces a 16 kHz mono 16-bit WAV with a fixed number of frames per
/// character, so durations are predictable.
#[derive(Debug)]
pub struct MockSynthesizer {
    frames_per_char: usize,
    fail_first: u32,
    fail_texts: HashSet<String>,
    delay: Duration,
    batch: bool,
    calls: AtomicU32,
    batch_calls: AtomicU32,
    started: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter even if the call is dropped mid-await.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            // 0.1 s per character
            frames_per_char: defaults::SAMPLE_RATE as usize / 10,
            fail_first: 0,
            fail_texts: HashSet::new(),
            delay: Duration::ZERO,
            batch: false,
            calls: AtomicU32::new(0),
            batch_calls: AtomicU32::new(0),
            started: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` calls with a retryable error.
    pub fn failing_times(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// Always fail (retryably) when asked to speak exactly `text`.
    pub fn with_failure_for(mut self, text: &str) -> Self {
        self.fail_texts.insert(text.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_frames_per_char(mut self, frames: usize) -> Self {
        self.frames_per_char = frames;
        self
    }

    /// Advertise a server-side batch endpoint.
    pub fn with_batch(mut self) -> Self {
        self.batch = true;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> u32 {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Texts in the order their calls began.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Texts whose calls ran to completion, in completion order.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// WAV bytes the mock produces for `text`.
    pub fn clip_for(&self, text: &str) -> Result<Vec<u8>> {
        let frames = text.chars().count() * self.frames_per_char;
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: defaults::SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let samples: Vec<f32> = (0..frames)
            .map(|i| ((i as f32) * 0.05).sin() * 0.25)
            .collect();
        wav::encode(spec, &samples).map_err(|e| PipelineError::synthesis(e.message(), false))
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, _voice: &Voice) -> Result<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut started) = self.started.lock() {
            started.push(text.to_string());
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if call < self.fail_first || self.fail_texts.contains(text) {
            return Err(PipelineError::synthesis("mock synthesis failure", true));
        }

        let clip = self.clip_for(text)?;
        if let Ok(mut completed) = self.completed.lock() {
            completed.push(text.to_string());
        }
        Ok(clip)
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn synthesize_batch(&self, segments: &[String], _voice: &Voice) -> Result<Vec<u8>> {
        if !self.batch {
            return Err(PipelineError::synthesis(
                "batch synthesis not supported by this backend",
                false,
            ));
        }
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let clips = segments
            .iter()
            .map(|s| self.clip_for(s))
            .collect::<Result<Vec<_>>>()?;
        crate::audio::merge_clips(&clips).map_err(|e| PipelineError::synthesis(e.message(), false))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::probe_duration;

    #[tokio::test]
    async fn test_mock_clip_length_follows_text() {
        let synth = MockSynthesizer::new();
        let clip = synth.synthesize("abcd", &Voice::default()).await.unwrap();
        let duration = probe_duration(&clip).unwrap();
        assert!((duration - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_mock_records_call_order() {
        let synth = MockSynthesizer::new();
        synth.synthesize("one", &Voice::default()).await.unwrap();
        synth.synthesize("two", &Voice::default()).await.unwrap();
        assert_eq!(synth.started(), vec!["one", "two"]);
        assert_eq!(synth.completed(), vec!["one", "two"]);
        assert_eq!(synth.calls(), 2);
        assert_eq!(synth.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_mock_failing_times() {
        let synth = MockSynthesizer::new().failing_times(2);
        let voice = Voice::default();
        assert!(synth.synthesize("a", &voice).await.unwrap_err().is_retryable());
        assert!(synth.synthesize("a", &voice).await.is_err());
        assert!(synth.synthesize("a", &voice).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_failure_for_specific_text() {
        let synth = MockSynthesizer::new().with_failure_for("bad");
        let voice = Voice::default();
        assert!(synth.synthesize("good", &voice).await.is_ok());
        assert!(synth.synthesize("bad", &voice).await.is_err());
        assert_eq!(synth.completed(), vec!["good"]);
    }

    #[tokio::test]
    async fn test_batch_requires_opt_in() {
        let voice = Voice::default();
        let segments = vec!["ab".to_string(), "cd".to_string()];

        let plain = MockSynthesizer::new();
        assert!(!plain.supports_batch());
        assert!(plain.synthesize_batch(&segments, &voice).await.is_err());

        let batch = MockSynthesizer::new().with_batch();
        let merged = batch.synthesize_batch(&segments, &voice).await.unwrap();
        assert!((probe_duration(&merged).unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(batch.batch_calls(), 1);
    }

    #[test]
    fn test_voice_default() {
        let voice = Voice::default();
        assert_eq!(voice.speaker, "default");
        assert_eq!(voice.rate, 1.0);
    }
}
