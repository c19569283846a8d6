//! Turning segments into clips, one at a time or through a bounded pool.

use super::types::{SpeechSegment, SynthesizedClip};
use crate::error::{PipelineError, Result};
use crate::retry::{RetryPolicy, with_retry};
use crate::tts::{Synthesizer, Voice};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Synthesis strategy. Returned clips are ordered by segment index.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        segments: &[SpeechSegment],
        voice: &Voice,
    ) -> Result<Vec<SynthesizedClip>>;

    fn mode(&self) -> &'static str;
}

async fn synthesize_with_retry(
    synthesizer: &dyn Synthesizer,
    voice: &Voice,
    retry: RetryPolicy,
    segment: &SpeechSegment,
) -> Result<SynthesizedClip> {
    let audio = with_retry(retry, "synthesis", || synthesizer.synthesize(&segment.text, voice)).await?;
    Ok(SynthesizedClip::new(segment.index, audio))
}

/// One call at a time, in arrival order. A segment whose retries run out
/// becomes a degraded clip and the remaining segments still proceed.
#[derive(Clone)]
pub struct SequentialDispatcher {
    synthesizer: Arc<dyn Synthesizer>,
    retry: RetryPolicy,
}

impl SequentialDispatcher {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, retry: RetryPolicy) -> Self {
        Self { synthesizer, retry }
    }

    /// Synthesize a single segment. Never fails; failures degrade the clip.
    pub async fn synthesize_one(&self, segment: &SpeechSegment, voice: &Voice) -> SynthesizedClip {
        match synthesize_with_retry(&*self.synthesizer, voice, self.retry, segment).await {
            Ok(clip) => clip,
            Err(e) => {
                warn!(segment = segment.index, error = %e, "segment degraded");
                SynthesizedClip::degraded(segment.index, e.message())
            }
        }
    }
}

#[async_trait]
impl Dispatcher for SequentialDispatcher {
    async fn dispatch(
        &self,
        segments: &[SpeechSegment],
        voice: &Voice,
    ) -> Result<Vec<SynthesizedClip>> {
        let mut clips = Vec::with_capacity(segments.len());
        for segment in segments {
            clips.push(self.synthesize_one(segment, voice).await);
        }
        Ok(clips)
    }

    fn mode(&self) -> &'static str {
        "sequential"
    }
}

/// All segments at once through a fixed-size pool. Any segment whose retries
/// run out fails the whole batch.
#[derive(Clone)]
pub struct BatchDispatcher {
    synthesizer: Arc<dyn Synthesizer>,
    retry: RetryPolicy,
    pool_size: usize,
}

impl BatchDispatcher {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, retry: RetryPolicy, pool_size: usize) -> Self {
        Self {
            synthesizer,
            retry,
            pool_size: pool_size.max(1),
        }
    }
}

#[async_trait]
impl Dispatcher for BatchDispatcher {
    async fn dispatch(
        &self,
        segments: &[SpeechSegment],
        voice: &Voice,
    ) -> Result<Vec<SynthesizedClip>> {
        if let [only] = segments {
            let clip = synthesize_with_retry(&*self.synthesizer, voice, self.retry, only).await?;
            return Ok(vec![clip]);
        }

        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks = JoinSet::new();
        for segment in segments.iter().cloned() {
            let semaphore = semaphore.clone();
            let synthesizer = self.synthesizer.clone();
            let voice = voice.clone();
            let retry = self.retry;
            tasks.spawn(async move {
                // Hold permit until done
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::synthesis(format!("worker pool closed: {e}"), false))?;
                synthesize_with_retry(&*synthesizer, &voice, retry, &segment)
                    .await
                    .map_err(|e| {
                        PipelineError::synthesis(
                            format!("segment {}: {}", segment.index, e.message()),
                            false,
                        )
                    })
            });
        }

        let mut clips = Vec::with_capacity(segments.len());
        while let Some(joined) = tasks.join_next().await {
            let clip = joined.map_err(|e| {
                PipelineError::synthesis(format!("synthesis task panicked: {e}"), false)
            })??;
            clips.push(clip);
        }
        // Dropping the JoinSet on an early return above aborts the remaining tasks.

        clips.sort_by_key(|c| c.segment_index);
        debug!(segments = clips.len(), pool = self.pool_size, "batch synthesized");
        Ok(clips)
    }

    fn mode(&self) -> &'static str {
        "batch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tts::MockSynthesizer;
    use std::time::Duration;

    fn segments(texts: &[&str]) -> Vec<SpeechSegment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| SpeechSegment::new(i, *t))
            .collect()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn sequential_succeeds_after_two_failures() {
        let synth = Arc::new(MockSynthesizer::new().failing_times(2));
        let dispatcher = SequentialDispatcher::new(synth.clone(), policy());

        let clips = dispatcher
            .dispatch(&segments(&["hello"]), &Voice::default())
            .await
            .unwrap();
        assert_eq!(clips.len(), 1);
        assert!(!clips[0].is_degraded());
        assert!(!clips[0].audio.is_empty());
        assert_eq!(synth.calls(), 3);
    }

    #[tokio::test]
    async fn sequential_degrades_and_continues() {
        let synth = Arc::new(MockSynthesizer::new().with_failure_for("bad"));
        let dispatcher = SequentialDispatcher::new(synth.clone(), policy());

        let clips = dispatcher
            .dispatch(&segments(&["good", "bad", "after"]), &Voice::default())
            .await
            .unwrap();
        assert_eq!(clips.len(), 3);
        assert!(!clips[0].is_degraded());
        assert!(clips[1].is_degraded());
        assert!(clips[1].audio.is_empty());
        assert_eq!(clips[1].error.as_deref(), Some("mock synthesis failure"));
        assert!(!clips[2].is_degraded());
        // 1 + 3 attempts + 1
        assert_eq!(synth.calls(), 5);
    }

    #[tokio::test]
    async fn sequential_preserves_order_and_concurrency_one() {
        let synth = Arc::new(MockSynthesizer::new().with_delay(Duration::from_millis(5)));
        let dispatcher = SequentialDispatcher::new(synth.clone(), policy());

        dispatcher
            .dispatch(&segments(&["a", "b", "c"]), &Voice::default())
            .await
            .unwrap();
        assert_eq!(synth.started(), vec!["a", "b", "c"]);
        assert_eq!(synth.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn batch_reorders_by_index() {
        let synth = Arc::new(MockSynthesizer::new().with_delay(Duration::from_millis(5)));
        let dispatcher = BatchDispatcher::new(synth.clone(), policy(), 4);

        let input = segments(&["one", "two", "three", "four", "five", "six"]);
        let clips = dispatcher.dispatch(&input, &Voice::default()).await.unwrap();
        let indices: Vec<_> = clips.iter().map(|c| c.segment_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(clips.iter().all(|c| !c.is_degraded()));
    }

    #[tokio::test]
    async fn batch_respects_pool_size() {
        let synth = Arc::new(MockSynthesizer::new().with_delay(Duration::from_millis(20)));
        let dispatcher = BatchDispatcher::new(synth.clone(), policy(), 2);

        dispatcher
            .dispatch(&segments(&["a", "b", "c", "d", "e"]), &Voice::default())
            .await
            .unwrap();
        assert!(synth.peak_concurrency() <= 2);
        assert_eq!(synth.calls(), 5);
    }

    #[tokio::test]
    async fn batch_exhaustion_is_fatal() {
        let synth = Arc::new(MockSynthesizer::new().with_failure_for("bad"));
        let dispatcher = BatchDispatcher::new(synth, policy(), 4);

        let err = dispatcher
            .dispatch(&segments(&["good", "bad", "fine"]), &Voice::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Synthesis);
        assert!(err.to_string().contains("segment 1"));
    }

    #[tokio::test]
    async fn batch_single_segment_is_one_call() {
        let synth = Arc::new(MockSynthesizer::new());
        let dispatcher = BatchDispatcher::new(synth.clone(), policy(), 4);

        let clips = dispatcher
            .dispatch(&segments(&["solo"]), &Voice::default())
            .await
            .unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(synth.calls(), 1);
    }

    #[tokio::test]
    async fn batch_single_segment_failure_is_fatal() {
        let synth = Arc::new(MockSynthesizer::new().failing_times(3));
        let dispatcher = BatchDispatcher::new(synth.clone(), policy(), 4);

        let err = dispatcher
            .dispatch(&segments(&["solo"]), &Voice::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Synthesis);
        assert_eq!(synth.calls(), 3);
    }

    #[tokio::test]
    async fn empty_input_yields_no_clips() {
        let synth = Arc::new(MockSynthesizer::new());
        let batch = BatchDispatcher::new(synth.clone(), policy(), 4);
        let sequential = SequentialDispatcher::new(synth.clone(), policy());
        assert!(batch.dispatch(&[], &Voice::default()).await.unwrap().is_empty());
        assert!(sequential.dispatch(&[], &Voice::default()).await.unwrap().is_empty());
        assert_eq!(synth.calls(), 0);
        assert_eq!(batch.mode(), "batch");
        assert_eq!(sequential.mode(), "sequential");
    }
}
