//! Runs one conversational turn end to end.
//!
//! A run moves through recognition, generation, synthesis and (for the
//! aggregate form) merging. The streaming form is pull-based: a segment is
//! only synthesized when the consumer asks for the next event, so dropping
//! the stream stops all further work. A synthesis call already in flight
//! runs to completion on its own task and its result is discarded.

use super::dispatcher::{BatchDispatcher, Dispatcher, SequentialDispatcher};
use super::segmenter::{StreamSegmenter, segment_text};
use super::sink::ClipStore;
use super::types::{
    AggregateReply, PipelineEvent, PipelineState, ReplyRequest, SegmentEvent, SpeechSegment,
    SynthesizedClip, UserInput,
};
use crate::audio::{ClipMerger, probe_duration};
use crate::config::{Config, ReplyFormat};
use crate::defaults;
use crate::error::{PipelineError, Result};
use crate::llm::{ChatMessage, Generator, Provenance, ReplyParser, TextStream};
use crate::retry::{RetryPolicy, with_retry};
use crate::session::{HistoryStore, Turn, truncate_history};
use crate::stt::Transcriber;
use crate::subtitle::SubtitleAllocator;
use crate::tts::{Synthesizer, Voice};
use futures_util::{Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Settings resolved once from [`Config`] and shared by every run.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub delimiter: String,
    pub history_turns: usize,
    pub retry: RetryPolicy,
    pub batch_pool_size: usize,
    pub max_input_bytes: usize,
    pub reply_format: ReplyFormat,
    pub system_prompt: String,
    pub language: String,
    pub voice: Voice,
    pub subtitles: bool,
    /// Prefer the synthesizer's own batch endpoint for aggregate replies.
    pub server_batch: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            delimiter: defaults::DELIMITER.to_string(),
            history_turns: defaults::HISTORY_TURNS,
            retry: RetryPolicy::default(),
            batch_pool_size: defaults::BATCH_POOL_SIZE,
            max_input_bytes: defaults::MAX_INPUT_BYTES,
            reply_format: ReplyFormat::Plain,
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
            language: defaults::LANGUAGE.to_string(),
            voice: Voice::default(),
            subtitles: true,
            server_batch: false,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            delimiter: config.pipeline.delimiter.clone(),
            history_turns: config.pipeline.history_turns,
            retry: RetryPolicy::new(config.pipeline.retry_attempts, config.retry_delay()?),
            batch_pool_size: config.pipeline.batch_pool_size,
            max_input_bytes: config.pipeline.max_input_bytes,
            reply_format: config.pipeline.reply_format,
            system_prompt: config.pipeline.system_prompt.clone(),
            language: config.speech.language.clone(),
            voice: Voice {
                speaker: config.speech.speaker.clone(),
                rate: config.speech.rate,
            },
            subtitles: config.speech.subtitles,
            server_batch: config.services.server_batch,
        })
    }
}

/// The external collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn Generator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub history: Arc<dyn HistoryStore>,
    pub clips: Arc<dyn ClipStore>,
}

/// Entry point for replies. Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
    history: Arc<dyn HistoryStore>,
    clips: Arc<dyn ClipStore>,
    /// Strategy for aggregate replies when the server batch is not used.
    dispatcher: Arc<dyn Dispatcher>,
    merger: Arc<ClipMerger>,
    subtitles: Arc<SubtitleAllocator>,
    reply_parser: Arc<ReplyParser>,
    settings: Arc<OrchestratorSettings>,
}

/// Per-run values after validation and recognition.
struct RunContext {
    session_id: String,
    user_text: String,
    voice: Voice,
    subtitles: bool,
    messages: Vec<ChatMessage>,
}

/// A complete model reply in the form the run needs it.
struct GeneratedReply {
    /// Stored in history verbatim.
    raw: String,
    /// Shown to the user and spoken.
    text: String,
    romanization: Option<String>,
}

impl GeneratedReply {
    fn plain(raw: String) -> Self {
        Self {
            text: raw.clone(),
            raw,
            romanization: None,
        }
    }
}

/// Logs every state change of one run.
struct StateTracker {
    state: PipelineState,
    session_id: Option<String>,
    /// Every state entered after `AwaitingInput`, in order.
    visited: Vec<PipelineState>,
}

impl StateTracker {
    fn new() -> Self {
        debug!(state = %PipelineState::AwaitingInput, "pipeline state");
        Self {
            state: PipelineState::AwaitingInput,
            session_id: None,
            visited: Vec::new(),
        }
    }

    fn enter(&mut self, state: PipelineState) {
        if self.state == state {
            return;
        }
        let session = self.session_id.as_deref().unwrap_or("-");
        match state {
            PipelineState::Failed(_) => {
                warn!(session, from = %self.state, to = %state, "pipeline state")
            }
            _ => info!(session, from = %self.state, to = %state, "pipeline state"),
        }
        self.state = state;
        self.visited.push(state);
        if matches!(state, PipelineState::Completed | PipelineState::Failed(_)) {
            debug!(session, trail = ?self.visited, "run finished");
        }
    }
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Result<Self> {
        let dispatcher = Arc::new(BatchDispatcher::new(
            collaborators.synthesizer.clone(),
            settings.retry,
            settings.batch_pool_size,
        ));
        Ok(Self {
            transcriber: collaborators.transcriber,
            generator: collaborators.generator,
            synthesizer: collaborators.synthesizer,
            history: collaborators.history,
            clips: collaborators.clips,
            dispatcher,
            merger: Arc::new(ClipMerger::default()),
            subtitles: Arc::new(SubtitleAllocator::default()),
            reply_parser: Arc::new(ReplyParser::new()?),
            settings: Arc::new(settings),
        })
    }

    pub fn from_config(collaborators: Collaborators, config: &Config) -> Result<Self> {
        Ok(Self::new(collaborators, OrchestratorSettings::from_config(config)?)?
            .with_subtitle_allocator(SubtitleAllocator::from_config(&config.subtitles)))
    }

    /// Replace the pooled batch strategy used by `reply`.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_merger(mut self, merger: ClipMerger) -> Self {
        self.merger = Arc::new(merger);
        self
    }

    pub fn with_subtitle_allocator(mut self, allocator: SubtitleAllocator) -> Self {
        self.subtitles = Arc::new(allocator);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Stream one reply segment by segment.
    ///
    /// Yields zero or more `segment` events followed by exactly one
    /// `complete` or `error` event, then ends.
    pub fn stream_reply(
        &self,
        request: ReplyRequest,
    ) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        let run = StreamRun::new(self.clone(), request);
        futures_util::stream::unfold(run, |mut run| async move {
            let event = run.next_event().await?;
            Some((event, run))
        })
    }

    /// Produce one merged audio artifact for the whole reply.
    pub async fn reply(&self, request: ReplyRequest) -> Result<AggregateReply> {
        let mut tracker = StateTracker::new();
        let result = self.run_aggregate(request, &mut tracker).await;
        match &result {
            Ok(_) => tracker.enter(PipelineState::Completed),
            Err(e) => tracker.enter(PipelineState::Failed(e.kind())),
        }
        result
    }

    async fn run_aggregate(
        &self,
        request: ReplyRequest,
        tracker: &mut StateTracker,
    ) -> Result<AggregateReply> {
        let ctx = self.prepare(request, tracker).await?;

        tracker.enter(PipelineState::Generating);
        let reply = self.generate_full(&ctx.messages).await?;
        let segments = segment_text(&reply.text, &self.settings.delimiter);
        if segments.is_empty() {
            return Err(PipelineError::generation("reply has no speakable text", false));
        }

        tracker.enter(PipelineState::Synthesizing);
        let (audio, spans) = if self.settings.server_batch && self.synthesizer.supports_batch() {
            let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
            let audio = with_retry(self.settings.retry, "batch synthesis", || {
                self.synthesizer.synthesize_batch(&texts, &ctx.voice)
            })
            .await?;
            let duration = probe_duration(&audio);
            (audio, vec![(texts.join(" "), duration)])
        } else {
            debug!(mode = self.dispatcher.mode(), "dispatching segments");
            let clips = self.dispatcher.dispatch(&segments, &ctx.voice).await?;
            // One artifact cannot carry a per-segment failure.
            if let Some(clip) = clips.iter().find(|clip| clip.is_degraded()) {
                return Err(PipelineError::synthesis(
                    format!(
                        "segment {}: {}",
                        clip.segment_index,
                        clip.error.as_deref().unwrap_or("no audio")
                    ),
                    false,
                ));
            }
            let spans = segments
                .iter()
                .zip(&clips)
                .map(|(segment, clip)| (segment.text.clone(), clip.duration_seconds))
                .collect::<Vec<_>>();

            tracker.enter(PipelineState::Merging);
            let audio = self.merge(clips).await?;
            (audio, spans)
        };

        let duration_seconds = probe_duration(&audio);
        let audio_ref = self
            .clips
            .put("reply", &audio, defaults::WAV_CONTENT_TYPE)
            .await?;

        let subtitle_cues = if ctx.subtitles {
            let spans: Vec<(&str, Option<f64>)> =
                spans.iter().map(|(text, d)| (text.as_str(), *d)).collect();
            self.subtitles.allocate_spans(&spans)
        } else {
            Vec::new()
        };

        self.record_exchange(&ctx, &reply.raw).await;
        info!(
            session = %ctx.session_id,
            segments = segments.len(),
            bytes = audio.len(),
            duration = ?duration_seconds,
            "reply ready"
        );

        Ok(AggregateReply {
            session_id: ctx.session_id,
            text: reply.text,
            romanization: reply.romanization,
            audio_ref,
            duration_seconds,
            subtitle_cues,
        })
    }

    async fn merge(&self, clips: Vec<SynthesizedClip>) -> Result<Vec<u8>> {
        let merger = self.merger.clone();
        let audio: Vec<Vec<u8>> = clips.into_iter().map(|c| c.audio).collect();
        tokio::task::spawn_blocking(move || merger.merge(&audio))
            .await
            .map_err(|e| PipelineError::merge(format!("merge task failed: {e}")))?
    }

    /// Validate the request, resolve the session and obtain the user's text.
    async fn prepare(
        &self,
        request: ReplyRequest,
        tracker: &mut StateTracker,
    ) -> Result<RunContext> {
        let settings = &self.settings;
        let voice = Voice {
            speaker: request
                .speaker
                .clone()
                .unwrap_or_else(|| settings.voice.speaker.clone()),
            rate: request.rate.unwrap_or(settings.voice.rate),
        };
        if !(defaults::MIN_RATE..=defaults::MAX_RATE).contains(&voice.rate) {
            return Err(PipelineError::validation(format!(
                "rate {} outside {}..={}",
                voice.rate,
                defaults::MIN_RATE,
                defaults::MAX_RATE
            )));
        }
        match &request.input {
            UserInput::Text(text) if text.trim().is_empty() => {
                return Err(PipelineError::validation("empty text input"));
            }
            UserInput::Audio(audio) if audio.is_empty() => {
                return Err(PipelineError::validation("empty audio input"));
            }
            UserInput::Audio(audio) if audio.len() > settings.max_input_bytes => {
                return Err(PipelineError::validation(format!(
                    "audio input of {} bytes exceeds limit of {} bytes",
                    audio.len(),
                    settings.max_input_bytes
                )));
            }
            _ => {}
        }

        let session_id = self
            .history
            .get_or_create_session(request.session_id.as_deref())
            .await?;
        tracker.session_id = Some(session_id.clone());

        let user_text = match &request.input {
            UserInput::Text(text) => text.trim().to_string(),
            UserInput::Audio(audio) => {
                tracker.enter(PipelineState::Transcribing);
                let language = request.language.as_deref().unwrap_or(&settings.language);
                let text = with_retry(settings.retry, "recognition", || {
                    self.transcriber.transcribe(audio, language)
                })
                .await?;
                let text = text.trim().to_string();
                if text.is_empty() {
                    return Err(PipelineError::recognition("no speech recognized", false));
                }
                debug!(chars = text.chars().count(), "transcribed");
                text
            }
        };

        let history = truncate_history(
            self.history.get_history(&session_id).await?,
            settings.history_turns,
        );
        let messages = self.build_messages(&history, &user_text);

        Ok(RunContext {
            session_id,
            user_text,
            voice,
            subtitles: request.subtitles.unwrap_or(settings.subtitles),
            messages,
        })
    }

    fn build_messages(&self, history: &[Turn], user_text: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt()));
        messages.extend(history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(user_text));
        messages
    }

    fn system_prompt(&self) -> String {
        let settings = &self.settings;
        let mut prompt = format!(
            "{}\nInsert \"{}\" between spoken clauses wherever a speaker would pause.",
            settings.system_prompt, settings.delimiter
        );
        if settings.reply_format == ReplyFormat::Json {
            prompt.push_str(
                "\nAnswer only with a JSON object: {\"zh\": \"<reply>\", \"POJ\": \"<romanization>\"}.",
            );
        }
        prompt
    }

    /// One non-streaming generation call, interpreted per the reply format.
    async fn generate_full(&self, messages: &[ChatMessage]) -> Result<GeneratedReply> {
        let raw = with_retry(self.settings.retry, "generation", || {
            self.generator.chat(messages)
        })
        .await?;
        self.interpret(raw)
    }

    fn interpret(&self, raw: String) -> Result<GeneratedReply> {
        let reply = match self.settings.reply_format {
            ReplyFormat::Plain => GeneratedReply::plain(raw),
            ReplyFormat::Json => {
                let parsed = self.reply_parser.parse(&raw);
                if parsed.provenance != Provenance::Strict {
                    warn!(provenance = ?parsed.provenance, "reply was not valid JSON");
                }
                let romanization = Some(parsed.value.romanization).filter(|r| !r.is_empty());
                GeneratedReply {
                    raw,
                    text: parsed.value.text,
                    romanization,
                }
            }
        };
        if reply.text.trim().is_empty() {
            return Err(PipelineError::generation("empty reply", false));
        }
        Ok(reply)
    }

    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        with_retry(self.settings.retry, "generation stream", || {
            self.generator.chat_stream(messages)
        })
        .await
    }

    /// Store the clip and build the client-visible event for a segment.
    async fn segment_event(
        &self,
        segment: &SpeechSegment,
        clip: SynthesizedClip,
        subtitles: bool,
    ) -> SegmentEvent {
        let mut event = SegmentEvent {
            index: segment.index,
            text: segment.text.clone(),
            audio_ref: None,
            duration_seconds: None,
            subtitle_cues: None,
            error: clip.error.clone(),
        };
        if clip.is_degraded() {
            return event;
        }

        let hint = format!("segment{}", segment.index);
        match self.clips.put(&hint, &clip.audio, clip.content_type).await {
            Ok(reference) => event.audio_ref = Some(reference),
            Err(e) => {
                warn!(segment = segment.index, error = %e, "failed to store clip");
                event.error = Some(e.message());
                return event;
            }
        }
        event.duration_seconds = clip.duration_seconds;
        if subtitles {
            event.subtitle_cues = Some(self.subtitles.allocate(&segment.text, clip.duration_seconds));
        }
        event
    }

    async fn record_exchange(&self, ctx: &RunContext, reply: &str) {
        for turn in [Turn::user(&ctx.user_text), Turn::assistant(reply)] {
            if let Err(e) = self.history.append_turn(&ctx.session_id, turn).await {
                warn!(session = %ctx.session_id, error = %e, "failed to record history");
                return;
            }
        }
    }
}

/// State of one streaming run, advanced one event per poll.
struct StreamRun {
    orchestrator: Orchestrator,
    request: Option<ReplyRequest>,
    tracker: StateTracker,
    ctx: Option<RunContext>,
    dispatcher: Option<SequentialDispatcher>,
    source: Option<TextStream>,
    segmenter: StreamSegmenter,
    queue: VecDeque<SpeechSegment>,
    delivered: Vec<SegmentEvent>,
    /// Set when the whole reply came from one non-streaming call.
    full_reply: Option<GeneratedReply>,
    exhausted: bool,
    finished: bool,
}

impl StreamRun {
    fn new(orchestrator: Orchestrator, request: ReplyRequest) -> Self {
        let segmenter = StreamSegmenter::new(&orchestrator.settings.delimiter);
        Self {
            orchestrator,
            request: Some(request),
            tracker: StateTracker::new(),
            ctx: None,
            dispatcher: None,
            source: None,
            segmenter,
            queue: VecDeque::new(),
            delivered: Vec::new(),
            full_reply: None,
            exhausted: false,
            finished: false,
        }
    }

    async fn next_event(&mut self) -> Option<PipelineEvent> {
        if self.finished {
            return None;
        }
        let event = match self.advance().await {
            Ok(event) => event,
            Err(e) => self.fail(e),
        };
        if event.is_terminal() {
            self.finished = true;
            self.source = None;
        }
        Some(event)
    }

    async fn advance(&mut self) -> Result<PipelineEvent> {
        if let Some(request) = self.request.take() {
            self.start(request).await?;
        }
        loop {
            if let Some(segment) = self.queue.pop_front() {
                let event = self.deliver(segment).await;
                self.delivered.push(event.clone());
                return Ok(PipelineEvent::Segment(event));
            }
            if self.exhausted {
                return self.complete().await;
            }
            self.pull().await?;
        }
    }

    async fn start(&mut self, request: ReplyRequest) -> Result<()> {
        let ctx = self.orchestrator.prepare(request, &mut self.tracker).await?;
        self.dispatcher = Some(SequentialDispatcher::new(
            self.orchestrator.synthesizer.clone(),
            self.orchestrator.settings.retry,
        ));
        self.tracker.enter(PipelineState::Generating);

        let messages = ctx.messages.clone();
        self.ctx = Some(ctx);

        if self.orchestrator.settings.reply_format == ReplyFormat::Json {
            // Structured replies must be parsed whole before anything is spoken.
            let reply = self.orchestrator.generate_full(&messages).await?;
            self.queue
                .extend(segment_text(&reply.text, &self.orchestrator.settings.delimiter));
            self.full_reply = Some(reply);
            self.exhausted = true;
            return Ok(());
        }

        match self.orchestrator.open_stream(&messages).await {
            Ok(stream) => self.source = Some(stream),
            Err(e) => {
                warn!(error = %e, "generation stream unavailable, falling back to a single reply");
                self.fall_back(&messages).await?;
            }
        }
        Ok(())
    }

    /// Replace the stream with one non-streaming call spoken as one segment.
    async fn fall_back(&mut self, messages: &[ChatMessage]) -> Result<()> {
        self.source = None;
        let reply = self.orchestrator.generate_full(messages).await?;
        let delimiter = &self.orchestrator.settings.delimiter;
        let spoken = reply.text.replace(delimiter.as_str(), " ");
        let mut segmenter = StreamSegmenter::new(delimiter);
        segmenter.feed(&spoken);
        self.queue.extend(segmenter.flush());
        self.full_reply = Some(reply);
        self.exhausted = true;
        Ok(())
    }

    /// Read one delta from the stream.
    async fn pull(&mut self) -> Result<()> {
        self.tracker.enter(PipelineState::Generating);
        let Some(source) = self.source.as_mut() else {
            self.exhausted = true;
            return Ok(());
        };
        match source.next().await {
            Some(Ok(delta)) => {
                let segments = self.segmenter.feed(&delta);
                self.queue.extend(segments);
            }
            Some(Err(e)) if self.segmenter.emitted() == 0 => {
                warn!(error = %e, "generation stream failed before any segment, falling back");
                let messages = self
                    .ctx
                    .as_ref()
                    .map(|ctx| ctx.messages.clone())
                    .unwrap_or_default();
                self.fall_back(&messages).await?;
            }
            Some(Err(e)) => {
                self.source = None;
                return Err(e);
            }
            None => {
                self.source = None;
                self.exhausted = true;
                self.queue.extend(self.segmenter.flush());
            }
        }
        Ok(())
    }

    async fn deliver(&mut self, segment: SpeechSegment) -> SegmentEvent {
        self.tracker.enter(PipelineState::Synthesizing);
        let subtitles = self.ctx.as_ref().is_some_and(|ctx| ctx.subtitles);
        let voice = self.ctx.as_ref().map(|ctx| ctx.voice.clone());

        let clip = match (self.dispatcher.clone(), voice) {
            (Some(dispatcher), Some(voice)) => {
                let owned = segment.clone();
                // Own task: an in-flight call finishes even if the stream is dropped.
                let task =
                    tokio::spawn(async move { dispatcher.synthesize_one(&owned, &voice).await });
                match task.await {
                    Ok(clip) => clip,
                    Err(e) => SynthesizedClip::degraded(
                        segment.index,
                        format!("synthesis task failed: {e}"),
                    ),
                }
            }
            _ => SynthesizedClip::degraded(segment.index, "run not started"),
        };

        self.orchestrator
            .segment_event(&segment, clip, subtitles)
            .await
    }

    async fn complete(&mut self) -> Result<PipelineEvent> {
        let Some(ctx) = self.ctx.as_ref() else {
            return Err(PipelineError::Other("run completed without context".to_string()));
        };
        if self.delivered.is_empty() {
            return Err(PipelineError::generation("empty reply", false));
        }
        let reply = match self.full_reply.take() {
            Some(reply) => reply,
            None => GeneratedReply::plain(self.segmenter.full_text().to_string()),
        };

        self.orchestrator.record_exchange(ctx, &reply.raw).await;
        self.tracker.enter(PipelineState::Completed);

        Ok(PipelineEvent::Complete {
            session_id: ctx.session_id.clone(),
            text: reply.text,
            romanization: reply.romanization,
            segments: std::mem::take(&mut self.delivered),
        })
    }

    fn fail(&mut self, error: PipelineError) -> PipelineEvent {
        self.tracker.enter(PipelineState::Failed(error.kind()));
        PipelineEvent::Error {
            kind: error.kind(),
            message: error.message(),
            retryable: error.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::llm::MockGenerator;
    use crate::pipeline::sink::MemoryClipStore;
    use crate::session::InMemoryHistoryStore;
    use crate::stt::MockTranscriber;
    use crate::tts::MockSynthesizer;

    struct Fixture {
        transcriber: Arc<MockTranscriber>,
        generator: Arc<MockGenerator>,
        synthesizer: Arc<MockSynthesizer>,
        history: Arc<InMemoryHistoryStore>,
        clips: Arc<MemoryClipStore>,
    }

    impl Fixture {
        fn new(generator: MockGenerator, synthesizer: MockSynthesizer) -> Self {
            Self {
                transcriber: Arc::new(MockTranscriber::new().with_response("lí hó")),
                generator: Arc::new(generator),
                synthesizer: Arc::new(synthesizer),
                history: Arc::new(InMemoryHistoryStore::new()),
                clips: Arc::new(MemoryClipStore::new()),
            }
        }

        fn orchestrator(&self, settings: OrchestratorSettings) -> Orchestrator {
            let collaborators = Collaborators {
                transcriber: self.transcriber.clone(),
                generator: self.generator.clone(),
                synthesizer: self.synthesizer.clone(),
                history: self.history.clone(),
                clips: self.clips.clone(),
            };
            Orchestrator::new(collaborators, settings).unwrap()
        }
    }

    async fn collect(orchestrator: &Orchestrator, request: ReplyRequest) -> Vec<PipelineEvent> {
        orchestrator.stream_reply(request).collect().await
    }

    #[tokio::test]
    async fn system_prompt_names_delimiter() {
        let fixture = Fixture::new(MockGenerator::new(), MockSynthesizer::new());
        let orchestrator = fixture.orchestrator(OrchestratorSettings::default());
        let prompt = orchestrator.system_prompt();
        assert!(prompt.starts_with(defaults::SYSTEM_PROMPT));
        assert!(prompt.contains("\"|\""));
        assert!(!prompt.contains("POJ"));
    }

    #[tokio::test]
    async fn json_prompt_asks_for_fields() {
        let fixture = Fixture::new(MockGenerator::new(), MockSynthesizer::new());
        let settings = OrchestratorSettings {
            reply_format: ReplyFormat::Json,
            ..Default::default()
        };
        let prompt = fixture.orchestrator(settings).system_prompt();
        assert!(prompt.contains("\"zh\""));
        assert!(prompt.contains("\"POJ\""));
    }

    #[tokio::test]
    async fn stream_ends_with_single_terminal_event() {
        let fixture = Fixture::new(
            MockGenerator::new().with_deltas(&["Hel", "lo|Wor", "ld|"]),
            MockSynthesizer::new(),
        );
        let orchestrator = fixture.orchestrator(OrchestratorSettings::default());
        let events = collect(&orchestrator, ReplyRequest::text("hi")).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events[2].is_terminal());
        let PipelineEvent::Complete { text, segments, .. } = &events[2] else {
            panic!("expected complete, got {:?}", events[2]);
        };
        assert_eq!(text, "Hello|World|");
        assert_eq!(segments.len(), 2);
    }

    #[tokio::test]
    async fn validation_error_is_the_only_event() {
        let fixture = Fixture::new(MockGenerator::new(), MockSynthesizer::new());
        let orchestrator = fixture.orchestrator(OrchestratorSettings::default());
        let events = collect(&orchestrator, ReplyRequest::text("hi").with_rate(2.5)).await;

        assert_eq!(events.len(), 1);
        let PipelineEvent::Error { kind, retryable, .. } = &events[0] else {
            panic!("expected error");
        };
        assert_eq!(*kind, ErrorKind::Validation);
        assert!(!retryable);
        assert_eq!(fixture.generator.stream_calls(), 0);
    }

    #[tokio::test]
    async fn oversized_audio_is_rejected_before_recognition() {
        let fixture = Fixture::new(MockGenerator::new(), MockSynthesizer::new());
        let settings = OrchestratorSettings {
            max_input_bytes: 4,
            ..Default::default()
        };
        let orchestrator = fixture.orchestrator(settings);
        let err = orchestrator
            .reply(ReplyRequest::audio(vec![0; 5]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(fixture.transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn empty_transcription_is_recognition_error() {
        let mut fixture = Fixture::new(MockGenerator::new(), MockSynthesizer::new());
        fixture.transcriber = Arc::new(MockTranscriber::new().with_response("   "));
        let orchestrator = fixture.orchestrator(OrchestratorSettings::default());
        let err = orchestrator
            .reply(ReplyRequest::audio(vec![1, 2, 3]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Recognition);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn aggregate_merges_clips_and_offsets_cues() {
        let fixture = Fixture::new(
            MockGenerator::new().with_response("ab|cdef"),
            MockSynthesizer::new(),
        );
        let orchestrator = fixture.orchestrator(OrchestratorSettings::default());
        let reply = orchestrator.reply(ReplyRequest::text("hi")).await.unwrap();

        // 0.1 s per character from the mock synthesizer
        let duration = reply.duration_seconds.unwrap();
        assert!((duration - 0.6).abs() < 1e-6);
        assert_eq!(reply.subtitle_cues.len(), 2);
        assert!((reply.subtitle_cues[1].start_time - 0.2).abs() < 1e-6);
        assert!((reply.subtitle_cues[1].end_time - 0.6).abs() < 1e-6);
        assert_eq!(fixture.clips.len(), 1);
        assert_eq!(fixture.clips.get(&reply.audio_ref).map(|a| a.len() > 44), Some(true));
    }

    #[tokio::test]
    async fn aggregate_uses_server_batch_when_supported() {
        let fixture = Fixture::new(
            MockGenerator::new().with_response("ab|cd"),
            MockSynthesizer::new().with_batch(),
        );
        let settings = OrchestratorSettings {
            server_batch: true,
            ..Default::default()
        };
        let orchestrator = fixture.orchestrator(settings);
        let reply = orchestrator.reply(ReplyRequest::text("hi")).await.unwrap();

        assert_eq!(fixture.synthesizer.batch_calls(), 1);
        assert_eq!(fixture.synthesizer.calls(), 0);
        assert!(reply.duration_seconds.is_some());
        let texts: Vec<_> = reply.subtitle_cues.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["ab", "cd"]);
    }

    #[tokio::test]
    async fn aggregate_without_subtitles() {
        let fixture = Fixture::new(
            MockGenerator::new().with_response("ab|cd"),
            MockSynthesizer::new(),
        );
        let orchestrator = fixture.orchestrator(OrchestratorSettings::default());
        let reply = orchestrator
            .reply(ReplyRequest::text("hi").with_subtitles(false))
            .await
            .unwrap();
        assert!(reply.subtitle_cues.is_empty());
    }

    #[tokio::test]
    async fn empty_generated_reply_fails() {
        let fixture = Fixture::new(
            MockGenerator::new().with_response(" | | "),
            MockSynthesizer::new(),
        );
        let orchestrator = fixture.orchestrator(OrchestratorSettings::default());

        let err = orchestrator.reply(ReplyRequest::text("hi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generation);

        let events = collect(&orchestrator, ReplyRequest::text("hi")).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            PipelineEvent::Error {
                kind: ErrorKind::Generation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn settings_follow_config() {
        let mut config = Config::default();
        config.pipeline.retry_attempts = 5;
        config.pipeline.retry_delay = "20ms".to_string();
        config.speech.speaker = "a-ma".to_string();
        config.services.server_batch = true;

        let settings = OrchestratorSettings::from_config(&config).unwrap();
        assert_eq!(settings.retry.attempts, 5);
        assert_eq!(settings.retry.delay, std::time::Duration::from_millis(20));
        assert_eq!(settings.voice.speaker, "a-ma");
        assert!(settings.server_batch);
    }

    #[tokio::test]
    async fn streaming_alternates_generating_and_synthesizing() {
        let fixture = Fixture::new(
            MockGenerator::new().with_deltas(&["a", "|", "b", "|", "c"]),
            MockSynthesizer::new(),
        );
        let orchestrator = fixture.orchestrator(OrchestratorSettings::default());
        let mut run = StreamRun::new(orchestrator, ReplyRequest::text("hi"));
        let mut events = Vec::new();
        while let Some(event) = run.next_event().await {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(events[3], PipelineEvent::Complete { .. }));

        use PipelineState::{Completed, Generating, Synthesizing};
        assert_eq!(
            run.tracker.visited,
            vec![
                Generating,
                Synthesizing,
                Generating,
                Synthesizing,
                Generating,
                Synthesizing,
                Completed,
            ]
        );
    }

    #[tokio::test]
    async fn aggregate_uses_injected_dispatcher() {
        let fixture = Fixture::new(
            MockGenerator::new().with_response("ab|cd|ef"),
            MockSynthesizer::new().with_delay(std::time::Duration::from_millis(5)),
        );
        let orchestrator = fixture
            .orchestrator(OrchestratorSettings::default())
            .with_dispatcher(Arc::new(SequentialDispatcher::new(
                fixture.synthesizer.clone(),
                RetryPolicy::default(),
            )));
        let reply = orchestrator.reply(ReplyRequest::text("hi")).await.unwrap();

        assert_eq!(fixture.synthesizer.started(), vec!["ab", "cd", "ef"]);
        assert_eq!(fixture.synthesizer.peak_concurrency(), 1);
        assert!((reply.duration_seconds.unwrap() - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn aggregate_rejects_degraded_clips_from_any_strategy() {
        let fixture = Fixture::new(
            MockGenerator::new().with_response("ab|bad|ef"),
            MockSynthesizer::new().with_failure_for("bad"),
        );
        let orchestrator = fixture
            .orchestrator(OrchestratorSettings::default())
            .with_dispatcher(Arc::new(SequentialDispatcher::new(
                fixture.synthesizer.clone(),
                RetryPolicy::default(),
            )));
        let err = orchestrator.reply(ReplyRequest::text("hi")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Synthesis);
        assert!(err.to_string().contains("segment 1"));
        assert!(fixture.clips.is_empty());
    }
}
