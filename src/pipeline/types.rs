//! Data types flowing through the reply pipeline.

use crate::audio::probe_duration;
use crate::defaults;
use crate::error::ErrorKind;
use crate::subtitle::SubtitleCue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A delimiter-bounded unit of generated text.
///
/// Indices start at 0 and increase by one with no gaps within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub index: usize,
    pub text: String,
}

impl SpeechSegment {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// Synthesized audio for one segment.
///
/// A clip with `error` set and empty `audio` is degraded: the segment failed
/// but the run carried on.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedClip {
    pub segment_index: usize,
    pub audio: Vec<u8>,
    pub duration_seconds: Option<f64>,
    pub content_type: &'static str,
    pub error: Option<String>,
}

impl SynthesizedClip {
    pub fn new(segment_index: usize, audio: Vec<u8>) -> Self {
        Self {
            segment_index,
            duration_seconds: probe_duration(&audio),
            audio,
            content_type: defaults::WAV_CONTENT_TYPE,
            error: None,
        }
    }

    pub fn degraded(segment_index: usize, error: impl Into<String>) -> Self {
        Self {
            segment_index,
            audio: Vec::new(),
            duration_seconds: None,
            content_type: defaults::WAV_CONTENT_TYPE,
            error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// What the user said: recorded audio or already-typed text.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    Audio(Vec<u8>),
    Text(String),
}

/// One request for a spoken reply. Unset options fall back to configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyRequest {
    pub session_id: Option<String>,
    pub input: UserInput,
    pub language: Option<String>,
    pub speaker: Option<String>,
    pub rate: Option<f32>,
    pub subtitles: Option<bool>,
}

impl ReplyRequest {
    pub fn new(input: UserInput) -> Self {
        Self {
            session_id: None,
            input,
            language: None,
            speaker: None,
            rate: None,
            subtitles: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(UserInput::Text(text.into()))
    }

    pub fn audio(audio: Vec<u8>) -> Self {
        Self::new(UserInput::Audio(audio))
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_subtitles(mut self, enabled: bool) -> Self {
        self.subtitles = Some(enabled);
        self
    }
}

/// Client-visible result for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEvent {
    pub index: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_cues: Option<Vec<SubtitleCue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ordered events of a streaming run. Exactly one `Complete` or `Error`
/// ends every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Segment(SegmentEvent),
    Complete {
        session_id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        romanization: Option<String>,
        segments: Vec<SegmentEvent>,
    },
    Error {
        kind: ErrorKind,
        message: String,
        retryable: bool,
    },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Segment(_))
    }
}

/// Result of a non-streaming run: one merged audio artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReply {
    pub session_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub romanization: Option<String>,
    pub audio_ref: String,
    pub duration_seconds: Option<f64>,
    pub subtitle_cues: Vec<SubtitleCue>,
}

/// Lifecycle of one run, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    AwaitingInput,
    Transcribing,
    Generating,
    Synthesizing,
    Merging,
    Completed,
    Failed(ErrorKind),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingInput => write!(f, "awaiting_input"),
            Self::Transcribing => write!(f, "transcribing"),
            Self::Generating => write!(f, "generating"),
            Self::Synthesizing => write!(f, "synthesizing"),
            Self::Merging => write!(f, "merging"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(kind) => write!(f, "failed({kind:?})"),
        }
    }
}
