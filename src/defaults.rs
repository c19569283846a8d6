//! Default configuration constants for mintai-voice.
//!
//! Shared by the configuration types and the pipeline stages so that both
//! agree on the same values when a setting is left unspecified.

/// Pause delimiter the generation prompt asks the model to emit between
/// spoken clauses.
pub const DELIMITER: &str = "|";

/// Attempts per external call (first try included).
pub const RETRY_ATTEMPTS: u32 = 3;

/// Worker pool size for batch synthesis fan-out.
///
/// Small on purpose: the synthesis service runs one model instance.
pub const BATCH_POOL_SIZE: usize = 4;

/// Most recent turns passed to the generation service as context.
///
/// 20 turns is 10 user/assistant exchanges.
pub const HISTORY_TURNS: usize = 20;

/// Inactivity window after which a session is reaped.
pub const SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Interval between sweeper passes.
pub const SWEEP_INTERVAL_SECS: u64 = 10 * 60;

/// Largest accepted audio upload (50 MiB).
pub const MAX_INPUT_BYTES: usize = 50 * 1024 * 1024;

/// Timeout for a single request to an external service.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Speech duration estimate per character when the real duration is unknown.
pub const SECONDS_PER_CHAR: f64 = 0.08;

/// Characters that end a subtitle unit without being displayed.
pub const SUBTITLE_PUNCTUATION: &str = "，,。.!！?？、；;：:（）()【】[]\"'…—-";

/// Accepted speaking-rate range.
pub const MIN_RATE: f32 = 0.5;
pub const MAX_RATE: f32 = 2.0;

/// Default speaking rate.
pub const RATE: f32 = 1.0;

/// Default recognition language (Minnan).
pub const LANGUAGE: &str = "minnan";

/// Default synthesis speaker.
pub const SPEAKER: &str = "default";

/// Sample rate of synthesized speech returned by the mock synthesizer.
pub const SAMPLE_RATE: u32 = 16000;

/// Content type of every clip the pipeline produces.
pub const WAV_CONTENT_TYPE: &str = "audio/wav";

/// Prefix for audio references returned by the on-disk clip store.
pub const URL_PREFIX: &str = "/uploads";

/// Default system prompt; the delimiter instruction is appended at runtime.
pub const SYSTEM_PROMPT: &str = "You are a friendly assistant who answers in the \
user's dialect. Keep replies short and conversational.";
