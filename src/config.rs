use crate::defaults;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub services: ServicesConfig,
    pub pipeline: PipelineSettings,
    pub speech: SpeechConfig,
    pub subtitles: SubtitleConfig,
    pub sessions: SessionConfig,
    pub output: OutputConfig,
    pub log_level: String,
}

/// Endpoints of the external recognition / generation / synthesis services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    pub asr_url: String,
    pub llm_url: String,
    pub tts_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Per-request timeout, e.g. "60s"
    pub request_timeout: String,
    /// Use the synthesis service's batch endpoint instead of client fan-out
    pub server_batch: bool,
}

/// Shape of the generation service's reply
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFormat {
    /// Plain text with pause delimiters
    Plain,
    /// JSON object with text and romanization fields
    Json,
}

/// Pipeline behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub delimiter: String,
    pub history_turns: usize,
    pub retry_attempts: u32,
    /// Delay between attempts, e.g. "0s", "250ms"
    pub retry_delay: String,
    pub batch_pool_size: usize,
    pub max_input_bytes: usize,
    pub reply_format: ReplyFormat,
    pub system_prompt: String,
}

/// Default voice parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechConfig {
    pub language: String,
    pub speaker: String,
    pub rate: f32,
    pub subtitles: bool,
}

/// Subtitle allocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubtitleConfig {
    pub punctuation: String,
    pub seconds_per_char: f64,
}

/// Session reaping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl: String,
    pub sweep_interval: String,
}

/// Where synthesized artifacts go
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub audio_dir: PathBuf,
    pub url_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services: ServicesConfig::default(),
            pipeline: PipelineSettings::default(),
            speech: SpeechConfig::default(),
            subtitles: SubtitleConfig::default(),
            sessions: SessionConfig::default(),
            output: OutputConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            asr_url: "http://127.0.0.1:9000".to_string(),
            llm_url: "http://127.0.0.1:9001".to_string(),
            tts_url: "http://127.0.0.1:9002".to_string(),
            api_key: None,
            model: None,
            request_timeout: format!("{}s", defaults::REQUEST_TIMEOUT_SECS),
            server_batch: false,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            delimiter: defaults::DELIMITER.to_string(),
            history_turns: defaults::HISTORY_TURNS,
            retry_attempts: defaults::RETRY_ATTEMPTS,
            retry_delay: "0s".to_string(),
            batch_pool_size: defaults::BATCH_POOL_SIZE,
            max_input_bytes: defaults::MAX_INPUT_BYTES,
            reply_format: ReplyFormat::Plain,
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: defaults::LANGUAGE.to_string(),
            speaker: defaults::SPEAKER.to_string(),
            rate: defaults::RATE,
            subtitles: true,
        }
    }
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            punctuation: defaults::SUBTITLE_PUNCTUATION.to_string(),
            seconds_per_char: defaults::SECONDS_PER_CHAR,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: "24h".to_string(),
            sweep_interval: "10m".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("uploads"),
            url_prefix: defaults::URL_PREFIX.to_string(),
        }
    }
}

/// Parse a duration string ("0s", "250ms", "24h", or a bare number of seconds).
pub fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).map_err(|e| PipelineError::Config {
        message: format!("{key}: {e}"),
    })
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(PipelineError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - MINTAI_ASR_URL → services.asr_url
    /// - MINTAI_LLM_URL → services.llm_url
    /// - MINTAI_TTS_URL → services.tts_url
    /// - MINTAI_API_KEY → services.api_key
    /// - MINTAI_SPEAKER → speech.speaker
    /// - MINTAI_LANGUAGE → speech.language
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env_value("MINTAI_ASR_URL") {
            self.services.asr_url = url;
        }
        if let Some(url) = env_value("MINTAI_LLM_URL") {
            self.services.llm_url = url;
        }
        if let Some(url) = env_value("MINTAI_TTS_URL") {
            self.services.tts_url = url;
        }
        if let Some(key) = env_value("MINTAI_API_KEY") {
            self.services.api_key = Some(key);
        }
        if let Some(speaker) = env_value("MINTAI_SPEAKER") {
            self.speech.speaker = speaker;
        }
        if let Some(language) = env_value("MINTAI_LANGUAGE") {
            self.speech.language = language;
        }
        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(PipelineError::Config {
                message: message.to_string(),
            })
        };
        if self.pipeline.delimiter.is_empty() {
            return invalid("pipeline.delimiter must not be empty");
        }
        if self.pipeline.retry_attempts == 0 {
            return invalid("pipeline.retry_attempts must be at least 1");
        }
        if self.pipeline.batch_pool_size == 0 {
            return invalid("pipeline.batch_pool_size must be at least 1");
        }
        if !(defaults::MIN_RATE..=defaults::MAX_RATE).contains(&self.speech.rate) {
            return invalid("speech.rate must be between 0.5 and 2.0");
        }
        if self.subtitles.seconds_per_char <= 0.0 {
            return invalid("subtitles.seconds_per_char must be positive");
        }
        self.retry_delay()?;
        self.request_timeout()?;
        self.session_ttl()?;
        self.sweep_interval()?;
        Ok(())
    }

    pub fn retry_delay(&self) -> Result<Duration> {
        parse_duration("pipeline.retry_delay", &self.pipeline.retry_delay)
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration("services.request_timeout", &self.services.request_timeout)
    }

    pub fn session_ttl(&self) -> Result<Duration> {
        parse_duration("sessions.ttl", &self.sessions.ttl)
    }

    pub fn sweep_interval(&self) -> Result<Duration> {
        parse_duration("sessions.sweep_interval", &self.sessions.sweep_interval)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/mintai-voice/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mintai-voice").join("config.toml"))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
