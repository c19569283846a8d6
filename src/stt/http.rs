//! Recognition over HTTP: multipart upload to `{asr_url}/asr`.

use super::transcriber::Transcriber;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::http::{self, ErrorCtor};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::debug;

const RECOGNITION: ErrorCtor = |message, retryable| PipelineError::recognition(message, retryable);

pub struct HttpTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTranscriber {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http::build_client(config.request_timeout()?)?;
        Ok(Self::new(
            client,
            &config.services.asr_url,
            config.services.api_key.clone(),
        ))
    }

    fn audio_part(audio: &[u8]) -> Result<Part> {
        Part::bytes(audio.to_vec())
            .file_name("recording.wav")
            .mime_str(crate::defaults::WAV_CONTENT_TYPE)
            .map_err(|e| PipelineError::recognition(format!("Invalid upload part: {e}"), false))
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String> {
        // Some deployments read `file`, others `audio_file`.
        let form = Form::new()
            .part("file", Self::audio_part(audio)?)
            .part("audio_file", Self::audio_part(audio)?)
            .text("source_language", language.to_string());

        let request = self
            .client
            .post(http::endpoint(&self.base_url, "asr"))
            .multipart(form);
        let response = http::send(
            RECOGNITION,
            "Recognition service",
            http::authorize(request, self.api_key.as_deref()),
        )
        .await?;

        let body: serde_json::Value = response.json().await.map_err(|e| {
            PipelineError::recognition(format!("Malformed recognition response: {e}"), false)
        })?;
        let text = http::extract_text(&body).unwrap_or_default();
        debug!(chars = text.chars().count(), "recognition complete");
        Ok(text)
    }

    fn name(&self) -> &str {
        "http"
    }
}
