//! Synthesis over HTTP: `POST {tts_url}/tts` and `POST {tts_url}/tts/batch`.

use super::synthesizer::{Synthesizer, Voice};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::http::{self, ErrorCtor};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

const SYNTHESIS: ErrorCtor = |message, retryable| PipelineError::synthesis(message, retryable);

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    speaker: &'a str,
    speaking_rate: f32,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    segments: &'a [String],
    speaker: &'a str,
    speaking_rate: f32,
}

pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    server_batch: bool,
}

impl HttpSynthesizer {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        server_batch: bool,
    ) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            server_batch,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http::build_client(config.request_timeout()?)?;
        Ok(Self::new(
            client,
            &config.services.tts_url,
            config.services.api_key.clone(),
            config.services.server_batch,
        ))
    }

    /// Read audio from a response that is either the WAV itself or a JSON
    /// document pointing at it via `audio_url`.
    async fn audio_from(&self, response: reqwest::Response) -> Result<Vec<u8>> {
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if !is_json {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| http::transport_error(SYNTHESIS, "Synthesis service", e))?;
            return Ok(bytes.to_vec());
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            PipelineError::synthesis(format!("Malformed synthesis response: {e}"), false)
        })?;
        let url = body
            .get("audio_url")
            .or_else(|| body.get("data")?.get("audio_url"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| PipelineError::synthesis("Synthesis response carried no audio", false))?;
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            http::endpoint(&self.base_url, url)
        };

        debug!(url = %url, "fetching synthesized audio");
        let request = self.client.get(&url);
        let response = http::send(
            SYNTHESIS,
            "Synthesis audio fetch",
            http::authorize(request, self.api_key.as_deref()),
        )
        .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| http::transport_error(SYNTHESIS, "Synthesis audio fetch", e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: &Voice) -> Result<Vec<u8>> {
        let body = SynthesisRequest {
            text,
            speaker: &voice.speaker,
            speaking_rate: voice.rate,
        };
        let request = self
            .client
            .post(http::endpoint(&self.base_url, "tts"))
            .json(&body);
        let response = http::send(
            SYNTHESIS,
            "Synthesis service",
            http::authorize(request, self.api_key.as_deref()),
        )
        .await?;
        self.audio_from(response).await
    }

    fn supports_batch(&self) -> bool {
        self.server_batch
    }

    async fn synthesize_batch(&self, segments: &[String], voice: &Voice) -> Result<Vec<u8>> {
        let body = BatchRequest {
            segments,
            speaker: &voice.speaker,
            speaking_rate: voice.rate,
        };
        let request = self
            .client
            .post(http::endpoint(&self.base_url, "tts/batch"))
            .json(&body);
        let response = http::send(
            SYNTHESIS,
            "Synthesis batch service",
            http::authorize(request, self.api_key.as_deref()),
        )
        .await?;
        self.audio_from(response).await
    }

    fn name(&self) -> &str {
        "http"
    }
}
