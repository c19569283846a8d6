//! Generation over HTTP: `POST {llm_url}/chat-messages`, optionally streamed
//! as server-sent events.

use super::generator::{ChatMessage, Generator, TextStream};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::http::{self, ErrorCtor};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

const GENERATION: ErrorCtor = |message, retryable| PipelineError::generation(message, retryable);

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: Option<String>,
}

impl HttpGenerator {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            model,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http::build_client(config.request_timeout()?)?;
        Ok(Self::new(
            client,
            &config.services.llm_url,
            config.services.api_key.clone(),
            config.services.model.clone(),
        ))
    }

    async fn post(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let body = ChatRequest {
            messages,
            model: self.model.as_deref(),
            stream,
        };
        let request = self
            .client
            .post(http::endpoint(&self.base_url, "chat-messages"))
            .json(&body);
        http::send(
            GENERATION,
            "Generation service",
            http::authorize(request, self.api_key.as_deref()),
        )
        .await
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.post(messages, false).await?;
        let body: serde_json::Value = response.json().await.map_err(|e| {
            PipelineError::generation(format!("Malformed generation response: {e}"), false)
        })?;
        Ok(http::extract_text(&body).unwrap_or_default())
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let response = self.post(messages, true).await?;
        let bytes = response.bytes_stream();

        struct State<S> {
            bytes: S,
            decoder: SseDecoder,
            ready: VecDeque<SseEvent>,
            done: bool,
        }

        let state = State {
            bytes: Box::pin(bytes),
            decoder: SseDecoder::default(),
            ready: VecDeque::new(),
            done: false,
        };

        let stream = futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if state.done {
                    return None;
                }
                match state.ready.pop_front() {
                    Some(SseEvent::Delta(text)) => return Some((Ok(text), state)),
                    Some(SseEvent::Done) => {
                        debug!("generation stream finished");
                        state.done = true;
                        return None;
                    }
                    None => {}
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => state.ready.extend(state.decoder.push(&chunk)),
                    Some(Err(e)) => {
                        state.done = true;
                        let err = http::transport_error(GENERATION, "Generation stream", e);
                        return Some((Err(err), state));
                    }
                    // Body closed without [DONE]: drain whatever the last line held.
                    None => {
                        state.ready.extend(state.decoder.finish());
                        state.ready.push_back(SseEvent::Done);
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

/// Line-oriented decoder for `data: ...` event bodies.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network chunks decode intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(event) = decode_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Decode a trailing line that never got its newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.pending);
        decode_line(&String::from_utf8_lossy(&line))
            .into_iter()
            .collect()
    }
}

fn decode_line(line: &str) -> Option<SseEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => delta_text(&value).map(SseEvent::Delta),
        Err(_) => Some(SseEvent::Delta(payload.to_string())),
    }
}

/// Delta text from an OpenAI-style chunk or a bare `{delta}` / `{text}` one.
fn delta_text(value: &serde_json::Value) -> Option<String> {
    let text = value
        .pointer("/choices/0/delta/content")
        .or_else(|| value.get("delta"))
        .or_else(|| value.get("text"))?
        .as_str()?;
    (!text.is_empty()).then(|| text.to_string())
}
