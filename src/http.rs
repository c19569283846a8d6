//! Plumbing shared by the recognition, generation and synthesis clients.

use crate::error::{PipelineError, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Builds the kind-specific error (`PipelineError::recognition` etc).
pub(crate) type ErrorCtor = fn(String, bool) -> PipelineError;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Config {
            message: format!("Failed to build HTTP client: {e}"),
        })
}

/// Join a configured base URL and an endpoint path.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub(crate) fn authorize(request: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) if !key.is_empty() => request.bearer_auth(key),
        _ => request,
    }
}

/// Server-side and throttling failures are worth another attempt.
pub(crate) fn status_is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub(crate) fn transport_error(make: ErrorCtor, service: &str, e: reqwest::Error) -> PipelineError {
    let retryable = e.is_connect() || e.is_timeout() || e.is_request() || e.is_body();
    make(format!("{service} request failed: {e}"), retryable)
}

/// Send a request and turn non-success statuses into classified errors.
pub(crate) async fn send(make: ErrorCtor, service: &str, request: RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(make, service, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let preview: String = body.chars().take(200).collect();
    Err(make(
        format!("{service} returned HTTP {}: {preview}", status.as_u16()),
        status_is_retryable(status),
    ))
}

/// Read `text`, falling back to `data.text`.
pub(crate) fn extract_text(value: &serde_json::Value) -> Option<String> {
    value
        .get("text")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or_else(|| value.get("data")?.get("text")?.as_str())
        .map(str::to_string)
}
