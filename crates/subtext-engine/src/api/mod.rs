mod auth;
mod completion;
mod ocr;
mod subscription;

use anyhow::{Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::config::ClientConfig;

pub use auth::{AuthSession, MIN_PASSWORD_CHARS};
pub use completion::{classify_completion_response, CompletionStage};
pub use ocr::{classify_ocr_response, prepare_upload, ImageUpload, OCR_FAILED_SENTINEL, NO_TEXT_SENTINEL};
pub use subscription::SubscriptionPlan;

/// Blocking HTTP client for the SubText backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ClientConfig,
    http: HttpClient,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .context("failed building HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        self.config.endpoint(path)
    }
}

/// Status code and body text, read before any interpretation.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn read(response: HttpResponse) -> reqwest::Result<Self> {
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(Self { status, body })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as JSON, or `Null` when it is not JSON.
    pub fn json_or_null(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

pub(crate) fn response_json_or_error(label: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{label} response body read failed"))?;
    if !status.is_success() {
        anyhow::bail!("{label} request failed ({code}): {}", truncate_text(&body, 512));
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{label} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// First non-empty string among `keys` on a JSON object.
pub(crate) fn first_message(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
