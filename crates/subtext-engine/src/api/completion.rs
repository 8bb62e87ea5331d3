use serde_json::{json, Value};
use subtext_contracts::error::PipelineError;
use subtext_contracts::segmentation::SegmentedMessages;
use tracing::{debug, warn};

use super::{truncate_text, ApiClient, RawResponse};

/// The two endpoints that answer with a chat-completion shaped payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStage {
    Extract,
    Analyze,
}

impl CompletionStage {
    pub fn path(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Analyze => "analyze",
        }
    }

    fn failure(self, detail: String) -> PipelineError {
        match self {
            Self::Extract => PipelineError::SegmentationFailure(detail),
            Self::Analyze => PipelineError::AnalysisFailure(detail),
        }
    }
}

/// Pull `choices[0].message.content` out of a completion reply.
///
/// `401` is an auth failure for either stage; anything else that does not
/// yield non-empty content is the stage's own failure kind.
pub fn classify_completion_response(
    stage: CompletionStage,
    status: u16,
    body: &str,
) -> Result<String, PipelineError> {
    if status == 401 {
        return Err(PipelineError::AuthRequired("session expired".to_string()));
    }
    if !(200..300).contains(&status) {
        return Err(stage.failure(format!(
            "{} request failed ({status}): {}",
            stage.path(),
            truncate_text(body, 256)
        )));
    }
    let payload: Value = serde_json::from_str(body).map_err(|err| {
        stage.failure(format!("{} returned invalid JSON: {err}", stage.path()))
    })?;
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            stage.failure(format!(
                "{} response missing choices[0].message.content",
                stage.path()
            ))
        })
}

impl ApiClient {
    /// Ask `/extract` which lines of `raw_text` came from the other person.
    pub fn extract_messages(&self, token: &str, raw_text: &str) -> Result<String, PipelineError> {
        self.post_completion(CompletionStage::Extract, token, json!({ "rawText": raw_text }))
    }

    /// Send the partner's messages to `/analyze` and return its free-text verdict.
    pub fn analyze_messages(
        &self,
        token: &str,
        messages: &SegmentedMessages,
    ) -> Result<String, PipelineError> {
        self.post_completion(
            CompletionStage::Analyze,
            token,
            json!({ "messages": messages.as_slice() }),
        )
    }

    fn post_completion(
        &self,
        stage: CompletionStage,
        token: &str,
        payload: Value,
    ) -> Result<String, PipelineError> {
        let endpoint = self.endpoint(stage.path());
        debug!(endpoint = %endpoint, "calling completion endpoint");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .map_err(|err| {
                warn!(stage = stage.path(), error = %err, "completion transport error");
                stage.failure(format!("{} request failed: {err}", stage.path()))
            })?;
        let raw = RawResponse::read(response).map_err(|err| {
            stage.failure(format!("{} response body read failed: {err}", stage.path()))
        })?;
        debug!(stage = stage.path(), status = raw.status, "completion responded");
        classify_completion_response(stage, raw.status, &raw.body)
    }
}
