use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const EXTRACTED_MESSAGES_START: &str = "EXTRACTED_MESSAGES_START";
pub const EXTRACTED_MESSAGES_END: &str = "EXTRACTED_MESSAGES_END";

/// Lines at or below this many characters are dropped.
const MIN_MESSAGE_CHARS: usize = 3;

/// Ordered, non-empty sequence of conversation-partner messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SegmentedMessages(Vec<String>);

impl SegmentedMessages {
    /// The single-message sequence used whenever segmentation yields nothing.
    pub fn fallback(raw_text: impl Into<String>) -> Self {
        Self(vec![raw_text.into()])
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl TryFrom<Vec<String>> for SegmentedMessages {
    type Error = String;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err("segmented messages must not be empty".to_string());
        }
        Ok(Self(value))
    }
}

impl From<SegmentedMessages> for Vec<String> {
    fn from(value: SegmentedMessages) -> Self {
        value.0
    }
}

/// Pull partner messages out of an extract-endpoint response.
///
/// Errors describe why the response could not be used; callers fall back to
/// the raw text rather than surfacing them.
pub fn extract_message_block(content: &str) -> Result<Vec<String>, PipelineError> {
    let Some(start) = content.find(EXTRACTED_MESSAGES_START) else {
        return Err(PipelineError::SegmentationFailure(format!(
            "missing {EXTRACTED_MESSAGES_START}"
        )));
    };
    let body_start = start + EXTRACTED_MESSAGES_START.len();
    let Some(end) = content[body_start..].find(EXTRACTED_MESSAGES_END) else {
        return Err(PipelineError::SegmentationFailure(format!(
            "missing {EXTRACTED_MESSAGES_END}"
        )));
    };
    let block = &content[body_start..body_start + end];
    if block.trim().is_empty() {
        return Err(PipelineError::SegmentationFailure(
            "empty message block".to_string(),
        ));
    }

    let messages: Vec<String> = block
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() > MIN_MESSAGE_CHARS)
        .filter(|line| !line.contains('[') && !line.contains(']'))
        .map(str::to_string)
        .collect();
    if messages.is_empty() {
        return Err(PipelineError::SegmentationFailure(
            "no message lines survived filtering".to_string(),
        ));
    }
    Ok(messages)
}

/// Segment `raw_text` using the extract endpoint's content, if any.
pub fn segment_messages(raw_text: &str, response_content: Option<&str>) -> SegmentedMessages {
    response_content
        .ok_or_else(|| PipelineError::SegmentationFailure("no response content".to_string()))
        .and_then(extract_message_block)
        .map(SegmentedMessages)
        .unwrap_or_else(|_| SegmentedMessages::fallback(raw_text))
}
