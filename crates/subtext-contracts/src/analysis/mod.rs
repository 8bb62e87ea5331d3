mod field_parser;

use serde::{Deserialize, Serialize};

use crate::segmentation::SegmentedMessages;

pub use field_parser::{parse_analysis, ParsedFields, BOLD_MARKER, UNKNOWN_BEHAVIOR_TYPE};

/// Raw analyze-endpoint text together with the messages it was produced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub combined_analysis: String,
    pub selected_messages: SegmentedMessages,
}

impl AnalysisResult {
    pub fn new(combined_analysis: impl Into<String>, selected_messages: SegmentedMessages) -> Self {
        Self {
            combined_analysis: combined_analysis.into(),
            selected_messages,
        }
    }

    /// Derive the display fields. Recomputed on every call.
    pub fn parsed(&self) -> ParsedFields {
        let mut fields = parse_analysis(&self.combined_analysis);
        fields.selected_messages = self.selected_messages.to_vec();
        fields
    }
}
