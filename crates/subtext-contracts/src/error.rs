use thiserror::Error;

/// Failure kinds a pipeline stage can report to the presentation layer.
///
/// Remote-call errors are converted into one of these at the stage boundary;
/// nothing from the transport is surfaced raw.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Manual input was blank.
    #[error("no text to analyze")]
    EmptyInput,

    /// OCR produced no usable text.
    #[error("text extraction failed: {0}")]
    ExtractionFailure(String),

    /// Extract endpoint output could not be segmented. Always recovered internally.
    #[error("message segmentation failed: {0}")]
    SegmentationFailure(String),

    /// Analyze endpoint failed or returned no content.
    #[error("analysis failed: {0}")]
    AnalysisFailure(String),

    /// Stored credential missing, malformed or rejected.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The OCR endpoint reported that the account has no active subscription.
    #[error("subscription required")]
    SubscriptionRequired,
}

/// Alert title and body shown for a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserMessage {
    pub title: &'static str,
    pub body: &'static str,
}

impl PipelineError {
    pub fn user_message(&self) -> UserMessage {
        match self {
            Self::EmptyInput => UserMessage {
                title: "Error",
                body: "Please enter some text to analyze.",
            },
            Self::ExtractionFailure(_) => UserMessage {
                title: "OCR Failed",
                body: "Could not read text from the image. Try another screenshot or enter the text manually.",
            },
            Self::SegmentationFailure(_) | Self::AnalysisFailure(_) => UserMessage {
                title: "Analysis Error",
                body: "Failed to analyze the text.",
            },
            Self::AuthRequired(_) => UserMessage {
                title: "Session Expired",
                body: "Please login again",
            },
            Self::SubscriptionRequired => UserMessage {
                title: "Subscription Required",
                body: "Please subscribe to use this feature",
            },
        }
    }

    /// Short machine-readable kind, used in event logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyInput => "empty_input",
            Self::ExtractionFailure(_) => "extraction_failure",
            Self::SegmentationFailure(_) => "segmentation_failure",
            Self::AnalysisFailure(_) => "analysis_failure",
            Self::AuthRequired(_) => "auth_required",
            Self::SubscriptionRequired => "subscription_required",
        }
    }

    pub fn is_auth_required(&self) -> bool {
        matches!(self, Self::AuthRequired(_))
    }
}
