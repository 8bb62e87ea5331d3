use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const DEFAULT_UPLOAD_MIME: &str = "image/jpeg";
pub const DEFAULT_UPLOAD_FILE_NAME: &str = "image.jpg";

/// Screenshot picked by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub path: PathBuf,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

impl ImageRef {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Self {
            path,
            mime_type: None,
            file_name,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upload_mime(&self) -> &str {
        self.mime_type
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_UPLOAD_MIME)
    }

    pub fn upload_file_name(&self) -> &str {
        self.file_name
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_UPLOAD_FILE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSource {
    Image(ImageRef),
    ManualText { text: String },
}

/// What the user handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInput {
    pub source: InputSource,
}

impl RawInput {
    pub fn image(image: ImageRef) -> Self {
        Self {
            source: InputSource::Image(image),
        }
    }

    /// Pasted text. Blank text is rejected before any stage runs.
    pub fn manual_text(text: impl Into<String>) -> Result<Self, PipelineError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        Ok(Self {
            source: InputSource::ManualText { text },
        })
    }

    pub fn source_label(&self) -> &'static str {
        match self.source {
            InputSource::Image(_) => "image",
            InputSource::ManualText { .. } => "manual_text",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ImageRef, InputSource, RawInput, DEFAULT_UPLOAD_FILE_NAME, DEFAULT_UPLOAD_MIME};
    use crate::error::PipelineError;

    #[test]
    fn blank_manual_text_is_rejected() {
        assert_eq!(
            RawInput::manual_text("  \n\t").err(),
            Some(PipelineError::EmptyInput)
        );
    }

    #[test]
    fn manual_text_is_kept_verbatim() {
        let input = RawInput::manual_text("  hey you up?  ").unwrap();
        assert_eq!(
            input.source,
            InputSource::ManualText {
                text: "  hey you up?  ".to_string()
            }
        );
        assert_eq!(input.source_label(), "manual_text");
    }

    #[test]
    fn image_ref_defaults() {
        let image = ImageRef::from_path("/");
        assert_eq!(image.upload_mime(), DEFAULT_UPLOAD_MIME);
        assert_eq!(image.upload_file_name(), DEFAULT_UPLOAD_FILE_NAME);

        let named = ImageRef::from_path("/tmp/chat shot.png").with_mime_type("image/png");
        assert_eq!(named.upload_mime(), "image/png");
        assert_eq!(named.upload_file_name(), "chat shot.png");
    }
}
