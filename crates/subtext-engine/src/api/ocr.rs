use std::fs;

use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use serde_json::Value;
use subtext_contracts::error::PipelineError;
use subtext_contracts::session::ImageRef;
use tracing::{debug, warn};

use super::{truncate_text, ApiClient, RawResponse};

pub const OCR_FAILED_SENTINEL: &str = "OCR failed.";
pub const NO_TEXT_SENTINEL: &str = "No text found.";

/// Bytes and multipart metadata for one screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

/// Read the image and settle its MIME type.
///
/// An explicit MIME type on the reference wins; otherwise the format is
/// sniffed from the bytes, falling back to JPEG when it is not recognised.
pub fn prepare_upload(image: &ImageRef) -> Result<ImageUpload, PipelineError> {
    let bytes = fs::read(image.path()).map_err(|err| {
        PipelineError::ExtractionFailure(format!(
            "failed reading {}: {err}",
            image.path().display()
        ))
    })?;
    if bytes.is_empty() {
        return Err(PipelineError::ExtractionFailure(format!(
            "{} is empty",
            image.path().display()
        )));
    }
    let mime_type = match image
        .mime_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(explicit) => explicit.to_string(),
        None => match image::guess_format(&bytes) {
            Ok(format) => format.to_mime_type().to_string(),
            Err(err) => {
                debug!(error = %err, "image format not recognised; using default mime");
                image.upload_mime().to_string()
            }
        },
    };
    Ok(ImageUpload {
        bytes,
        mime_type,
        file_name: image.upload_file_name().to_string(),
    })
}

/// Interpret an OCR endpoint reply. Status is checked before the body.
pub fn classify_ocr_response(status: u16, body: &str) -> Result<String, PipelineError> {
    match status {
        401 => {
            return Err(PipelineError::AuthRequired(
                "session expired".to_string(),
            ))
        }
        403 => return Err(PipelineError::SubscriptionRequired),
        200..=299 => {}
        code => {
            return Err(PipelineError::ExtractionFailure(format!(
                "OCR request failed ({code}): {}",
                truncate_text(body, 256)
            )))
        }
    }

    let payload: Value = serde_json::from_str(body).map_err(|err| {
        PipelineError::ExtractionFailure(format!("OCR returned invalid JSON: {err}"))
    })?;
    let text = payload
        .get("ParsedResults")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("ParsedText"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() || text == NO_TEXT_SENTINEL || text == OCR_FAILED_SENTINEL {
        let reason = if text.is_empty() { NO_TEXT_SENTINEL } else { text };
        return Err(PipelineError::ExtractionFailure(reason.to_string()));
    }
    Ok(text.to_string())
}

impl ApiClient {
    /// Upload a screenshot to `/ocr` and return the recognised text.
    pub fn recognize_text(&self, token: &str, image: &ImageRef) -> Result<String, PipelineError> {
        let upload = prepare_upload(image)?;
        let endpoint = self.endpoint("ocr");
        debug!(
            endpoint = %endpoint,
            mime = %upload.mime_type,
            bytes = upload.bytes.len(),
            "calling OCR"
        );
        let part = MultipartPart::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.mime_type)
            .map_err(|err| {
                PipelineError::ExtractionFailure(format!("invalid image mime type: {err}"))
            })?;
        let form = MultipartForm::new().part("image", part);

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .map_err(|err| {
                warn!(error = %err, "OCR transport error");
                PipelineError::ExtractionFailure(format!("OCR request failed: {err}"))
            })?;
        let raw = RawResponse::read(response).map_err(|err| {
            PipelineError::ExtractionFailure(format!("OCR response body read failed: {err}"))
        })?;
        debug!(status = raw.status, "OCR responded");
        classify_ocr_response(raw.status, &raw.body)
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use serde_json::json;
    use subtext_contracts::error::PipelineError;
    use subtext_contracts::session::ImageRef;

    use super::{classify_ocr_response, prepare_upload};
    use crate::api::mock_server::spawn_one_shot_server;
    use crate::api::ApiClient;
    use crate::config::ClientConfig;

    fn ocr_body(text: &str) -> String {
        json!({"ParsedResults": [{"ParsedText": text}]}).to_string()
    }

    #[test]
    fn returns_trimmed_text_on_success() {
        assert_eq!(
            classify_ocr_response(200, &ocr_body("  hey are you free?\n")),
            Ok("hey are you free?".to_string())
        );
    }

    #[test]
    fn unauthorized_wins_over_body() {
        assert!(matches!(
            classify_ocr_response(401, &ocr_body("perfectly good text")),
            Err(PipelineError::AuthRequired(_))
        ));
        assert!(matches!(
            classify_ocr_response(401, "not even json"),
            Err(PipelineError::AuthRequired(_))
        ));
    }

    #[test]
    fn forbidden_means_subscription_required() {
        assert_eq!(
            classify_ocr_response(403, r#"{"error":"Subscription required"}"#),
            Err(PipelineError::SubscriptionRequired)
        );
    }

    #[test]
    fn sentinels_and_blank_text_fail_extraction() {
        for text in ["OCR failed.", "No text found.", "   ", ""] {
            assert!(
                matches!(
                    classify_ocr_response(200, &ocr_body(text)),
                    Err(PipelineError::ExtractionFailure(_))
                ),
                "{text:?} should fail"
            );
        }
        // Sentinel matching is case-sensitive.
        assert_eq!(
            classify_ocr_response(200, &ocr_body("ocr failed.")),
            Ok("ocr failed.".to_string())
        );
    }

    #[test]
    fn malformed_payloads_fail_extraction() {
        for body in ["{}", r#"{"ParsedResults": []}"#, "<html>oops</html>"] {
            assert!(matches!(
                classify_ocr_response(200, body),
                Err(PipelineError::ExtractionFailure(_))
            ));
        }
        assert!(matches!(
            classify_ocr_response(500, &ocr_body("text")),
            Err(PipelineError::ExtractionFailure(_))
        ));
    }

    #[test]
    fn prepare_upload_sniffs_png() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("shot.png");
        let mut img = RgbImage::new(4, 4);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([20, 20, 20]);
        }
        img.save(&path)?;

        let upload = prepare_upload(&ImageRef::from_path(&path))
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(upload.mime_type, "image/png");
        assert_eq!(upload.file_name, "shot.png");
        Ok(())
    }

    #[test]
    fn prepare_upload_defaults_unknown_bytes_to_jpeg() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("blob");
        std::fs::write(&path, b"definitely not an image")?;
        let upload = prepare_upload(&ImageRef::from_path(&path))
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(upload.mime_type, "image/jpeg");
        Ok(())
    }

    #[test]
    fn prepare_upload_missing_file_fails_extraction() {
        let result = prepare_upload(&ImageRef::from_path("/nonexistent/shot.png"));
        assert!(matches!(result, Err(PipelineError::ExtractionFailure(_))));
    }

    #[test]
    fn recognize_text_sends_bearer_multipart() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("shot.jpg");
        std::fs::write(&path, b"jpeg-ish bytes")?;

        let (base, requests) = spawn_one_shot_server("200 OK", &ocr_body("hey you up?"));
        let client = ApiClient::new(ClientConfig::default().with_api_base(&base))?;
        let text = client
            .recognize_text("token-0123456789", &ImageRef::from_path(&path))
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(text, "hey you up?");

        let request = requests.recv()?;
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/ocr");
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer token-0123456789")
        );
        assert!(request
            .headers
            .get("content-type")
            .is_some_and(|value| value.starts_with("multipart/form-data")));
        assert!(request.body_text().contains("name=\"image\""));
        Ok(())
    }

    #[test]
    fn recognize_text_maps_unauthorized() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("shot.jpg");
        std::fs::write(&path, b"jpeg-ish bytes")?;

        let (base, _requests) =
            spawn_one_shot_server("401 Unauthorized", r#"{"error":"Invalid token"}"#);
        let client = ApiClient::new(ClientConfig::default().with_api_base(&base))?;
        let result = client.recognize_text("token-0123456789", &ImageRef::from_path(&path));
        assert!(matches!(result, Err(PipelineError::AuthRequired(_))));
        Ok(())
    }
}
