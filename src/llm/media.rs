use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use tracing::{error, warn};

use crate::utils::http::get_http_client;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn normalize_image_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        _ => lowered,
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("the uploaded file is empty")]
    Empty,
    #[error("the uploaded file is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("the uploaded file is not a supported image (detected {0})")]
    NotAnImage(String),
    #[error("invalid base64 image payload: {0}")]
    InvalidPayload(String),
}

/// An image as a `data:<mime>;base64,<payload>` string, usable both inline
/// in API requests and for display.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    data_uri: String,
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime_type", &self.mime_type())
            .field("payload_len", &self.base64_payload().len())
            .finish()
    }
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        let mime_type = match detect_mime_type(bytes) {
            Some(mime) if mime.starts_with("image/") => normalize_image_mime_type(&mime),
            Some(other) => return Err(UploadError::NotAnImage(other)),
            None => return Err(UploadError::NotAnImage("unknown".to_string())),
        };
        Ok(Self::from_base64(
            &mime_type,
            &general_purpose::STANDARD.encode(bytes),
        ))
    }

    pub fn from_base64(mime_type: &str, payload: &str) -> Self {
        Self {
            data_uri: format!("data:{};base64,{}", mime_type, payload.trim()),
        }
    }

    /// Accepts either a full data URI or a bare base64 payload, which is
    /// assumed to be PNG.
    pub fn from_data_uri(text: &str) -> Result<Self, UploadError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(UploadError::Empty);
        }
        let image = if text.starts_with("data:") {
            Self {
                data_uri: text.to_string(),
            }
        } else {
            Self::from_base64("image/png", text)
        };
        general_purpose::STANDARD
            .decode(image.base64_payload())
            .map_err(|err| UploadError::InvalidPayload(err.to_string()))?;
        Ok(image)
    }

    pub fn as_data_uri(&self) -> &str {
        &self.data_uri
    }

    pub fn base64_payload(&self) -> &str {
        match self.data_uri.split_once(',') {
            Some((_, payload)) if !payload.is_empty() => payload,
            _ => &self.data_uri,
        }
    }

    pub fn mime_type(&self) -> &str {
        self.data_uri
            .strip_prefix("data:")
            .and_then(|rest| rest.split([';', ',']).next())
            .filter(|mime| !mime.is_empty())
            .unwrap_or("image/png")
    }

    pub fn decode(&self) -> Result<Vec<u8>, UploadError> {
        general_purpose::STANDARD
            .decode(self.base64_payload())
            .map_err(|err| UploadError::InvalidPayload(err.to_string()))
    }

    pub fn approx_len_bytes(&self) -> usize {
        self.base64_payload().len() / 4 * 3
    }
}

pub fn validate_upload(bytes: &[u8], max_bytes: usize) -> Result<EncodedImage, UploadError> {
    if max_bytes > 0 && bytes.len() > max_bytes {
        return Err(UploadError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    EncodedImage::from_bytes(bytes)
}

const MEDIA_DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const MEDIA_DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const MEDIA_DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// `label` is what gets logged in place of the URL, which may embed a token.
pub async fn download_media(url: &str, label: &str) -> Option<Vec<u8>> {
    let client = get_http_client();
    for attempt in 0..MEDIA_DOWNLOAD_MAX_ATTEMPTS {
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch media {label}: timeout={}, connect={}, status={:?}, attempt={}/{}",
                    err.is_timeout(),
                    err.is_connect(),
                    err.status(),
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if !should_retry_error(&err) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    return None;
                }
                let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Media download failed for {label} with status {}: {}",
                status,
                truncate_for_log(&body, MEDIA_DOWNLOAD_ERROR_BODY_LIMIT)
            );
            if !should_retry_status(status) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                return None;
            }
            let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
            tokio::time::sleep(delay).await;
            continue;
        }

        return match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(err) => {
                error!(
                    "Failed to read media bytes {label}: {err} (attempt={}/{})",
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    None
                } else {
                    let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
        };
    }

    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Smallest PNG signature plus IHDR chunk header; enough for `infer`.
    pub(crate) const PNG_BYTES: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00,
    ];

    const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00];

    #[test]
    fn encodes_png_as_data_uri() {
        let image = EncodedImage::from_bytes(PNG_BYTES).unwrap();
        assert!(image.as_data_uri().starts_with("data:image/png;base64,"));
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.decode().unwrap(), PNG_BYTES);
    }

    #[test]
    fn detects_jpeg_uploads() {
        let image = EncodedImage::from_bytes(JPEG_BYTES).unwrap();
        assert_eq!(image.mime_type(), "image/jpeg");
    }

    #[test]
    fn rejects_non_image_uploads() {
        let pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n1 0 obj";
        assert_eq!(
            EncodedImage::from_bytes(pdf),
            Err(UploadError::NotAnImage("application/pdf".to_string()))
        );
        assert_eq!(EncodedImage::from_bytes(&[]), Err(UploadError::Empty));
        assert!(matches!(
            EncodedImage::from_bytes(b"just some text"),
            Err(UploadError::NotAnImage(_))
        ));
    }

    #[test]
    fn enforces_upload_size_limit() {
        assert_eq!(
            validate_upload(PNG_BYTES, 8),
            Err(UploadError::TooLarge {
                size: PNG_BYTES.len(),
                limit: 8
            })
        );
        assert!(validate_upload(PNG_BYTES, 0).is_ok());
        assert!(validate_upload(PNG_BYTES, 1024).is_ok());
    }

    #[test]
    fn bare_base64_is_treated_as_png() {
        let payload = general_purpose::STANDARD.encode(PNG_BYTES);
        let image = EncodedImage::from_data_uri(&payload).unwrap();
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.base64_payload(), payload);
    }

    #[test]
    fn payload_strips_data_uri_prefix() {
        let image = EncodedImage::from_base64("image/webp", "AAAA");
        assert_eq!(image.base64_payload(), "AAAA");
        assert_eq!(image.mime_type(), "image/webp");
        assert_eq!(image.approx_len_bytes(), 3);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(
            EncodedImage::from_data_uri("data:image/png;base64,***"),
            Err(UploadError::InvalidPayload(_))
        ));
    }
}
