use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{
    Config, FACE_ANALYSIS_PROMPT, PORTRAIT_SYSTEM_PROMPT, PORTRAIT_USER_PROMPT_PREFIX,
};
use crate::llm::media::{normalize_image_mime_type, EncodedImage};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;
use crate::workflow::{FaceAnalysis, Gender, PortraitBackend};

#[derive(Debug, thiserror::Error)]
#[error("Image generation failed: {0}")]
pub struct ImageGenerationError(pub String);

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(#[allow(dead_code)] Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawFaceAnalysis {
    #[serde(default)]
    gender: Option<String>,
    #[serde(default, rename = "isClear")]
    is_clear: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    api_base: String,
    analysis_model: String,
    portrait_model: String,
    safety_profile: String,
    request_timeout: Duration,
    max_attempts: usize,
}

const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;

fn gemini_should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gemini_should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using permissive defaults.",
                profile
            );
            "OFF"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
    ]
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn inline_image_part(image: &EncodedImage) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type(),
            "data": image.base64_payload(),
        }
    })
}

/// Inline payloads are replaced by their length so images never hit the logs.
fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_gemini_payload(payload: &Value, system_prompt_label: Option<&str>) -> Value {
    let mut summary = Map::new();

    if payload.pointer("/systemInstruction").is_some() {
        let label = system_prompt_label.unwrap_or("inline_system_prompt");
        summary.insert(
            "systemInstruction".to_string(),
            Value::String(label.to_string()),
        );
    }

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let role = content
                .get("role")
                .and_then(|value| value.as_str())
                .unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| summarize_gemini_parts(parts))
                .unwrap_or_default();
            summarized_contents.push(json!({ "role": role, "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;
    let mut finish_reasons = Vec::new();

    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        if let Some(reason) = &candidate.finish_reason {
            finish_reasons.push(reason.clone());
        }
        let parts = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[]);
        for part in parts {
            match part {
                GeminiPart::Text { text } => {
                    text_parts += 1;
                    if text_preview.is_none() && !text.trim().is_empty() {
                        text_preview = Some(truncate_for_log(text, 200));
                    }
                }
                GeminiPart::InlineData { inline_data } => {
                    if inline_data.mime_type.starts_with("image/") {
                        image_parts += 1;
                    }
                }
                GeminiPart::Other(_) => {}
            }
        }
    }

    json!({
        "candidates": candidates.len(),
        "finishReasons": finish_reasons,
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_text_from_response(response: &GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        let parts = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[]);
        for part in parts {
            if let GeminiPart::Text { text } = part {
                if !text.trim().is_empty() {
                    text_parts.push(text.as_str());
                }
            }
        }
    }
    text_parts.join("\n")
}

/// Only the first candidate is considered, and within it the first inline
/// image part.
fn extract_portrait_from_response(response: &GeminiResponse) -> Option<EncodedImage> {
    let candidate = response.candidates.as_deref()?.first()?;
    let parts = candidate.content.as_ref()?.parts.as_deref()?;
    parts.iter().find_map(|part| match part {
        GeminiPart::InlineData { inline_data } if !inline_data.data.trim().is_empty() => {
            let mime_type = if inline_data.mime_type.starts_with("image/") {
                normalize_image_mime_type(&inline_data.mime_type)
            } else {
                "image/png".to_string()
            };
            Some(EncodedImage::from_base64(&mime_type, &inline_data.data))
        }
        _ => None,
    })
}

fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Malformed or empty responses degrade to an unclear, unknown-gender result.
pub fn parse_face_analysis(text: &str) -> FaceAnalysis {
    let body = strip_json_fence(text);
    if body.is_empty() {
        warn!("Face analysis returned an empty body");
        return FaceAnalysis::unreadable();
    }

    match serde_json::from_str::<RawFaceAnalysis>(body) {
        Ok(raw) => FaceAnalysis {
            gender: raw
                .gender
                .as_deref()
                .map(Gender::from_label)
                .unwrap_or(Gender::Unknown),
            is_clear: raw.is_clear.unwrap_or(false),
            reason: raw
                .reason
                .map(|reason| reason.trim().to_string())
                .filter(|reason| !reason.is_empty()),
        },
        Err(err) => {
            warn!(
                "Failed to parse face analysis result: {err}; body={}",
                truncate_for_log(body, 300)
            );
            FaceAnalysis::unreadable()
        }
    }
}

fn build_analysis_payload(image: &EncodedImage, safety_profile: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                inline_image_part(image),
                { "text": FACE_ANALYSIS_PROMPT },
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "gender": { "type": "STRING", "enum": ["male", "female"] },
                    "isClear": { "type": "BOOLEAN" },
                    "reason": { "type": "STRING" },
                },
                "required": ["gender", "isClear"],
            },
        },
        "safetySettings": build_safety_settings(safety_profile),
    })
}

fn build_portrait_payload(
    image: &EncodedImage,
    outfit_instruction: &str,
    safety_profile: &str,
) -> Value {
    let system_prompt = PORTRAIT_SYSTEM_PROMPT.replace("{outfit}", outfit_instruction);
    json!({
        "systemInstruction": { "parts": [{ "text": system_prompt }] },
        "contents": [{
            "role": "user",
            "parts": [
                inline_image_part(image),
                { "text": format!("{}{}", PORTRAIT_USER_PROMPT_PREFIX, outfit_instruction) },
            ]
        }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
        },
        "safetySettings": build_safety_settings(safety_profile),
    })
}

impl GeminiClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.clone(),
            api_base: config.gemini_api_base.clone(),
            analysis_model: config.gemini_analysis_model.clone(),
            portrait_model: config.gemini_portrait_model.clone(),
            safety_profile: config.gemini_safety_settings.clone(),
            request_timeout: Duration::from_secs(config.gemini_request_timeout),
            max_attempts: config.gemini_max_retry_attempts.max(1),
        }
    }

    fn redact_api_key(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, model
        )
    }

    async fn call_gemini_api(
        &self,
        model: &str,
        payload: Value,
        system_prompt_label: Option<&str>,
    ) -> Result<GeminiResponse> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("GEMINI_API_KEY is not configured"));
        }
        let client = get_http_client();
        let url = self.endpoint(model);

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload, system_prompt_label);
            debug!(target: "llm.gemini", model = model, payload = %payload_summary);
        }

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .timeout(self.request_timeout)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let err_text = self.redact_api_key(&err.to_string());
                    let should_retry =
                        gemini_should_retry_error(&err) && attempt < self.max_attempts;
                    warn!(
                        "Gemini request failed to send: {} (timeout={}, connect={}, status={:?}, retrying={})",
                        err_text,
                        err.is_timeout(),
                        err.is_connect(),
                        err.status(),
                        should_retry
                    );
                    if should_retry {
                        tokio::time::sleep(gemini_retry_delay(attempt)).await;
                        continue;
                    }
                    return Err(anyhow!("Gemini request failed: {}", err_text));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&body);
                let should_retry =
                    gemini_should_retry_status(status) && attempt < self.max_attempts;
                warn!(
                    "Gemini API error: status={}, body={}, retrying={}",
                    status, body_summary, should_retry
                );
                if should_retry {
                    tokio::time::sleep(gemini_retry_delay(attempt)).await;
                    continue;
                }
                let detail = message.unwrap_or(body_summary);
                return Err(anyhow!(
                    "Gemini request failed with status {}: {}",
                    status,
                    detail
                ));
            }

            let value = response.json::<GeminiResponse>().await?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                let response_summary = summarize_gemini_response(&value);
                debug!(target: "llm.gemini", model = model, response = %response_summary);
            }
            return Ok(value);
        }
    }

    /// Transport and HTTP failures are errors; an unusable body is not.
    pub async fn analyze_face(&self, image: &EncodedImage) -> Result<FaceAnalysis> {
        let payload = build_analysis_payload(image, &self.safety_profile);
        let model = self.analysis_model.as_str();
        let metadata = json!({ "mimeType": image.mime_type(), "bytes": image.approx_len_bytes() });

        log_llm_timing("gemini", model, "analyze_face", Some(metadata), || async {
            let response = self.call_gemini_api(model, payload, None).await?;
            Ok(parse_face_analysis(&extract_text_from_response(&response)))
        })
        .await
    }

    pub async fn generate_portrait(
        &self,
        image: &EncodedImage,
        gender: Gender,
        outfit_instruction: &str,
    ) -> Result<EncodedImage, ImageGenerationError> {
        let payload = build_portrait_payload(image, outfit_instruction, &self.safety_profile);
        let model = self.portrait_model.as_str();
        let metadata = json!({ "gender": gender.as_str() });

        log_llm_timing("gemini", model, "generate_portrait", Some(metadata), || async {
            let response = self
                .call_gemini_api(model, payload, Some("PORTRAIT_SYSTEM_PROMPT"))
                .await?;
            extract_portrait_from_response(&response).ok_or_else(|| {
                let text = extract_text_from_response(&response);
                if !text.is_empty() {
                    warn!(
                        model = model,
                        "Portrait response carried text only: {}",
                        truncate_for_log(&text, 300)
                    );
                }
                anyhow!("No image data returned from Gemini.")
            })
        })
        .await
        .map_err(|err| ImageGenerationError(err.to_string()))
    }
}

#[async_trait]
impl PortraitBackend for GeminiClient {
    async fn analyze_face(&self, image: &EncodedImage) -> Result<FaceAnalysis> {
        GeminiClient::analyze_face(self, image).await
    }

    async fn generate_portrait(
        &self,
        image: &EncodedImage,
        gender: Gender,
        outfit_instruction: &str,
    ) -> Result<EncodedImage> {
        Ok(GeminiClient::generate_portrait(self, image, gender, outfit_instruction).await?)
    }
}
