use std::env;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_api_base: String,
    pub gemini_analysis_model: String,
    pub gemini_portrait_model: String,
    pub gemini_safety_settings: String,
    pub gemini_request_timeout: u64,
    pub gemini_max_retry_attempts: usize,
    pub max_upload_bytes: usize,
    pub rate_limit_seconds: u64,
    pub outfit_selection_timeout: u64,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

fn normalize_api_base(value: String) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_GEMINI_API_BASE.to_string();
    }
    trimmed.to_string()
}

const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Config {
            bot_token: env_string("BOT_TOKEN", ""),
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            gemini_api_base: normalize_api_base(env_string(
                "GEMINI_API_BASE",
                DEFAULT_GEMINI_API_BASE,
            )),
            gemini_analysis_model: env_string("GEMINI_ANALYSIS_MODEL", "gemini-3-flash-preview"),
            gemini_portrait_model: env_string("GEMINI_PORTRAIT_MODEL", "gemini-2.5-flash-image"),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            gemini_request_timeout: env_u64("GEMINI_REQUEST_TIMEOUT", 120).max(1),
            gemini_max_retry_attempts: env_usize("GEMINI_MAX_RETRY_ATTEMPTS", 2).max(1),
            max_upload_bytes: env_usize("MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            rate_limit_seconds: env_u64("RATE_LIMIT_SECONDS", 10),
            outfit_selection_timeout: env_u64("OUTFIT_SELECTION_TIMEOUT", 600),
        })
    }
}

pub const FACE_ANALYSIS_PROMPT: &str = r#"Analyze this photo for a professional headshot application.
1. Detect the gender (male or female).
2. Check if the face is clear, front-facing, and suitable for editing.
Return JSON format: { "gender": "male" | "female", "isClear": boolean, "reason": "string if not clear" }"#;

/// `{outfit}` is replaced with the outfit instruction of the current request.
pub const PORTRAIT_SYSTEM_PROMPT: &str = r#"You are a professional image editing assistant.
Rules:
- Detect the face and work ONLY on that face.
- DO NOT change identity, age, gender, or facial features.
- Remove original background completely; replace with clean, light gray professional studio background.
- Head and pose correction: If tilted, rotate head upright and centered.
- Lighting: Brighten face and improve contrast naturally.
- Quality: Upscale and enhance resolution while maintaining eye/skin color.
- Outfit: {outfit}
- Output: High-res, photorealistic, professional portrait. No watermarks. No text."#;

pub const PORTRAIT_USER_PROMPT_PREFIX: &str =
    "Apply the professional headshot rules to this image. ";

pub const PORTRAIT_FILE_NAME: &str = "professional_headshot_proheadshot_ai.png";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_safety_profile_falls_back_to_permissive() {
        assert_eq!(
            normalize_gemini_safety_settings("strictest".to_string()),
            "permissive"
        );
        assert_eq!(
            normalize_gemini_safety_settings(" Standard ".to_string()),
            "standard"
        );
    }

    #[test]
    fn api_base_drops_trailing_slash() {
        assert_eq!(
            normalize_api_base("http://localhost:8080/".to_string()),
            "http://localhost:8080"
        );
        assert_eq!(normalize_api_base("  ".to_string()), DEFAULT_GEMINI_API_BASE);
    }
}
