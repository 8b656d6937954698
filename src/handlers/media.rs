use anyhow::{anyhow, Result};
use teloxide::prelude::*;
use teloxide::types::FileId;

use crate::config::CONFIG;
use crate::llm::media::{download_media, validate_upload, EncodedImage};

fn is_image_file_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".png")
        || lower.ends_with(".jpg")
        || lower.ends_with(".jpeg")
        || lower.ends_with(".webp")
        || lower.ends_with(".heic")
}

/// Compressed photos first, then image documents sent "as file".
pub fn image_file_id(message: &Message) -> Option<FileId> {
    if let Some(photo_sizes) = message.photo() {
        if let Some(photo) = photo_sizes.last() {
            return Some(photo.file.id.clone());
        }
    }

    let document = message.document()?;
    let mime_is_image = document
        .mime_type
        .as_ref()
        .map(|mime| mime.essence_str().starts_with("image/"))
        .unwrap_or(false);
    let name_is_image = document
        .file_name
        .as_deref()
        .map(is_image_file_name)
        .unwrap_or(false);
    if mime_is_image || name_is_image {
        return Some(document.file.id.clone());
    }

    None
}

pub fn message_has_image(message: &Message) -> bool {
    image_file_id(message).is_some()
}

pub async fn get_file_url(bot: &Bot, file_id: &FileId) -> Result<String> {
    let file = bot.get_file(file_id.clone()).await?;
    Ok(format!(
        "https://api.telegram.org/file/bot{}/{}",
        CONFIG.bot_token, file.path
    ))
}

pub async fn download_telegram_image(bot: &Bot, file_id: &FileId) -> Result<EncodedImage> {
    let url = get_file_url(bot, file_id).await?;
    let bytes = download_media(&url, "telegram photo")
        .await
        .ok_or_else(|| anyhow!("failed to download the photo from Telegram"))?;
    Ok(validate_upload(&bytes, CONFIG.max_upload_bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_image_file_names() {
        assert!(is_image_file_name("Selfie.JPG"));
        assert!(is_image_file_name("me.webp"));
        assert!(!is_image_file_name("resume.pdf"));
        assert!(!is_image_file_name("png"));
    }
}
