use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId,
    ReplyParameters,
};
use tracing::{debug, error, info, warn};

use crate::config::{CONFIG, PORTRAIT_FILE_NAME};
use crate::handlers::access::is_rate_limited;
use crate::handlers::media::{download_telegram_image, image_file_id};
use crate::llm::media::EncodedImage;
use crate::state::{AppState, SessionKey};
use crate::utils::telegram::start_chat_action_heartbeat;
use crate::utils::timing::{complete_command_timer, start_command_timer, CommandTimer};
use crate::workflow::outfits::find_outfit;
use crate::workflow::{
    run_outfit_selection, run_upload, HeadshotSession, OutfitOption, ProgressSink, StepOutcome,
    WorkflowState, OUTFIT_TIP,
};

pub const OUTFIT_CALLBACK_PREFIX: &str = "outfit:";
pub const RESET_CALLBACK_DATA: &str = "headshot_reset";

pub const BUSY_MESSAGE: &str =
    "I'm still working on your previous photo. Please wait a moment.";
pub const START_OVER_MESSAGE: &str =
    "Ready for a new portrait. Send me a front-facing selfie with good lighting.";
const OUTFIT_EXPIRED_MESSAGE: &str =
    "Outfit selection expired. Send a new photo to start over.";
const STALE_MENU_MESSAGE: &str = "This menu is no longer active. Send a new photo to start over.";
const PORTRAIT_DELIVERED_MESSAGE: &str = "Your portrait is ready, see below.";
const UNSUPPORTED_UPLOAD_MESSAGE: &str =
    "Please send a photo: PNG, JPG or JPEG (Max 10MB).";

const RESULT_STEPS: [&str; 5] = [
    "Corrected head posture & alignment",
    "Replaced background with studio lighting",
    "Applied professional corporate attire",
    "Enhanced facial clarity & resolution",
    "Optimized lighting for business profile",
];

fn session_key(chat_id: ChatId, user: Option<&teloxide::types::User>) -> Option<SessionKey> {
    let user_id = i64::try_from(user?.id.0).ok()?;
    Some(SessionKey {
        chat_id: chat_id.0,
        user_id,
    })
}

pub fn progress_text(state: WorkflowState) -> String {
    format!("{}\n{}", state.status_message(), state.detail_message())
}

pub fn outfit_selection_text(options: &[OutfitOption]) -> String {
    let mut text = String::from(
        "Choose Your Outfit\n\nSelect the professional style you'd like for your final portrait. \
         Each option is designed to look photorealistic and corporate.\n",
    );
    for option in options {
        text.push_str(&format!("\n• {}: {}", option.label, option.description));
    }
    text.push_str(&format!("\n\nPro Tip: {}", OUTFIT_TIP));
    text
}

pub fn error_text(message: &str) -> String {
    format!("Processing Error\n\n{}", message)
}

pub fn result_caption() -> String {
    let mut caption = String::from(
        "Your Portrait is Ready!\nEnhanced, straightened, and professionally dressed.\n\nWhat we did:",
    );
    for step in RESULT_STEPS {
        caption.push_str(&format!("\n✅ {}", step));
    }
    caption
}

/// Identifies one outfit menu by the upload that produced it.
fn menu_stamp(started_at: Option<DateTime<Utc>>) -> i64 {
    started_at
        .map(|started_at| started_at.timestamp_millis())
        .unwrap_or_default()
}

fn outfit_callback_data(option: &OutfitOption, stamp: i64) -> String {
    format!("{}{}:{}", OUTFIT_CALLBACK_PREFIX, option.id, stamp)
}

/// `outfit:<id>:<menu stamp>`
pub fn parse_outfit_callback(data: &str) -> Option<(&'static OutfitOption, i64)> {
    let (id, stamp) = data
        .strip_prefix(OUTFIT_CALLBACK_PREFIX)?
        .split_once(':')?;
    Some((find_outfit(id)?, stamp.parse().ok()?))
}

fn build_outfit_keyboard(options: &[OutfitOption], stamp: i64) -> InlineKeyboardMarkup {
    let mut rows = options
        .iter()
        .map(|option| {
            vec![InlineKeyboardButton::callback(
                option.label,
                outfit_callback_data(option, stamp),
            )]
        })
        .collect::<Vec<_>>();
    rows.push(vec![InlineKeyboardButton::callback(
        "« Back",
        RESET_CALLBACK_DATA,
    )]);
    InlineKeyboardMarkup::new(rows)
}

fn build_reset_keyboard(label: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        label,
        RESET_CALLBACK_DATA,
    )]])
}

fn outcome_status(outcome: &StepOutcome) -> (&'static str, Option<String>) {
    match outcome {
        StepOutcome::AwaitingOutfit(_) => ("awaiting_outfit", None),
        StepOutcome::Completed(_) => ("success", None),
        StepOutcome::Failed(message) => ("error", Some(message.clone())),
    }
}

/// A menu is stale once the session left the selection state or a
/// different upload has started since.
fn menu_is_pending(session: &HeadshotSession, stamp: i64) -> bool {
    session.state() == WorkflowState::SelectingOutfit && menu_stamp(session.started_at()) == stamp
}

struct StatusMessageProgress {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
}

#[async_trait]
impl ProgressSink for StatusMessageProgress {
    async fn state_changed(&self, state: WorkflowState) {
        if !state.is_busy() {
            return;
        }
        if let Err(err) = self
            .bot
            .edit_message_text(self.chat_id, self.message_id, progress_text(state))
            .await
        {
            debug!("Progress update for {state} not applied: {err}");
        }
    }
}

async fn send_portrait(
    bot: &Bot,
    chat_id: ChatId,
    status_message_id: MessageId,
    image: &EncodedImage,
) -> Result<()> {
    let bytes = match image.decode() {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("Generated portrait could not be decoded: {err}");
            bot.edit_message_text(
                chat_id,
                status_message_id,
                error_text("The generated portrait could not be read. Please try again."),
            )
            .reply_markup(build_reset_keyboard("Try Again"))
            .await?;
            return Ok(());
        }
    };

    bot.send_photo(chat_id, InputFile::memory(bytes.clone()))
        .caption(result_caption())
        .await?;
    if let Err(err) = bot
        .edit_message_text(chat_id, status_message_id, PORTRAIT_DELIVERED_MESSAGE)
        .await
    {
        debug!("Could not close the status message: {err}");
    }

    bot.send_document(
        chat_id,
        InputFile::memory(bytes).file_name(PORTRAIT_FILE_NAME),
    )
    .caption("Download Portrait")
    .reply_markup(build_reset_keyboard("Start Over"))
    .await?;
    Ok(())
}

async fn render_outcome(
    bot: &Bot,
    chat_id: ChatId,
    status_message_id: MessageId,
    outcome: &StepOutcome,
    stamp: i64,
) -> Result<()> {
    match outcome {
        StepOutcome::AwaitingOutfit(options) => {
            bot.edit_message_text(chat_id, status_message_id, outfit_selection_text(options))
                .reply_markup(build_outfit_keyboard(options, stamp))
                .await?;
        }
        StepOutcome::Failed(message) => {
            bot.edit_message_text(chat_id, status_message_id, error_text(message))
                .reply_markup(build_reset_keyboard("Try Again"))
                .await?;
        }
        StepOutcome::Completed(image) => {
            send_portrait(bot, chat_id, status_message_id, image).await?;
        }
    }
    Ok(())
}

fn schedule_outfit_expiry(
    bot: Bot,
    state: AppState,
    key: SessionKey,
    stamp: i64,
    message_id: MessageId,
) {
    let timeout = CONFIG.outfit_selection_timeout;
    if timeout == 0 {
        return;
    }

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout)).await;
        let shared = state.session(key);
        let mut session = shared.lock().await;
        if !menu_is_pending(&session, stamp) {
            return;
        }
        session.reset();
        drop(session);

        info!(
            chat_id = key.chat_id,
            user_id = key.user_id,
            sessions = state.session_count(),
            "Outfit selection expired"
        );
        if let Err(err) = bot
            .edit_message_text(ChatId(key.chat_id), message_id, OUTFIT_EXPIRED_MESSAGE)
            .await
        {
            warn!("Failed to mark outfit selection as expired: {err}");
        }
    });
}

pub async fn headshot_upload_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(file_id) = image_file_id(&message) else {
        return Ok(());
    };
    let Some(key) = session_key(message.chat.id, message.from.as_ref()) else {
        return Ok(());
    };
    let mut timer = start_command_timer(CommandTimer::from_message("headshot", &message));

    let shared = state.session(key);
    let Ok(mut session) = shared.try_lock() else {
        bot.send_message(message.chat.id, BUSY_MESSAGE)
            .reply_parameters(ReplyParameters::new(message.id))
            .await?;
        complete_command_timer(&mut timer, "busy", None);
        return Ok(());
    };

    if is_rate_limited(key.user_id) {
        bot.send_message(
            message.chat.id,
            "Rate limit exceeded. Please try again later.",
        )
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
        complete_command_timer(&mut timer, "rate_limited", None);
        return Ok(());
    }

    if session.state() != WorkflowState::Idle {
        info!(state = %session.state(), "New photo received, starting over");
        session.reset();
    }

    let status_message = bot
        .send_message(message.chat.id, progress_text(WorkflowState::Uploading))
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    let progress = StatusMessageProgress {
        bot: bot.clone(),
        chat_id: message.chat.id,
        message_id: status_message.id,
    };
    let chat_action =
        start_chat_action_heartbeat(bot.clone(), message.chat.id, ChatAction::UploadPhoto);

    let upload = download_telegram_image(&bot, &file_id);
    let outcome = run_upload(&mut session, state.backend.as_ref(), &progress, upload).await?;
    let stamp = menu_stamp(session.started_at());
    drop(session);
    drop(chat_action);

    let (status, detail) = outcome_status(&outcome);
    complete_command_timer(&mut timer, status, detail);

    render_outcome(&bot, message.chat.id, status_message.id, &outcome, stamp).await?;
    if matches!(outcome, StepOutcome::AwaitingOutfit(_)) {
        schedule_outfit_expiry(bot, state, key, stamp, status_message.id);
    }
    Ok(())
}

pub async fn outfit_selection_callback(
    bot: Bot,
    state: AppState,
    query: CallbackQuery,
) -> Result<()> {
    let Some((outfit, stamp)) = query.data.as_deref().and_then(parse_outfit_callback) else {
        let _ = bot.answer_callback_query(query.id.clone()).await;
        return Ok(());
    };
    let Some(message) = query.message.as_ref() else {
        let _ = bot.answer_callback_query(query.id.clone()).await;
        return Ok(());
    };
    let chat_id = message.chat().id;
    let message_id = message.id();
    let Some(key) = session_key(chat_id, Some(&query.from)) else {
        return Ok(());
    };

    let shared = state.session(key);
    let Ok(mut session) = shared.try_lock() else {
        let _ = bot
            .answer_callback_query(query.id.clone())
            .text(BUSY_MESSAGE)
            .await;
        return Ok(());
    };
    if !menu_is_pending(&session, stamp) {
        let _ = bot
            .answer_callback_query(query.id.clone())
            .text(STALE_MENU_MESSAGE)
            .await;
        return Ok(());
    }

    let _ = bot
        .answer_callback_query(query.id.clone())
        .text(format!("{} selected", outfit.label))
        .await;
    let mut timer = start_command_timer(CommandTimer::from_callback("outfit", &query));
    let progress = StatusMessageProgress {
        bot: bot.clone(),
        chat_id,
        message_id,
    };
    let chat_action = start_chat_action_heartbeat(bot.clone(), chat_id, ChatAction::UploadPhoto);

    let outcome =
        run_outfit_selection(&mut session, state.backend.as_ref(), &progress, outfit.id).await?;
    drop(session);
    drop(chat_action);

    let (status, detail) = outcome_status(&outcome);
    complete_command_timer(&mut timer, status, detail);
    render_outcome(&bot, chat_id, message_id, &outcome, stamp).await
}

pub async fn reset_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let Some(message) = query.message.as_ref() else {
        let _ = bot.answer_callback_query(query.id.clone()).await;
        return Ok(());
    };
    let chat_id = message.chat().id;
    let message_id = message.id();
    let Some(key) = session_key(chat_id, Some(&query.from)) else {
        return Ok(());
    };

    let shared = state.session(key);
    let Ok(mut session) = shared.try_lock() else {
        let _ = bot
            .answer_callback_query(query.id.clone())
            .text(BUSY_MESSAGE)
            .await;
        return Ok(());
    };
    session.reset();
    drop(session);

    let _ = bot.answer_callback_query(query.id.clone()).await;
    if let Err(err) = bot.edit_message_reply_markup(chat_id, message_id).await {
        debug!("Could not clear the reset keyboard: {err}");
    }
    bot.send_message(chat_id, START_OVER_MESSAGE).await?;
    Ok(())
}

pub async fn reset_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(key) = session_key(message.chat.id, message.from.as_ref()) else {
        return Ok(());
    };
    let shared = state.session(key);
    let reply = match shared.try_lock() {
        Ok(mut session) => {
            session.reset();
            START_OVER_MESSAGE
        }
        Err(_) => BUSY_MESSAGE,
    };
    bot.send_message(message.chat.id, reply)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn unsupported_upload_handler(bot: Bot, message: Message) -> Result<()> {
    bot.send_message(message.chat.id, UNSUPPORTED_UPLOAD_MESSAGE)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::media::tests::PNG_BYTES;
    use crate::workflow::outfits::FEMALE_OUTFITS;
    use crate::workflow::{FaceAnalysis, Gender};

    #[test]
    fn outfit_callbacks_carry_the_menu_stamp() {
        let data = outfit_callback_data(&FEMALE_OUTFITS[0], 1_700_000_000_123);
        assert_eq!(data, "outfit:opt1:1700000000123");
        assert!(data.len() <= 64);
        assert_eq!(
            parse_outfit_callback(&data).map(|(outfit, stamp)| (outfit.label, stamp)),
            Some(("Classic Blazer", 1_700_000_000_123))
        );
        assert!(parse_outfit_callback("outfit:opt1").is_none());
        assert!(parse_outfit_callback("outfit:opt9:5").is_none());
        assert!(parse_outfit_callback("outfit:opt1:soon").is_none());
        assert!(parse_outfit_callback("opt1").is_none());
        assert!(parse_outfit_callback(RESET_CALLBACK_DATA).is_none());
    }

    #[test]
    fn outfit_keyboard_has_one_row_per_option_plus_back() {
        let keyboard = build_outfit_keyboard(&FEMALE_OUTFITS, 42);
        assert_eq!(keyboard.inline_keyboard.len(), FEMALE_OUTFITS.len() + 1);
        assert_eq!(keyboard.inline_keyboard[0][0].text, "Classic Blazer");
        assert_eq!(keyboard.inline_keyboard[3][0].text, "« Back");
    }

    #[test]
    fn selection_text_lists_every_option() {
        let text = outfit_selection_text(&FEMALE_OUTFITS);
        for option in &FEMALE_OUTFITS {
            assert!(text.contains(option.label));
            assert!(text.contains(option.description));
        }
        assert!(text.contains("Pro Tip"));
    }

    #[test]
    fn progress_text_for_generation_mentions_attire() {
        let text = progress_text(WorkflowState::GeneratingFinal);
        assert!(text.starts_with("Crafting your professional portrait."));
        assert!(text.contains("professional attire"));
    }

    #[test]
    fn caption_lists_every_step() {
        let caption = result_caption();
        assert!(caption.starts_with("Your Portrait is Ready!"));
        assert_eq!(caption.matches('✅').count(), RESULT_STEPS.len());
    }

    #[test]
    fn delivered_status_replaces_the_progress_text() {
        for state in [
            WorkflowState::Uploading,
            WorkflowState::Analyzing,
            WorkflowState::GeneratingFinal,
        ] {
            assert_ne!(PORTRAIT_DELIVERED_MESSAGE, progress_text(state));
        }
    }

    fn awaiting_outfit() -> HeadshotSession {
        let mut session = HeadshotSession::new();
        session.begin_upload().unwrap();
        session
            .finish_upload(EncodedImage::from_bytes(PNG_BYTES).unwrap())
            .unwrap();
        session
            .apply_analysis(&FaceAnalysis {
                gender: Gender::Female,
                is_clear: true,
                reason: None,
            })
            .unwrap();
        session
    }

    #[test]
    fn expiry_only_applies_to_the_same_pending_selection() {
        let mut session = awaiting_outfit();
        let stamp = menu_stamp(session.started_at());

        assert!(menu_is_pending(&session, stamp));
        assert!(!menu_is_pending(&session, stamp - 1));

        session.select_outfit("opt1").unwrap();
        assert!(!menu_is_pending(&session, stamp));
    }

    #[test]
    fn menu_from_another_upload_is_refused() {
        let mut session = awaiting_outfit();
        let other_menu = menu_stamp(session.started_at()) + 1;
        assert!(!menu_is_pending(&session, other_menu));

        session.reset();
        assert!(!menu_is_pending(&session, menu_stamp(None)));
    }
}
