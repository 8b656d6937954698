use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};

use crate::utils::timing::{complete_command_timer, start_command_timer, CommandTimer};

const START_TEXT: &str = "
*Create Your Professional Portrait*

Upload a casual selfie and I will turn it into a studio-quality corporate headshot.

For best results:
- Front facing, looking at the camera
- Good, even lighting
- Neutral expression

Send me a photo (PNG, JPG or JPEG, max 10MB) to begin.
";

const HELP_TEXT: &str = "
*ProHeadshot AI*

Send a photo - Analyze your face and create a professional headshot.
Women pick one of three outfits; men get a navy suit and white shirt.
Photos sent as files are supported too.

/reset - Discard the current photo and start over
Usage: `/reset`

/help - Show this help message
";

pub async fn start_handler(bot: Bot, message: Message) -> Result<()> {
    let mut timer = start_command_timer(CommandTimer::from_message("start", &message));
    bot.send_message(message.chat.id, START_TEXT)
        .reply_parameters(ReplyParameters::new(message.id))
        .parse_mode(ParseMode::Markdown)
        .await?;
    complete_command_timer(&mut timer, "success", None);
    Ok(())
}

pub async fn help_handler(bot: Bot, message: Message) -> Result<()> {
    bot.send_message(message.chat.id, HELP_TEXT)
        .reply_parameters(ReplyParameters::new(message.id))
        .parse_mode(ParseMode::Markdown)
        .await?;
    Ok(())
}
