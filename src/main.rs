use std::error::Error;
use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

mod cli;
mod config;
mod handlers;
mod llm;
mod state;
mod utils;
mod workflow;

use cli::headshot::{parse_headshot_args, run_local_headshot};
use config::CONFIG;
use handlers::headshot::{OUTFIT_CALLBACK_PREFIX, RESET_CALLBACK_DATA};
use handlers::media::message_has_image;
use handlers::{commands, headshot};
use llm::GeminiClient;
use state::AppState;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Reset,
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let _guards = init_logging(&CONFIG.log_level);

    let args: Vec<String> = std::env::args().collect();
    let headshot_args = parse_headshot_args(&args)?;

    if CONFIG.gemini_api_key.trim().is_empty() {
        return Err("GEMINI_API_KEY is required".into());
    }
    let backend = Arc::new(GeminiClient::from_config(&CONFIG));

    if let Some(headshot_args) = headshot_args {
        let output = run_local_headshot(headshot_args, backend.as_ref()).await?;
        info!("Portrait saved to {}", output.display());
        return Ok(());
    }

    if CONFIG.bot_token.trim().is_empty() {
        return Err("BOT_TOKEN is required unless running headshot".into());
    }

    let bot = Bot::new(CONFIG.bot_token.clone());
    info!(
        "Starting ProHeadshot bot (analysis={}, portrait={})",
        CONFIG.gemini_analysis_model, CONFIG.gemini_portrait_model
    );

    let state = AppState::new(backend);

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(dptree::filter(|msg: Message| message_has_image(&msg)).endpoint(handle_upload))
        .branch(
            dptree::filter(|msg: Message| msg.document().is_some())
                .endpoint(handle_unsupported_upload),
        )
        .endpoint(ignore_message);

    let callback_state = state.clone();
    let callback_handler =
        Update::filter_callback_query().endpoint(move |bot: Bot, query: CallbackQuery| {
            let state = callback_state.clone();
            async move { handle_callback_query(bot, state, query).await }
        });

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Start => commands::start_handler(bot, message).await?,
        Command::Help => commands::help_handler(bot, message).await?,
        Command::Reset => headshot::reset_handler(bot, state, message).await?,
    }
    Ok(())
}

async fn handle_upload(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = headshot::headshot_upload_handler(bot, state, message).await {
            error!("headshot upload handler failed: {err}");
        }
    });
    Ok(())
}

async fn handle_unsupported_upload(bot: Bot, message: Message) -> HandlerResult {
    headshot::unsupported_upload_handler(bot, message).await?;
    Ok(())
}

async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) -> HandlerResult {
    let Some(data) = query.data.clone() else {
        return Ok(());
    };
    if data.starts_with(OUTFIT_CALLBACK_PREFIX) {
        tokio::spawn(async move {
            if let Err(err) = headshot::outfit_selection_callback(bot, state, query).await {
                error!("outfit selection callback failed: {err}");
            }
        });
        return Ok(());
    }
    if data == RESET_CALLBACK_DATA {
        tokio::spawn(async move {
            if let Err(err) = headshot::reset_callback(bot, state, query).await {
                error!("reset callback failed: {err}");
            }
        });
    }
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}
