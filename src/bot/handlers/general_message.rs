use teloxide::prelude::*;

use crate::bot::commands::registration::handle_registration_text;
use crate::bot::{BotContext, HandlerResult};
use crate::utils::feedback::CommandFeedback;

pub async fn handle_general_message(bot: Bot, msg: Message, ctx: BotContext) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    // Unknown commands never feed the dialogue.
    if !text.starts_with('/') && handle_registration_text(bot.clone(), &msg, text, &ctx).await? {
        return Ok(());
    }

    let feedback = CommandFeedback::new(bot, msg.chat.id);
    if text.starts_with('/') {
        let command = text.split_whitespace().next().unwrap_or(text);
        feedback
            .validation_error(
                &format!("Unknown command: {command}"),
                "Use /help to see all available commands.",
            )
            .await?;
    } else {
        feedback
            .info("Use /start to register your city, or /help to see all commands.")
            .await?;
    }

    Ok(())
}
