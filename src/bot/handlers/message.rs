use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::bot::commands::{registration, time, Command};
use crate::bot::{BotContext, HandlerResult};
use crate::utils::logging::log_command_start;

pub async fn command_handler(bot: Bot, msg: Message, cmd: Command, ctx: BotContext) -> HandlerResult {
    log_command_start(&format!("{cmd:?}").to_lowercase(), msg.chat.id.0);

    match cmd {
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string()).await?;
        }
        Command::Start => registration::handle_start(bot, msg, &ctx).await?,
        Command::Time => time::handle_time(bot, msg, &ctx).await?,
        Command::Cancel => registration::handle_cancel(bot, msg, &ctx).await?,
    }
    Ok(())
}
