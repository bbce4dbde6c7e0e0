pub mod general_message;
pub mod message;

use teloxide::dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler};
use teloxide::dptree;
use teloxide::types::{Message, Update};
use teloxide::Bot;

use crate::bot::commands::Command;
use crate::bot::{BotContext, HandlerError};

pub struct BotHandler {
    pub ctx: BotContext,
}

impl BotHandler {
    pub fn new(ctx: BotContext) -> Self {
        Self { ctx }
    }

    pub fn schema(&self) -> UpdateHandler<HandlerError> {
        let ctx = self.ctx.clone();
        let ctx_text = self.ctx.clone();

        Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                        let ctx = ctx.clone();
                        async move { message::command_handler(bot, msg, cmd, ctx).await }
                    }),
            )
            .branch(dptree::endpoint(move |bot: Bot, msg: Message| {
                let ctx = ctx_text.clone();
                async move { general_message::handle_general_message(bot, msg, ctx).await }
            }))
    }
}
