use teloxide::prelude::*;

use crate::bot::BotContext;
use crate::database::models::Prayer;
use crate::services::prayer_times::DailyTimings;
use crate::services::reminder::bounded;
use crate::services::timezone::LocalTime;
use crate::utils::datetime::{format_clock, format_local_time};
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::log_command_error;

pub const NOT_REGISTERED: &str = "You haven't set your city yet. Use /start to set it up.";

/// Reply body for `/time`: the local clock followed by today's reminder prayers.
pub fn time_report(city: &str, local: &LocalTime, timings: Option<&DailyTimings>, prayers: &[Prayer]) -> String {
    let mut report = format!("The current time in {} is: {}", city, format_local_time(&local.now));

    if let Some(timings) = timings {
        for &prayer in prayers {
            if let Some(time) = timings.get(prayer) {
                report.push_str(&format!("\n{}: {}", prayer, format_clock(time)));
            }
        }
    }
    report
}

pub async fn handle_time(bot: Bot, msg: Message, ctx: &BotContext) -> ResponseResult<()> {
    let user_id = msg.chat.id.0;
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    let preference = match ctx.store.get(user_id).await {
        Ok(Some(preference)) => preference,
        Ok(None) => {
            bot.send_message(msg.chat.id, NOT_REGISTERED).await?;
            return Ok(());
        }
        Err(e) => {
            log_command_error("time", user_id, &e.to_string());
            feedback.error("Couldn't read your registration right now.").await?;
            return Ok(());
        }
    };

    let local = match bounded(
        ctx.lookup_timeout,
        "time resolution",
        ctx.time_resolver
            .resolve_local_time_in(&preference.city, &preference.country),
    )
    .await
    {
        Ok(local) => local,
        Err(e) => {
            log_command_error("time", user_id, &e.to_string());
            feedback
                .error(&format!("Sorry, I couldn't determine the time in {}.", preference.city))
                .await?;
            return Ok(());
        }
    };

    let timings = bounded(
        ctx.lookup_timeout,
        "prayer time lookup",
        ctx.prayer_times
            .resolve_timings(&preference.city, &preference.country, local.today()),
    )
    .await
    .map_err(|e| tracing::warn!("Prayer times unavailable for /time: {}", e))
    .ok();

    bot.send_message(
        msg.chat.id,
        time_report(&preference.city, &local, timings.as_ref(), &ctx.prayers),
    )
    .await?;
    Ok(())
}
