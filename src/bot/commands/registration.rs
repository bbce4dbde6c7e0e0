use teloxide::prelude::*;

use crate::bot::session::{RegistrationState, RegistrationStep, SessionError};
use crate::bot::BotContext;
use crate::database::models::UserId;
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::log_command_error;
use crate::utils::validation::validate_place_name;

pub const START_PROMPT: &str = "Hi, I can schedule Ramadan reminders.\nSend me your city.";
pub const COUNTRY_PROMPT: &str = "Great! Now send me your country.";
pub const SAVING_NOTICE: &str = "Great! Just a sec, saving your data...";

pub fn saved_message(city: &str, country: &str) -> String {
    format!("Saved ✅\nCity: {city}\nCountry: {country}")
}

pub async fn handle_start(bot: Bot, msg: Message, ctx: &BotContext) -> ResponseResult<()> {
    ctx.sessions.begin(msg.chat.id.0).await;
    bot.send_message(msg.chat.id, START_PROMPT).await?;
    Ok(())
}

pub async fn handle_cancel(bot: Bot, msg: Message, ctx: &BotContext) -> ResponseResult<()> {
    let feedback = CommandFeedback::new(bot, msg.chat.id);

    if ctx.sessions.cancel(msg.chat.id.0).await {
        feedback.info("Registration cancelled. Use /start to begin again.").await?;
    } else {
        feedback.info("There is no registration in progress.").await?;
    }
    Ok(())
}

/// Feeds a free-text reply into the user's registration dialogue.
///
/// Returns `false` when the user has no dialogue in progress, leaving the
/// message to the general handler.
pub async fn handle_registration_text(
    bot: Bot,
    msg: &Message,
    text: &str,
    ctx: &BotContext,
) -> ResponseResult<bool> {
    let user_id: UserId = msg.chat.id.0;
    let field = match ctx.sessions.state(user_id).await {
        Some(RegistrationState::AwaitingCity) => "City",
        Some(RegistrationState::AwaitingCountry { .. }) => "Country",
        Some(RegistrationState::Completed) | None => return Ok(false),
    };

    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);
    let value = match validate_place_name(field, text) {
        Ok(value) => value,
        Err(e) => {
            feedback
                .validation_error(&e.to_string(), &format!("Please send your {} again.", field.to_lowercase()))
                .await?;
            return Ok(true);
        }
    };

    match ctx.sessions.advance(user_id, &value).await {
        Ok(RegistrationStep::CityAccepted { .. }) => {
            bot.send_message(msg.chat.id, COUNTRY_PROMPT).await?;
        }
        Ok(RegistrationStep::Completed(preference)) => {
            bot.send_message(msg.chat.id, SAVING_NOTICE).await?;

            let city = preference.city.clone();
            let country = preference.country.clone();
            match ctx.store.upsert(preference).await {
                Ok(()) => {
                    tracing::info!("User {} registered for {}, {}", user_id, city, country);
                    bot.send_message(msg.chat.id, saved_message(&city, &country)).await?;
                }
                Err(e) => {
                    log_command_error("registration", user_id, &e.to_string());
                    ctx.sessions
                        .restore(user_id, RegistrationState::AwaitingCountry { city })
                        .await;
                    feedback
                        .error("Sorry, I couldn't save your data. Please send your country again.")
                        .await?;
                }
            }
        }
        Ok(RegistrationStep::AlreadyCompleted) | Err(SessionError::NoActiveSession) => {
            return Ok(false);
        }
    }

    Ok(true)
}
