pub mod registration;
pub mod time;

use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Fajr Reminder Bot commands:")]
pub enum Command {
    #[command(description = "Display this help message")]
    Help,
    #[command(description = "Register your city and country")]
    Start,
    #[command(description = "Show the current time and today's prayer times in your city")]
    Time,
    #[command(description = "Cancel an unfinished registration")]
    Cancel,
}
