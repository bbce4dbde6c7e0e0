pub mod health;
pub mod notifier;
pub mod prayer_times;
pub mod reminder;
pub mod timezone;
