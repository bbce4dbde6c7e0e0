use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::database::models::Prayer;

const DEFAULT_DATABASE_URL: &str = "sqlite:./data/reminders.db";
const DEFAULT_USERS_FILE: &str = "./data/users.json";
const DEFAULT_PRAYER_API_URL: &str = "http://api.aladhan.com/v1";
const DEFAULT_GEOCODING_API_URL: &str = "https://geocoding-api.open-meteo.com/v1";

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub database_url: String,
    pub users_file: String,
    pub http_port: u16,
    pub tick_interval: Duration,
    pub lookup_timeout: Duration,
    pub lookup_retries: u32,
    pub max_concurrent_lookups: usize,
    pub session_ttl: Duration,
    pub prayer_api_url: String,
    pub prayer_calculation_method: u8,
    pub geocoding_api_url: String,
    pub reminder_prayers: Vec<Prayer>,
    pub occurrence_retention_days: u32,
}

/// Storage locations only; needs no bot token, so maintenance tools can use it.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_url: String,
    pub users_file: String,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: string_or_default("DATABASE_URL", DEFAULT_DATABASE_URL),
            users_file: string_or_default("USERS_FILE", DEFAULT_USERS_FILE),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let token = env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow!("TELEGRAM_BOT_TOKEN must be set"))?;

        if token.trim().is_empty() {
            return Err(anyhow!("TELEGRAM_BOT_TOKEN must be set"));
        }

        let storage = StorageConfig::from_env();

        Ok(Config {
            telegram_bot_token: token,
            database_url: storage.database_url,
            users_file: storage.users_file,
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            tick_interval: Duration::from_secs(positive_or_default("TICK_INTERVAL_SECS", 60)?),
            lookup_timeout: Duration::from_secs(positive_or_default("LOOKUP_TIMEOUT_SECS", 10)?),
            lookup_retries: parse_or_default("LOOKUP_RETRIES", 2)?,
            max_concurrent_lookups: positive_or_default("MAX_CONCURRENT_LOOKUPS", 8)?,
            session_ttl: Duration::from_secs(positive_or_default("SESSION_TTL_SECS", 900)?),
            prayer_api_url: string_or_default("PRAYER_API_URL", DEFAULT_PRAYER_API_URL),
            prayer_calculation_method: parse_or_default("PRAYER_CALCULATION_METHOD", 2)?,
            geocoding_api_url: string_or_default("GEOCODING_API_URL", DEFAULT_GEOCODING_API_URL),
            reminder_prayers: reminder_prayers()?,
            occurrence_retention_days: parse_or_default("OCCURRENCE_RETENTION_DAYS", 30)?,
        })
    }
}

/// Unset and blank values both fall back to the default.
fn string_or_default(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or_default<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid {name}")),
        _ => Ok(default),
    }
}

fn positive_or_default<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
{
    let value = parse_or_default(name, default)?;
    if value <= T::default() {
        return Err(anyhow!("Invalid {name}: must be greater than zero"));
    }
    Ok(value)
}

fn reminder_prayers() -> Result<Vec<Prayer>> {
    let raw = string_or_default("REMINDER_PRAYERS", "fajr");
    let mut prayers = raw
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| name.parse::<Prayer>().map_err(|e| anyhow!("Invalid REMINDER_PRAYERS: {e}")))
        .collect::<Result<Vec<_>>>()?;

    prayers.sort();
    prayers.dedup();

    if prayers.is_empty() {
        return Err(anyhow!("Invalid REMINDER_PRAYERS: at least one prayer is required"));
    }
    Ok(prayers)
}
