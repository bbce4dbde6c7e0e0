//! # Fajr Reminder Bot Main Entry Point
//!
//! Initializes logging, loads configuration, opens the occurrence ledger,
//! starts the reminder loop and the health server, and runs the Telegram bot.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fajr_reminder_bot::bot::handlers::BotHandler;
use fajr_reminder_bot::bot::session::SessionManager;
use fajr_reminder_bot::bot::BotContext;
use fajr_reminder_bot::config::Config;
use fajr_reminder_bot::database::connection::DatabaseManager;
use fajr_reminder_bot::database::registration::{JsonRegistrationStore, RegistrationStore};
use fajr_reminder_bot::services::health::HealthService;
use fajr_reminder_bot::services::notifier::TelegramNotifier;
use fajr_reminder_bot::services::prayer_times::{AladhanClient, PrayerTimeCache, PrayerTimeResolver};
use fajr_reminder_bot::services::reminder::{
    ReminderCollaborators, ReminderEngine, ReminderService, ReminderSettings,
};
use fajr_reminder_bot::services::timezone::{OpenMeteoTimeResolver, TimeResolver};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fajr_reminder_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Starting Fajr Reminder Bot v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded - Database: {}, Users file: {}, HTTP Port: {}, Prayers: {:?}",
        config.database_url, config.users_file, config.http_port, config.reminder_prayers
    );

    info!("Initializing occurrence ledger...");
    let db_manager = DatabaseManager::new(&config.database_url).await?;
    db_manager.run_migrations().await?;
    let db = Arc::new(db_manager);

    let store: Arc<dyn RegistrationStore> = Arc::new(JsonRegistrationStore::new(&config.users_file));
    match store.load().await {
        Ok(users) => info!("Registration store loaded with {} users", users.len()),
        Err(e) => tracing::warn!("Registration store not readable yet: {}", e),
    }

    let http = reqwest::Client::builder()
        .timeout(config.lookup_timeout)
        .build()?;
    let time_resolver: Arc<dyn TimeResolver> =
        Arc::new(OpenMeteoTimeResolver::new(http.clone(), &config.geocoding_api_url));
    let prayer_times: Arc<dyn PrayerTimeResolver> = Arc::new(PrayerTimeCache::new(AladhanClient::new(
        http,
        &config.prayer_api_url,
        config.prayer_calculation_method,
    )));

    let bot = Bot::new(&config.telegram_bot_token);

    // Reminder loop runs independently of the dialogue.
    let engine = Arc::new(ReminderEngine::new(
        ReminderCollaborators {
            store: store.clone(),
            time_resolver: time_resolver.clone(),
            prayer_times: prayer_times.clone(),
            notifier: Arc::new(TelegramNotifier::new(bot.clone())),
            db: db.clone(),
        },
        ReminderSettings::from_config(&config),
    ));
    let mut reminder_service = ReminderService::new(engine.clone());
    reminder_service.start().await?;

    let sessions = SessionManager::new(config.session_ttl);
    let purge_task = sessions.spawn_purge_task(SESSION_PURGE_INTERVAL);

    let handler = BotHandler::new(BotContext {
        sessions,
        store: store.clone(),
        time_resolver,
        prayer_times,
        prayers: config.reminder_prayers.clone(),
        lookup_timeout: config.lookup_timeout,
    });

    let health_service = HealthService::new(db, store, engine.status_handle());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to port {}: {}", config.http_port, e))?;
    info!("Health check server starting on port {}", config.http_port);

    let bot_task = tokio::spawn(async move {
        Dispatcher::builder(bot, handler.schema())
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    });

    let health_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, health_service.router).await {
            tracing::error!("Health server error: {}", e);
        }
    });

    // Either task finishing means shutdown.
    tokio::select! {
        result = bot_task => {
            if let Err(e) = result {
                tracing::error!("Bot task error: {}", e);
            }
        }
        result = health_task => {
            if let Err(e) = result {
                tracing::error!("Health task error: {}", e);
            }
        }
    }

    purge_task.abort();
    if let Err(e) = reminder_service.stop().await {
        tracing::warn!("Error stopping reminder service: {}", e);
    }

    info!("Application stopped");
    Ok(())
}
