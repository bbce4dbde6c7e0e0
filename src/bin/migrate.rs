use anyhow::{anyhow, Result};
use chrono::{Days, Utc};
use fajr_reminder_bot::config::StorageConfig;
use fajr_reminder_bot::database::connection::DatabaseManager;
use fajr_reminder_bot::database::models::ReminderOccurrence;
use fajr_reminder_bot::database::registration::{JsonRegistrationStore, RegistrationStore};
use std::env;
use std::path::Path;

const DEFAULT_RETENTION_DAYS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("migrate");

    match command {
        "migrate" | "up" => run_migrations().await,
        "check" => check_database().await,
        "prune" => prune_occurrences(args.get(2).map(String::as_str)).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {command}");
            print_help();
            std::process::exit(1);
        }
    }
}

async fn connect(storage: &StorageConfig) -> Result<DatabaseManager> {
    println!("📊 Database URL: {}", mask_url(&storage.database_url));
    DatabaseManager::new(&storage.database_url)
        .await
        .map_err(|e| anyhow!("Failed to connect to database: {}", e))
}

async fn run_migrations() -> Result<()> {
    println!("🔧 Fajr Reminder Bot - Database Migration Tool");
    println!("==============================================");

    let storage = StorageConfig::from_env();
    let db_manager = connect(&storage).await?;

    println!("🚀 Running database migrations...");
    match db_manager.run_migrations().await {
        Ok(()) => println!("✅ Migrations completed successfully!"),
        Err(e) => {
            eprintln!("❌ Migration failed: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn check_database() -> Result<()> {
    println!("🔍 Checking occurrence ledger and registration store...");

    let storage = StorageConfig::from_env();
    let db_manager = connect(&storage).await?;

    match db_manager.ping().await {
        Ok(()) => println!("✅ Database connection successful!"),
        Err(e) => println!("⚠️  Database check failed: {e}"),
    }

    match ReminderOccurrence::count(&db_manager.pool).await {
        Ok(count) => println!("📋 Recorded reminder occurrences: {count}"),
        Err(e) => {
            println!("⚠️  Occurrence table not readable: {e}");
            println!("💡 Try running 'migrate up' to create the schema");
        }
    }

    let store = JsonRegistrationStore::new(&storage.users_file);
    match store.load().await {
        Ok(users) => println!("👥 Registered users in {}: {}", storage.users_file, users.len()),
        Err(e) => println!("⚠️  {e}"),
    }

    Ok(())
}

async fn prune_occurrences(days: Option<&str>) -> Result<()> {
    let days = match days {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| anyhow!("Invalid number of days: {raw}"))?,
        None => DEFAULT_RETENTION_DAYS,
    };

    let horizon = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(days))
        .ok_or_else(|| anyhow!("Retention of {days} days is out of range"))?;

    let storage = StorageConfig::from_env();
    let db_manager = connect(&storage).await?;

    let pruned = ReminderOccurrence::prune_before(&db_manager.pool, horizon).await?;
    println!("🗑️  Pruned {pruned} occurrences recorded before {horizon}");

    Ok(())
}

fn mask_url(url: &str) -> String {
    if url.starts_with("sqlite:") {
        let path = url.strip_prefix("sqlite:").unwrap_or(url);
        if let Some(filename) = Path::new(path).file_name() {
            format!("sqlite:.../{}", filename.to_string_lossy())
        } else {
            url.to_string()
        }
    } else {
        url.to_string()
    }
}

fn print_help() {
    println!("🌙 Fajr Reminder Bot - Database Migration Tool");
    println!();
    println!("USAGE:");
    println!("    migrate [COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    migrate, up    Run database migrations (default)");
    println!("    check          Check the ledger and the registration store");
    println!("    prune [DAYS]   Delete occurrences older than DAYS (default: {DEFAULT_RETENTION_DAYS})");
    println!("    help           Show this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    DATABASE_URL   Ledger connection string (default: sqlite:./data/reminders.db)");
    println!("    USERS_FILE     Registration store (default: ./data/users.json)");
    println!();
}
