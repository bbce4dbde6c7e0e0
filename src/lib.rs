//! # Fajr Reminder Bot
//!
//! A Telegram bot that remembers each user's city and country and sends a
//! reminder when the day's Fajr prayer time begins there.
//!
//! ## Features
//! - Two-step registration dialogue (city, then country)
//! - Per-user timezone resolution and daily prayer-time lookup
//! - Minute-cadence reconciliation loop with at-most-once delivery per day
//! - Health endpoints for operational monitoring

/// Bot command handlers and the registration dialogue
pub mod bot;
/// Configuration management and environment variables
pub mod config;
/// Registration store, occurrence ledger and their models
pub mod database;
/// Error taxonomy shared by the reminder loop and its collaborators
pub mod error;
/// Background services: reminder loop, lookups, notifications, health
pub mod services;
/// Utility functions for datetime, validation, and formatting
pub mod utils;
