//! # Ledger Bot
//!
//! A Telegram bot that runs a community currency for an organisation.
//!
//! ## Features
//! - Member accounts with balances, transfers and a one-time grace credit
//! - A fund account collecting event fees and demurrage
//! - Activities members subscribe to, with single and weekly paid events
//! - Reminders before events, charged automatically when they start
//! - Periodic demurrage on positive balances
//! - Persistent storage with SQLite

/// Bot command handlers and message processing
pub mod bot;
/// Configuration management and environment variables
pub mod config;
/// Database models, connections, and migrations
pub mod database;
/// Ledger, scheduling and background job processing
pub mod services;
/// Utility functions for datetime, validation, and formatting
pub mod utils;
