//! # Ledger Bot Main Entry Point
//!
//! Initializes logging, loads configuration, sets up the database, arms the
//! event jobs, and runs the Telegram bot next to the health server.

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_bot::bot::handlers::{BotContext, BotHandler};
use ledger_bot::config::Config;
use ledger_bot::database::connection::DatabaseManager;
use ledger_bot::database::models::User;
use ledger_bot::services::demurrage::DemurrageProcessor;
use ledger_bot::services::dispatch::{run_dispatcher, JobHandlers};
use ledger_bot::services::event_payment::EventProcessor;
use ledger_bot::services::health::HealthService;
use ledger_bot::services::ledger::Ledger;
use ledger_bot::services::notifier::{Notifier, TelegramNotifier};
use ledger_bot::services::scheduler::{CronJobRunner, EventScheduler};
use ledger_bot::utils::logging::log_system_event;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let timezone = config.timezone()?;

    info!("Starting Ledger Bot v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded - Database: {}, HTTP Port: {}, UTC offset: {}h",
        config.database_url, config.http_port, config.utc_offset_hours
    );

    let db_manager = DatabaseManager::new(&config.database_url).await?;
    db_manager.run_migrations().await?;
    let db_arc = Arc::new(db_manager);
    info!("Database initialized successfully");

    let ledger = Ledger::new(db_arc.pool.clone());

    if let Some(admin_id) = config.super_admin_id {
        let registration = ledger
            .register_user(admin_id, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open super admin account: {}", e))?;
        User::set_admin(&db_arc.pool, registration.user.id, true).await?;
        log_system_event("super admin ready", Some(&admin_id.to_string()));
    }

    let (fired_tx, fired_rx) = mpsc::unbounded_channel();
    let runner = Arc::new(
        CronJobRunner::new(fired_tx)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create job runner: {}", e))?,
    );
    runner
        .add_demurrage_job(&config.demurrage_cron)
        .await
        .map_err(|e| anyhow::anyhow!("Invalid DEMURRAGE_CRON '{}': {}", config.demurrage_cron, e))?;
    runner
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start job runner: {}", e))?;

    let scheduler = Arc::new(EventScheduler::new(runner.clone(), db_arc.pool.clone(), timezone));
    match scheduler.rearm_all().await {
        Ok(summary) => info!(
            "Re-armed events: {} armed, {} idle, {} failed",
            summary.armed, summary.idle, summary.failed
        ),
        Err(e) => tracing::error!("Failed to re-arm events: {}", e),
    }

    let bot = Bot::new(&config.telegram_bot_token);
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(bot.clone()));
    let events = Arc::new(EventProcessor::new(
        db_arc.pool.clone(),
        scheduler.clone(),
        notifier.clone(),
        config.currency_symbol.clone(),
    ));
    let demurrage = Arc::new(DemurrageProcessor::new(db_arc.pool.clone(), timezone));

    let dispatcher_task = tokio::spawn(run_dispatcher(
        fired_rx,
        JobHandlers {
            events,
            demurrage: demurrage.clone(),
        },
    ));

    let handler = BotHandler::new(BotContext {
        db: db_arc.as_ref().clone(),
        ledger,
        scheduler: scheduler.clone(),
        demurrage,
        notifier,
        currency_symbol: config.currency_symbol.clone(),
    });

    let health_service = HealthService::new(db_arc.clone(), scheduler);
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
        result = dispatcher_task => {
            if let Err(e) = result {
                tracing::error!("Job dispatcher error: {}", e);
            }
        }
    }

    if let Err(e) = runner.shutdown().await {
        tracing::warn!("Error stopping job runner: {}", e);
    }

    log_system_event("stopped", None);
    Ok(())
}
