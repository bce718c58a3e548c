use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lead_intake::bot;
use lead_intake::config::BotConfig;
use lead_intake::db;
use lead_intake::engine::{ConversationEngine, EngineConfig};
use lead_intake::llm::OpenAiChatModel;
use lead_intake::registry::SessionRegistry;

/// Connections in the SQLite pool
const DATABASE_MAX_CONNECTIONS: u32 = 4;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Periodically drop idle sessions when an idle TTL is configured
fn spawn_session_sweeper(registry: Arc<SessionRegistry>, config: &BotConfig) {
    let Some(max_idle) = config.sessions.idle_ttl() else {
        info!("Session eviction disabled; sessions live for the process lifetime");
        return;
    };
    let period = config.sessions.sweep_interval();
    info!(max_idle = ?max_idle, period = ?period, "Session eviction enabled");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            registry.evict_idle(max_idle, Utc::now());
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing();

    info!("Starting lead intake bot");

    let config = BotConfig::from_env().context("Invalid configuration")?;

    let pool = db::connect(&config.database_url, DATABASE_MAX_CONNECTIONS).await?;
    db::init_database_schema(&pool).await?;
    let catalog = match &config.catalog_path {
        Some(path) => {
            info!(path = %path.display(), "Loading catalog");
            db::Catalog::load(path).await?
        }
        None => db::Catalog::default(),
    };
    db::seed_catalog(&pool, &catalog).await?;

    let model = Arc::new(OpenAiChatModel::new(&config.chat));
    let engine = Arc::new(ConversationEngine::new(
        model,
        pool,
        EngineConfig::from(&config),
    ));
    let registry = Arc::new(SessionRegistry::new());
    spawn_session_sweeper(Arc::clone(&registry), &config);

    let bot = Bot::new(&config.telegram_token);

    let handler = Update::filter_message().endpoint(bot::message_handler);

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![engine, registry])
        .enable_ctrlc_handler()
        .build();

    match config.webhook {
        Some(webhook) => {
            info!(url = %webhook.url, listen_addr = %webhook.listen_addr, "Bot initialized, starting webhook listener");
            let options = webhooks::Options::new(webhook.listen_addr, webhook.url)
                .secret_token(webhook.secret);
            let listener = webhooks::axum(bot, options)
                .await
                .context("Failed to register webhook")?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
        None => {
            info!("Bot initialized, starting long polling");
            dispatcher.dispatch().await;
        }
    }

    Ok(())
}
