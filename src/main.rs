//! Persian OCR Bot - Telegram front end for Gemini-based Persian text extraction.

mod auth;
mod bot;
mod config;
mod delivery;
mod handlers;
mod mailer;
mod ocr;
mod pdf;
mod store;

use config::BotConfig;
use delivery::Delivery;
use handlers::OcrService;
use mailer::SmtpMailer;
use ocr::gemini::GeminiBackend;
use pdf::PdfiumRasterizer;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "persian_ocr_bot=debug,teloxide=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(BotConfig::from_env()?);

    let backend = GeminiBackend::new(&config.inference)?;
    info!("Gemini backend initialized ({} candidate models)", config.inference.models.len());

    let mailer = SmtpMailer::new(&config.email)?;
    info!("SMTP mailer configured for {}:{}", config.email.smtp_host, config.email.smtp_port);

    let service = Arc::new(OcrService::new(
        config.clone(),
        Arc::new(backend),
        Arc::new(PdfiumRasterizer::new(&config.pdf)),
        Delivery::new(Arc::new(mailer)),
    ));

    let bot = Bot::new(config.telegram_token.clone());
    if let Err(e) = bot.set_my_commands(bot::Command::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }

    bot::run(bot, service).await;
    info!("Bot stopped");

    Ok(())
}
