//! Frosted Mirror - Rust Edition
//!
//! A Discord bot for anonymous confessions and blind one-to-one chats.
//! Voice clips are pitch-shifted through an external filter chain before
//! anyone hears them.

mod audio;
mod bot;
mod cleanup;
mod commands;
mod config;
mod database;
mod engine;
mod matchmaker;
mod reports;
mod session;
mod transport;

use config::Config;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,mirror_bot=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Frosted Mirror starting...");

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please ensure DISCORD_TOKEN, MODERATION_CHANNEL_ID and PUBLIC_CHANNEL_ID are set in .env file");
            std::process::exit(1);
        }
    };

    info!("Configuration loaded successfully");
    if let Some(guild_id) = config.guild_id {
        info!("Development mode: Commands will be registered to guild {}", guild_id);
    }

    // Create temp voice directory
    if let Err(e) = std::fs::create_dir_all(&config.temp_voice_dir) {
        error!("Failed to create temp voice directory: {}", e);
        std::process::exit(1);
    }

    // Run the bot
    if let Err(e) = bot::run(config).await {
        error!("Bot error: {}", e);
        std::process::exit(1);
    }
}
