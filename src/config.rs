//! Configuration management for the Mirror bot
//!
//! Loads settings from environment variables (.env file)

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token
    pub discord_token: String,
    /// Optional guild ID for development (faster command sync)
    pub guild_id: Option<u64>,
    /// Channel receiving review cards, admin messages and voice uploads
    pub moderation_channel_id: u64,
    /// Channel receiving approved confessions
    pub public_channel_id: u64,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Parent directory for per-job voice working directories
    pub temp_voice_dir: PathBuf,
    /// ffmpeg executable (normalize, fallback pitch, encode)
    pub ffmpeg_path: String,
    /// rubberband executable (formant-preserving pitch shift)
    pub rubberband_path: String,
    pub limits: Limits,
}

/// Fixed tunables of the session engine
#[derive(Debug, Clone)]
pub struct Limits {
    /// Sessions idle this long are discarded by the sweep
    pub session_ttl: Duration,
    /// Comment-authoring sessions idle this long expire with a notice
    pub comment_ttl: Duration,
    /// How often the cleanup sweep runs
    pub sweep_interval: Duration,
    /// Per-stage bound for every external filter process
    pub stage_timeout: Duration,
    /// Delay before a voice job's working directory is removed
    pub cleanup_grace: Duration,
    /// Admin contact is allowed once per this window
    pub admin_contact_window: chrono::Duration,
    /// Reports that trigger an automatic ban
    pub report_threshold: u32,
    /// Longest voice confession accepted
    pub max_confession_voice: Duration,
    /// Longest voice clip relayed inside a blind chat
    pub max_chat_voice: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(30 * 60),
            comment_ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            stage_timeout: Duration::from_secs(30),
            cleanup_grace: Duration::from_secs(2),
            admin_contact_window: chrono::Duration::days(7),
            report_threshold: 3,
            max_confession_voice: Duration::from_secs(120),
            max_chat_voice: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let discord_token = env::var("DISCORD_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("DISCORD_TOKEN".to_string()))?;

        let guild_id = optional_id("GUILD_ID")?;
        let moderation_channel_id = required_id("MODERATION_CHANNEL_ID")?;
        let public_channel_id = required_id("PUBLIC_CHANNEL_ID")?;

        let database_path = env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "mirror_bot.db".to_string())
            .into();

        let temp_voice_dir = env::var("TEMP_VOICE_DIR")
            .unwrap_or_else(|_| "temp_voice".to_string())
            .into();

        let ffmpeg_path = env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string());
        let rubberband_path =
            env::var("RUBBERBAND_PATH").unwrap_or_else(|_| "rubberband".to_string());

        Ok(Self {
            discord_token,
            guild_id,
            moderation_channel_id,
            public_channel_id,
            database_path,
            temp_voice_dir,
            ffmpeg_path,
            rubberband_path,
            limits: Limits::default(),
        })
    }
}

fn optional_id(key: &str) -> Result<Option<u64>, ConfigError> {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue(key.to_string(), s))
        })
        .transpose()
}

fn required_id(key: &str) -> Result<u64, ConfigError> {
    optional_id(key)?.ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Opus encode settings for anonymized voice
pub mod voice {
    pub const SAMPLE_RATE: u32 = 48_000;
    pub const OPUS_BITRATE: &str = "64k";
    pub const HIGHPASS_HZ: u32 = 80;
    pub const LOWPASS_HZ: u32 = 14_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.session_ttl, Duration::from_secs(1800));
        assert_eq!(limits.sweep_interval, Duration::from_secs(600));
        assert_eq!(limits.stage_timeout, Duration::from_secs(30));
        assert_eq!(limits.report_threshold, 3);
        assert_eq!(limits.admin_contact_window.num_days(), 7);
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        env::set_var("MIRROR_TEST_BAD_ID", "not-a-number");
        let err = optional_id("MIRROR_TEST_BAD_ID").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key, _) if key == "MIRROR_TEST_BAD_ID"));
        env::remove_var("MIRROR_TEST_BAD_ID");
    }
}
