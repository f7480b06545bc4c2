//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub bot: BotConfig,
    pub agent: AgentConfig,
    pub events: EventsConfig,
    pub feed: FeedConfig,
    pub logging: LoggingConfig,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    8
}

/// The automated account the reactive agent speaks as
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// User id of the bot account (e.g., "campus-bot")
    pub user_id: String,
    pub display_name: String,
    pub avatar: String,
}

/// Text generation and reactive agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Master switch for all agent listeners
    pub enabled: bool,
    /// OpenAI-compatible base URL (requests go to `{api_url}/chat/completions`)
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of recent messages replayed into a chat reply
    pub context_window: usize,
    /// Character budget applied to each replayed message
    pub max_message_chars: usize,
    /// Persona used for private chat replies
    pub chat_persona: String,
    /// Persona used for comment replies
    pub reply_persona: String,
    /// Persona used for post summaries and bulletins
    pub summary_persona: String,
    /// Reply sent when generation fails; `None` skips silently
    pub fallback_reply: Option<String>,
    /// Publish a bot summary under new posts
    pub summarize_posts: bool,
    /// Delay before the summary is generated
    pub summary_delay_ms: u64,
    /// Posts shorter than this (in characters) are not summarized
    pub summary_min_chars: usize,
    pub bulletin: BulletinConfig,
}

/// Scheduled bot post
#[derive(Debug, Clone, Deserialize)]
pub struct BulletinConfig {
    pub enabled: bool,
    /// Interval between bulletins in seconds (default: 86400 = 24h)
    pub interval_seconds: u64,
    /// Prompt template; `{date}` and `{location}` are substituted
    pub prompt: String,
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Domain event dispatch
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Maximum number of listener invocations running at once
    pub worker_concurrency: usize,
}

/// Feed rendering and paging
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Name shown in place of the author of an anonymous post
    pub anonymous_name: String,
    pub anonymous_avatar: String,
    /// Avatar used when a user has none
    pub default_avatar: String,
    /// Upper bound on page size requested by callers
    pub max_page_size: u32,
    /// Characters kept in notification previews
    pub preview_chars: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (CAMPUSWALL__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("database.path", "data/campuswall.db")?
            .set_default("database.max_connections", 8)?
            .set_default("bot.user_id", "campus-bot")?
            .set_default("bot.display_name", "Campus Bot")?
            .set_default("bot.avatar", "")?
            .set_default("agent.enabled", false)?
            .set_default("agent.api_url", "https://api.deepseek.com")?
            .set_default("agent.api_key", "")?
            .set_default("agent.model", "deepseek-chat")?
            .set_default("agent.timeout_seconds", 30)?
            .set_default("agent.context_window", 20)?
            .set_default("agent.max_message_chars", 500)?
            .set_default(
                "agent.chat_persona",
                "You are the campus wall assistant. Reply briefly and casually, like a friend. \
                 If you do not know the answer, say so. Do not repeat what the user said.",
            )?
            .set_default(
                "agent.reply_persona",
                "You are the campus wall assistant. Reply to the comment in a warm, playful \
                 tone in under fifty words.",
            )?
            .set_default(
                "agent.summary_persona",
                "You are the campus wall assistant. Summarize the post in a friendly tone in \
                 under fifty words. If it is a question, offer a short suggestion.",
            )?
            .set_default(
                "agent.fallback_reply",
                "I'm a little dizzy right now, let's talk later~",
            )?
            .set_default("agent.summarize_posts", true)?
            .set_default("agent.summary_delay_ms", 2000)?
            .set_default("agent.summary_min_chars", 3)?
            .set_default("agent.bulletin.enabled", false)?
            .set_default("agent.bulletin.interval_seconds", 86400)?
            .set_default(
                "agent.bulletin.prompt",
                "Today is {date} in {location}. Write a cheerful morning bulletin for \
                 students in about one hundred words, with one practical tip for the day.",
            )?
            .set_default("events.worker_concurrency", 16)?
            .set_default("feed.anonymous_name", "Anonymous")?
            .set_default("feed.anonymous_avatar", "")?
            .set_default("feed.default_avatar", "")?
            .set_default("feed.max_page_size", 50)?
            .set_default("feed.preview_chars", 100)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (CAMPUSWALL__*)
            .add_source(
                Environment::with_prefix("CAMPUSWALL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.bot.user_id.trim().is_empty() {
            return Err(AppError::Config("bot.user_id must not be empty".to_string()));
        }

        if self.events.worker_concurrency == 0 {
            return Err(AppError::Config(
                "events.worker_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.feed.max_page_size == 0 {
            return Err(AppError::Config(
                "feed.max_page_size must be greater than 0".to_string(),
            ));
        }

        if self.agent.context_window == 0 || self.agent.max_message_chars == 0 {
            return Err(AppError::Config(
                "agent.context_window and agent.max_message_chars must be greater than 0"
                    .to_string(),
            ));
        }

        if self.agent.enabled {
            if self.agent.api_key.trim().is_empty() {
                return Err(AppError::Config(
                    "agent.api_key is required when agent.enabled=true".to_string(),
                ));
            }
            if self.agent.timeout_seconds == 0 {
                return Err(AppError::Config(
                    "agent.timeout_seconds must be greater than 0".to_string(),
                ));
            }
        }

        if self.agent.bulletin.enabled && self.agent.bulletin.interval_seconds == 0 {
            return Err(AppError::Config(
                "agent.bulletin.interval_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AppError;

    pub(crate) fn valid_config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/campuswall-test.db"),
                max_connections: 4,
            },
            bot: BotConfig {
                user_id: "campus-bot".to_string(),
                display_name: "Campus Bot".to_string(),
                avatar: String::new(),
            },
            agent: AgentConfig {
                enabled: false,
                api_url: "http://localhost:9".to_string(),
                api_key: String::new(),
                model: "test-model".to_string(),
                timeout_seconds: 5,
                context_window: 20,
                max_message_chars: 500,
                chat_persona: "chat".to_string(),
                reply_persona: "reply".to_string(),
                summary_persona: "summary".to_string(),
                fallback_reply: None,
                summarize_posts: false,
                summary_delay_ms: 0,
                summary_min_chars: 3,
                bulletin: BulletinConfig {
                    enabled: false,
                    interval_seconds: 86_400,
                    prompt: "Today is {date}".to_string(),
                    location: None,
                    tags: Vec::new(),
                },
            },
            events: EventsConfig {
                worker_concurrency: 4,
            },
            feed: FeedConfig {
                anonymous_name: "Anonymous".to_string(),
                anonymous_avatar: String::new(),
                default_avatar: String::new(),
                max_page_size: 50,
                preview_chars: 100,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_disabled_agent_without_key() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_enabled_agent_without_key() {
        let mut config = valid_config();
        config.agent.enabled = true;

        let error = config
            .validate()
            .expect_err("enabled agent without api key must fail");
        assert!(matches!(
            error,
            AppError::Config(message) if message.contains("agent.api_key")
        ));
    }

    #[test]
    fn validate_rejects_zero_worker_concurrency() {
        let mut config = valid_config();
        config.events.worker_concurrency = 0;

        let error = config
            .validate()
            .expect_err("zero workers must fail");
        assert!(matches!(
            error,
            AppError::Config(message) if message.contains("events.worker_concurrency")
        ));
    }

    #[test]
    fn validate_rejects_blank_bot_identity() {
        let mut config = valid_config();
        config.bot.user_id = "  ".to_string();

        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn validate_rejects_zero_context_window() {
        let mut config = valid_config();
        config.agent.context_window = 0;

        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
