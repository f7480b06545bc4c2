//! Common test utilities for E2E tests

#![allow(dead_code)]

use async_trait::async_trait;
use campuswall::agent::{CompletionRequest, TextGenerator};
use campuswall::error::AppError;
use campuswall::{AppState, config};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const BOT: &str = "campus-bot";
pub const FALLBACK: &str = "I'm a little dizzy right now, let's talk later~";

/// Text generator returning a fixed reply and recording every request
pub struct CannedGenerator {
    reply: Option<String>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl CannedGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A generator whose every call fails
    pub fn failing() -> Self {
        Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AppError> {
        self.requests.lock().unwrap().push(request);
        self.reply
            .clone()
            .ok_or_else(|| AppError::ExternalService("generator offline".to_string()))
    }
}

/// Test application instance
pub struct TestApp {
    pub state: AppState,
    pub generator: Arc<CannedGenerator>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    /// Create a test app with the agent enabled and a canned generator
    pub async fn new() -> Self {
        Self::with_generator(CannedGenerator::replying("bot says hi"), |_| {}).await
    }

    /// Create a test app with a custom generator and configuration tweaks
    pub async fn with_generator(
        generator: CannedGenerator,
        configure: impl FnOnce(&mut config::AppConfig),
    ) -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let mut config = config::AppConfig {
            database: config::DatabaseConfig {
                path: db_path,
                max_connections: 8,
            },
            bot: config::BotConfig {
                user_id: BOT.to_string(),
                display_name: "Campus Bot".to_string(),
                avatar: "https://cdn.test/bot.png".to_string(),
            },
            agent: config::AgentConfig {
                enabled: true,
                api_url: "http://127.0.0.1:9".to_string(),
                api_key: "test".to_string(),
                model: "test-model".to_string(),
                timeout_seconds: 5,
                context_window: 20,
                max_message_chars: 500,
                chat_persona: "chat persona".to_string(),
                reply_persona: "reply persona".to_string(),
                summary_persona: "summary persona".to_string(),
                fallback_reply: Some(FALLBACK.to_string()),
                summarize_posts: false,
                summary_delay_ms: 0,
                summary_min_chars: 3,
                bulletin: config::BulletinConfig {
                    enabled: false,
                    interval_seconds: 86_400,
                    prompt: "Today is {date} in {location}.".to_string(),
                    location: Some("North Campus".to_string()),
                    tags: vec!["bulletin".to_string()],
                },
            },
            events: config::EventsConfig {
                worker_concurrency: 4,
            },
            feed: config::FeedConfig {
                anonymous_name: "Anonymous".to_string(),
                anonymous_avatar: "https://cdn.test/anon.png".to_string(),
                default_avatar: "https://cdn.test/default.png".to_string(),
                max_page_size: 50,
                preview_chars: 100,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        configure(&mut config);

        // Initialize app state
        let generator = Arc::new(generator);
        let state = AppState::with_generator(config, generator.clone())
            .await
            .unwrap();

        Self {
            state,
            generator,
            _temp_dir: temp_dir,
        }
    }

    /// Create a test user
    pub async fn create_user(&self, id: &str) {
        self.state
            .accounts
            .upsert_profile(id, &format!("User {id}"), None)
            .await
            .unwrap();
    }

    /// Make two existing users friends
    pub async fn befriend(&self, a: &str, b: &str) {
        let request = self.state.friendships.send_request(a, b).await.unwrap();
        self.state
            .friendships
            .respond(request.id, b, true)
            .await
            .unwrap();
    }

    /// Wait until every published event has been handled
    pub async fn settle(&self) {
        self.state.events.wait_idle().await;
    }
}
