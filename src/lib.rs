//! Campuswall - event-driven interaction engine for a campus social feed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Posts, comments, likes, friendships, messages            │
//! │  - Moderation and feed hydration                            │
//! └─────────────────────────────────────────────────────────────┘
//!            │ commit                          │ publish
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │       Data Layer          │   │          Event Bus            │
//! │  - SQLite (sqlx)          │   │  - bounded handler workers    │
//! │  - Counter primitives     │   │  - failure isolation          │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Listeners                             │
//! │  - Notification aggregation                                 │
//! │  - Reactive agent (chat, comment replies, summaries)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `service`: Write paths and read models
//! - `data`: Database layer and counter primitives
//! - `events`: Domain events and the in-process bus
//! - `listeners`: Notification aggregator and agent dispatcher
//! - `agent`: Text generation collaborator and prompt layouts
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus metrics

pub mod agent;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod listeners;
pub mod metrics;
pub mod service;

use std::sync::Arc;

/// Application state shared by every entry point
///
/// Cloning is cheap; all members are reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Domain event bus (already started)
    pub events: Arc<events::EventBus>,

    pub hydrator: Arc<service::Hydrator>,
    pub accounts: Arc<service::AccountService>,
    pub posts: Arc<service::PostService>,
    pub comments: Arc<service::CommentService>,
    pub friendships: Arc<service::FriendshipService>,
    pub messages: Arc<service::MessageService>,
    pub notifications: Arc<service::NotificationService>,
    pub moderation: Arc<service::ModerationService>,

    /// Reactive agent, present when `agent.enabled`
    pub agent: Option<Arc<listeners::AgentDispatcher>>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database (migrations run on connect)
    /// 2. Build services
    /// 3. Ensure the bot account exists
    /// 4. Start the event dispatcher
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let generator: Option<Arc<dyn agent::TextGenerator>> = if config.agent.enabled {
            Some(Arc::new(agent::OpenAiCompatible::new(&config.agent)?))
        } else {
            None
        };
        Self::build(config, generator).await
    }

    /// Initialize application state with a caller-provided text generator.
    ///
    /// The agent listeners are registered only if `agent.enabled` is set.
    pub async fn with_generator(
        config: config::AppConfig,
        generator: Arc<dyn agent::TextGenerator>,
    ) -> Result<Self, error::AppError> {
        let generator = config.agent.enabled.then_some(generator);
        Self::build(config, generator).await
    }

    async fn build(
        config: config::AppConfig,
        generator: Option<Arc<dyn agent::TextGenerator>>,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(
            data::Database::connect_with(&config.database.path, config.database.max_connections)
                .await?,
        );
        tracing::info!(path = %config.database.path.display(), "Database connected");

        // 2. Build services
        let events = Arc::new(events::EventBus::new(config.events.worker_concurrency));
        let max_page_size = config.feed.max_page_size;
        let bot_id = config.bot.user_id.clone();

        let hydrator = Arc::new(service::Hydrator::new(db.clone(), config.feed.clone()));
        let accounts = Arc::new(service::AccountService::new(db.clone(), config.bot.clone()));
        let posts = Arc::new(service::PostService::new(
            db.clone(),
            events.clone(),
            hydrator.clone(),
            max_page_size,
        ));
        let comments = Arc::new(service::CommentService::new(
            db.clone(),
            events.clone(),
            hydrator.clone(),
            max_page_size,
        ));
        let friendships = Arc::new(service::FriendshipService::new(
            db.clone(),
            hydrator.clone(),
        ));
        let messages = Arc::new(service::MessageService::new(
            db.clone(),
            events.clone(),
            hydrator.clone(),
            bot_id.clone(),
            max_page_size,
        ));
        let notifications = Arc::new(service::NotificationService::new(
            db.clone(),
            hydrator.clone(),
            max_page_size,
        ));
        let moderation = Arc::new(service::ModerationService::new(db.clone()));

        // 3. Ensure the bot account exists
        accounts.ensure_bot_user().await?;

        // 4. Start the event dispatcher
        let agent = generator.map(|generator| {
            Arc::new(listeners::AgentDispatcher::new(
                db.clone(),
                generator,
                comments.clone(),
                messages.clone(),
                posts.clone(),
                bot_id.clone(),
                config.agent.clone(),
            ))
        });
        let aggregator = Arc::new(listeners::NotificationAggregator::new(
            db.clone(),
            config.feed.preview_chars,
        ));
        events.start(listeners::build_subscriptions(aggregator, agent.clone()))?;

        tracing::info!(
            agent_enabled = agent.is_some(),
            workers = config.events.worker_concurrency,
            "Application state initialized successfully"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            events,
            hydrator,
            accounts,
            posts,
            comments,
            friendships,
            messages,
            notifications,
            moderation,
            agent,
        })
    }

    /// Drain pending events and stop the dispatcher.
    pub async fn shutdown(&self) {
        self.events.shutdown().await;
        tracing::info!("Application state shut down");
    }
}
