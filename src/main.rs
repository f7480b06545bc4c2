//! Campuswall binary entry point

use campuswall::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize metrics
/// 4. Initialize AppState (starts the event dispatcher)
/// 5. Start background tasks (bulletin scheduler)
/// 6. Run until Ctrl-C, then drain pending events
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    let default_filter = format!("campuswall={}", config.logging.level);
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.clone().into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.clone().into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Campuswall...");
    tracing::info!(
        database = %config.database.path.display(),
        bot = %config.bot.user_id,
        agent_enabled = config.agent.enabled,
        "Configuration loaded"
    );

    // 3. Initialize metrics
    campuswall::metrics::init_metrics();

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Start background tasks
    if config.agent.enabled && config.agent.bulletin.enabled {
        spawn_bulletin_task(state.clone());
    }

    // 6. Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    state.shutdown().await;

    Ok(())
}

/// Spawn background bulletin task
fn spawn_bulletin_task(state: AppState) {
    let Some(agent) = state.agent.clone() else {
        return;
    };

    tokio::spawn(async move {
        let interval_secs = state.config.agent.bulletin.interval_seconds.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        // Consume the immediate first tick so the first bulletin waits one interval.
        interval.tick().await;

        loop {
            interval.tick().await;

            tracing::info!("Publishing scheduled bulletin...");
            match agent.publish_bulletin().await {
                Ok(post) => {
                    tracing::info!(post_id = post.id, "Bulletin published successfully");
                }
                Err(e) => {
                    e.record("bulletin");
                    tracing::error!(error = %e, "Bulletin failed");
                }
            }
        }
    });

    tracing::info!("Bulletin task spawned");
}
