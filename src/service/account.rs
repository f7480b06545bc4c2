//! Account service
//!
//! Keeps the profile rows the core needs for hydration, moderation and
//! mute checks. Identities come from the outer authentication layer.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::BotConfig;
use crate::data::{Database, User, UserRole};
use crate::error::AppError;

fn normalize_optional_text(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Load the acting user and check it may write at `now`.
///
/// # Errors
/// - `NotFound` if the user is unknown
/// - `Forbidden` if the user is banned
/// - `RateRestricted` if the user is muted
pub(crate) async fn require_active_user(
    db: &Database,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<User, AppError> {
    let user = db.get_user(user_id).await?.ok_or(AppError::NotFound("user"))?;

    if !user.enabled {
        return Err(AppError::Forbidden);
    }
    if let Some(until) = user.active_mute(now) {
        return Err(AppError::RateRestricted { until });
    }

    Ok(user)
}

/// Account service
pub struct AccountService {
    db: Arc<Database>,
    bot: BotConfig,
}

impl AccountService {
    /// Create new account service
    pub fn new(db: Arc<Database>, bot: BotConfig) -> Self {
        Self { db, bot }
    }

    /// Get a user profile
    pub async fn get(&self, user_id: &str) -> Result<User, AppError> {
        self.db
            .get_user(user_id)
            .await?
            .ok_or(AppError::NotFound("user"))
    }

    /// Register a user or refresh its name and avatar.
    ///
    /// Ban and mute state set by moderators is left untouched.
    pub async fn upsert_profile(
        &self,
        user_id: &str,
        name: &str,
        avatar: Option<String>,
    ) -> Result<User, AppError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AppError::Validation("user id cannot be empty".to_string()));
        }
        if user_id == self.bot.user_id {
            return Err(AppError::Validation(
                "user id is reserved for the bot account".to_string(),
            ));
        }

        let name = name.trim();
        let user = User {
            id: user_id.to_string(),
            name: if name.is_empty() {
                user_id.to_string()
            } else {
                name.to_string()
            },
            avatar: normalize_optional_text(avatar),
            role: UserRole::User,
            enabled: true,
            muted_until: None,
            created_at: Utc::now(),
        };
        self.db.upsert_user(&user).await?;

        self.get(user_id).await
    }

    /// Create or refresh the bot account from configuration.
    ///
    /// Called once during startup; the bot is never muted or banned by
    /// this call.
    pub async fn ensure_bot_user(&self) -> Result<User, AppError> {
        let user = User {
            id: self.bot.user_id.clone(),
            name: self.bot.display_name.clone(),
            avatar: normalize_optional_text(Some(self.bot.avatar.clone())),
            role: UserRole::Bot,
            enabled: true,
            muted_until: None,
            created_at: Utc::now(),
        };
        self.db.upsert_user(&user).await?;

        tracing::info!(bot_id = %user.id, "Bot account ready");
        self.get(&user.id).await
    }
}
