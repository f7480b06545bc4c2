//! Moderation service
//!
//! Entry point for moderator actions. Callers are trusted: no ownership
//! checks happen here. Physical removal of content is only reachable from
//! this service.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::data::{Database, PostStatus};
use crate::error::AppError;

/// Moderation service
pub struct ModerationService {
    db: Arc<Database>,
}

impl ModerationService {
    /// Create new moderation service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Hide a post from every feed
    pub async fn block_post(&self, post_id: i64) -> Result<(), AppError> {
        self.set_post_status(post_id, PostStatus::Blocked).await
    }

    pub async fn unblock_post(&self, post_id: i64) -> Result<(), AppError> {
        self.set_post_status(post_id, PostStatus::Visible).await
    }

    async fn set_post_status(&self, post_id: i64, status: PostStatus) -> Result<(), AppError> {
        if !self.db.set_post_status(post_id, status).await? {
            return Err(AppError::NotFound("post"));
        }
        tracing::info!(post_id, ?status, "Post moderation status changed");
        Ok(())
    }

    /// Forbid a user from writing until `until`
    pub async fn mute_user(&self, user_id: &str, until: DateTime<Utc>) -> Result<(), AppError> {
        if until <= Utc::now() {
            return Err(AppError::Validation(
                "mute expiry must be in the future".to_string(),
            ));
        }
        self.set_muted_until(user_id, Some(until)).await
    }

    pub async fn unmute_user(&self, user_id: &str) -> Result<(), AppError> {
        self.set_muted_until(user_id, None).await
    }

    async fn set_muted_until(
        &self,
        user_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        if !self.db.set_user_muted_until(user_id, until).await? {
            return Err(AppError::NotFound("user"));
        }
        tracing::info!(user_id, ?until, "User mute changed");
        Ok(())
    }

    /// Disable an account: no writes, content hidden from feeds
    pub async fn ban_user(&self, user_id: &str) -> Result<(), AppError> {
        self.set_enabled(user_id, false).await
    }

    pub async fn unban_user(&self, user_id: &str) -> Result<(), AppError> {
        self.set_enabled(user_id, true).await
    }

    async fn set_enabled(&self, user_id: &str, enabled: bool) -> Result<(), AppError> {
        if !self.db.set_user_enabled(user_id, enabled).await? {
            return Err(AppError::NotFound("user"));
        }
        tracing::info!(user_id, enabled, "User enabled flag changed");
        Ok(())
    }

    /// Physically remove a comment, and for a floor its replies.
    ///
    /// Returns the number of removed comments.
    pub async fn purge_comment(&self, comment_id: i64) -> Result<u64, AppError> {
        let removed = self.db.purge_comment(comment_id).await?;
        if removed == 0 {
            return Err(AppError::NotFound("comment"));
        }
        tracing::warn!(comment_id, removed, "Comment purged by moderator");
        Ok(removed)
    }

    /// Physically remove a post with everything attached to it
    pub async fn purge_post(&self, post_id: i64) -> Result<(), AppError> {
        if !self.db.purge_post(post_id).await? {
            return Err(AppError::NotFound("post"));
        }
        tracing::warn!(post_id, "Post purged by moderator");
        Ok(())
    }
}
