//! Post service
//!
//! Handles post operations including create, view, like, edit, delete
//! and the feed queries.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use super::account::require_active_user;
use super::hydration::{Hydrator, PostView};
use crate::data::{
    Database, LikeAction, LikeOutcome, LikeTarget, NewPost, PageRequest, Post, PostStatus,
};
use crate::error::AppError;
use crate::events::{DomainEvent, EventBus};

/// Trim tag names, drop blanks and duplicates, keep first-seen order.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|tag| tag.trim().trim_start_matches('#').trim())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_string()))
        .map(str::to_string)
        .collect()
}

fn normalize_location(location: Option<&str>) -> Option<String> {
    location
        .map(str::trim)
        .filter(|location| !location.is_empty())
        .map(str::to_string)
}

/// Post service
pub struct PostService {
    db: Arc<Database>,
    events: Arc<EventBus>,
    hydrator: Arc<Hydrator>,
    max_page_size: u32,
}

impl PostService {
    /// Create new post service
    pub fn new(
        db: Arc<Database>,
        events: Arc<EventBus>,
        hydrator: Arc<Hydrator>,
        max_page_size: u32,
    ) -> Self {
        Self {
            db,
            events,
            hydrator,
            max_page_size,
        }
    }

    // =========================================================================
    // CRUD Operations
    // =========================================================================

    /// Create a new post
    ///
    /// # Arguments
    /// * `author_id` - Acting user
    /// * `post` - Content, location, anonymity flag, media and tags
    ///
    /// # Side Effects
    /// - Inserts post, media and tags in one transaction
    /// - Publishes `PostCreated` after commit
    pub async fn create(&self, author_id: &str, post: NewPost) -> Result<Post, AppError> {
        let now = Utc::now();
        require_active_user(&self.db, author_id, now).await?;

        let content = post.content.trim().to_string();
        let media: Vec<_> = post
            .media
            .into_iter()
            .filter(|media| !media.url.trim().is_empty())
            .collect();
        if content.is_empty() && media.is_empty() {
            return Err(AppError::Validation(
                "post content or media is required".to_string(),
            ));
        }

        let post = NewPost {
            content,
            location: normalize_location(post.location.as_deref()),
            is_anonymous: post.is_anonymous,
            media,
            tags: normalize_tags(&post.tags),
        };
        let stored = self.db.insert_post(author_id, &post, now).await?;

        tracing::info!(post_id = stored.id, author_id, "Post created");
        self.events.publish(DomainEvent::PostCreated {
            post_id: stored.id,
            author_id: stored.author_id.clone(),
            content: stored.content.clone(),
            is_anonymous: stored.is_anonymous,
        });

        Ok(stored)
    }

    /// Get a post row the viewer may see.
    ///
    /// Deleted posts are gone for everyone; blocked posts are only visible
    /// to their author.
    pub async fn get(&self, viewer: Option<&str>, post_id: i64) -> Result<Post, AppError> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or(AppError::NotFound("post"))?;

        let hidden = post.is_deleted
            || (post.status == PostStatus::Blocked && viewer != Some(post.author_id.as_str()));
        if hidden {
            return Err(AppError::NotFound("post"));
        }
        Ok(post)
    }

    /// Open a post: counts one view and returns the hydrated post.
    pub async fn view(&self, viewer: Option<&str>, post_id: i64) -> Result<PostView, AppError> {
        let mut post = self.get(viewer, post_id).await?;
        if self.db.record_post_view(post_id).await? {
            post.view_count = post.view_count.saturating_add(1);
        }

        self.hydrator
            .posts(viewer, vec![post])
            .await?
            .pop()
            .ok_or(AppError::NotFound("post"))
    }

    /// Edit content, location and tags of an own post.
    pub async fn update(
        &self,
        actor_id: &str,
        post_id: i64,
        content: &str,
        location: Option<&str>,
        tags: &[String],
    ) -> Result<Post, AppError> {
        let now = Utc::now();
        require_active_user(&self.db, actor_id, now).await?;

        let post = self.get(Some(actor_id), post_id).await?;
        if post.author_id != actor_id {
            return Err(AppError::Forbidden);
        }

        let content = content.trim();
        if content.is_empty() && self.db.get_post_media_batch(&[post_id]).await?.is_empty() {
            return Err(AppError::Validation(
                "post content or media is required".to_string(),
            ));
        }

        let location = normalize_location(location);
        self.db
            .update_post(
                post_id,
                content,
                location.as_deref(),
                &normalize_tags(tags),
                now,
            )
            .await
    }

    /// Delete an own post.
    ///
    /// The row is redacted rather than removed so comments, likes and
    /// notifications pointing at it stay consistent.
    pub async fn delete(&self, actor_id: &str, post_id: i64) -> Result<(), AppError> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or(AppError::NotFound("post"))?;
        if post.author_id != actor_id {
            return Err(AppError::Forbidden);
        }

        if self.db.soft_delete_post(post_id, Utc::now()).await? {
            tracing::info!(post_id, actor_id, "Post deleted by author");
        }
        Ok(())
    }

    // =========================================================================
    // Likes
    // =========================================================================

    /// Like a post
    ///
    /// # Errors
    /// `Conflict` if the user already likes it
    pub async fn like(&self, user_id: &str, post_id: i64) -> Result<LikeOutcome, AppError> {
        let outcome = self.apply_like(user_id, post_id, LikeAction::Like).await?;
        if !outcome.changed {
            return Err(AppError::Conflict("post already liked".to_string()));
        }
        Ok(outcome)
    }

    /// Remove a like; no-op when absent
    pub async fn unlike(&self, user_id: &str, post_id: i64) -> Result<LikeOutcome, AppError> {
        self.apply_like(user_id, post_id, LikeAction::Unlike).await
    }

    /// Flip the like state
    pub async fn toggle_like(&self, user_id: &str, post_id: i64) -> Result<LikeOutcome, AppError> {
        self.apply_like(user_id, post_id, LikeAction::Toggle).await
    }

    async fn apply_like(
        &self,
        user_id: &str,
        post_id: i64,
        action: LikeAction,
    ) -> Result<LikeOutcome, AppError> {
        let outcome = self
            .db
            .apply_like(user_id, LikeTarget::Post(post_id), action, Utc::now())
            .await?;

        if outcome.changed && outcome.liked {
            self.events.publish(DomainEvent::Liked {
                target: outcome.target,
                liker_id: user_id.to_string(),
                owner_id: outcome.owner_id.clone(),
                post_id: outcome.post_id,
            });
        }
        tracing::debug!(post_id, user_id, liked = outcome.liked, "Post like applied");

        Ok(outcome)
    }

    // =========================================================================
    // Feeds
    // =========================================================================

    /// Latest visible posts
    pub async fn latest(
        &self,
        viewer: Option<&str>,
        page: PageRequest,
    ) -> Result<Vec<PostView>, AppError> {
        let rows = self
            .db
            .list_visible_posts(page.clamped(self.max_page_size))
            .await?;
        self.hydrator.posts(viewer, rows).await
    }

    /// Posts of one author. The author also sees their blocked posts;
    /// other viewers never see the author's anonymous posts.
    pub async fn by_author(
        &self,
        viewer: Option<&str>,
        author_id: &str,
        page: PageRequest,
    ) -> Result<Vec<PostView>, AppError> {
        let is_owner = viewer == Some(author_id);
        let mut rows = self
            .db
            .list_posts_by_author(author_id, is_owner, page.clamped(self.max_page_size))
            .await?;
        if !is_owner {
            rows.retain(|post| !post.is_anonymous);
        }
        self.hydrator.posts(viewer, rows).await
    }

    /// Visible posts liked by `user_id`
    pub async fn liked_by(
        &self,
        viewer: Option<&str>,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Vec<PostView>, AppError> {
        let rows = self
            .db
            .list_liked_posts(user_id, page.clamped(self.max_page_size))
            .await?;
        self.hydrator.posts(viewer, rows).await
    }

    /// Keyword search over content and tag names
    pub async fn search(
        &self,
        viewer: Option<&str>,
        keyword: &str,
        page: PageRequest,
    ) -> Result<Vec<PostView>, AppError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .db
            .search_posts(keyword, page.clamped(self.max_page_size))
            .await?;
        self.hydrator.posts(viewer, rows).await
    }

    /// Posts ranked by views + likes + comments
    pub async fn hot(
        &self,
        viewer: Option<&str>,
        page: PageRequest,
    ) -> Result<Vec<PostView>, AppError> {
        let rows = self
            .db
            .list_hot_posts(page.clamped(self.max_page_size))
            .await?;
        self.hydrator.posts(viewer, rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let tags = vec![
            " study ".to_string(),
            "#study".to_string(),
            "".to_string(),
            "library".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["study", "library"]);
    }

    #[test]
    fn blank_location_is_dropped() {
        assert_eq!(normalize_location(Some("  ")), None);
        assert_eq!(
            normalize_location(Some(" Library ")),
            Some("Library".to_string())
        );
    }
}
