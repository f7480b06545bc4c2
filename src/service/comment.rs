//! Comment service
//!
//! Resolves nested replies into the two-level floor/reply layout. However
//! deep a client nests a reply, it is stored under the floor it belongs to
//! with `root_parent_id` pointing at that floor.

use chrono::Utc;
use std::sync::Arc;

use super::account::require_active_user;
use super::hydration::{CommentView, Hydrator};
use crate::data::{
    Comment, Database, LikeAction, LikeOutcome, LikeTarget, MediaInput, NewComment, PageRequest,
};
use crate::error::AppError;
use crate::events::{DomainEvent, EventBus};

/// A comment as submitted by a client
#[derive(Debug, Clone, Default)]
pub struct CommentDraft {
    pub post_id: i64,
    pub content: String,
    /// 0 to open a new floor
    pub parent_id: i64,
    /// Defaults to the parent comment's author for replies
    pub reply_to_uid: Option<String>,
    pub media: Vec<MediaInput>,
}

impl CommentDraft {
    /// A floor on `post_id`
    pub fn floor(post_id: i64, content: impl Into<String>) -> Self {
        Self {
            post_id,
            content: content.into(),
            ..Self::default()
        }
    }

    /// A reply to comment `parent_id` on `post_id`
    pub fn reply(post_id: i64, parent_id: i64, content: impl Into<String>) -> Self {
        Self {
            post_id,
            parent_id,
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Comment service
pub struct CommentService {
    db: Arc<Database>,
    events: Arc<EventBus>,
    hydrator: Arc<Hydrator>,
    max_page_size: u32,
}

impl CommentService {
    /// Create new comment service
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

    /// Publish a comment
    ///
    /// # Arguments
    /// * `author_id` - Acting user
    /// * `draft` - Target post, content, parent comment (0 for a floor),
    ///   optional reply target and media
    ///
    /// # Side Effects
    /// - Inserts the comment and its media
    /// - Increments the post's `comment_count` and, for replies, the
    ///   floor's `reply_count`, in the same transaction
    /// - Publishes `CommentCreated` after commit
    pub async fn publish(&self, author_id: &str, draft: CommentDraft) -> Result<Comment, AppError> {
        let now = Utc::now();
        require_active_user(&self.db, author_id, now).await?;

        let content = draft.content.trim().to_string();
        let media: Vec<_> = draft
            .media
            .into_iter()
            .filter(|media| !media.url.trim().is_empty())
            .collect();
        if content.is_empty() && media.is_empty() {
            return Err(AppError::Validation(
                "comment content or media is required".to_string(),
            ));
        }

        let post = self
            .db
            .get_post(draft.post_id)
            .await?
            .filter(|post| !post.is_deleted)
            .ok_or(AppError::NotFound("post"))?;

        let (root_parent_id, reply_to_uid, parent_author_id) = if draft.parent_id == 0 {
            (0, None, None)
        } else {
            let parent = self
                .db
                .get_comment(draft.parent_id)
                .await?
                .ok_or(AppError::NotFound("comment"))?;
            if parent.post_id != post.id {
                return Err(AppError::Validation(
                    "parent comment belongs to another post".to_string(),
                ));
            }

            let reply_to = draft
                .reply_to_uid
                .filter(|uid| !uid.trim().is_empty())
                .unwrap_or_else(|| parent.author_id.clone());
            (parent.floor_id(), Some(reply_to), Some(parent.author_id))
        };

        let comment = self
            .db
            .insert_comment(
                &NewComment {
                    post_id: post.id,
                    author_id: author_id.to_string(),
                    content: content.clone(),
                    parent_id: draft.parent_id,
                    root_parent_id,
                    reply_to_uid,
                    media,
                },
                now,
            )
            .await?;

        tracing::info!(
            comment_id = comment.id,
            post_id = post.id,
            parent_id = comment.parent_id,
            root_parent_id = comment.root_parent_id,
            author_id,
            "Comment published"
        );
        self.events.publish(DomainEvent::CommentCreated {
            comment_id: comment.id,
            post_id: post.id,
            author_id: author_id.to_string(),
            parent_id: comment.parent_id,
            root_parent_id: comment.root_parent_id,
            reply_to_uid: comment.reply_to_uid.clone(),
            content,
            post_author_id: post.author_id,
            parent_author_id,
        });

        Ok(comment)
    }

    /// Get comment by ID
    pub async fn get(&self, comment_id: i64) -> Result<Comment, AppError> {
        self.db
            .get_comment(comment_id)
            .await?
            .ok_or(AppError::NotFound("comment"))
    }

    /// Delete a comment as its author or as the post's author.
    ///
    /// The comment is tombstoned: content replaced, media detached, row
    /// and counters kept so the thread stays intact.
    pub async fn delete(&self, actor_id: &str, comment_id: i64) -> Result<(), AppError> {
        let comment = self.get(comment_id).await?;

        let is_author = comment.author_id == actor_id;
        let is_post_author = match self.db.get_post(comment.post_id).await? {
            Some(post) => post.author_id == actor_id,
            None => false,
        };
        if !is_author && !is_post_author {
            return Err(AppError::Forbidden);
        }

        if self.db.tombstone_comment(comment_id).await? {
            tracing::info!(comment_id, actor_id, "Comment tombstoned");
        }
        Ok(())
    }

    // =========================================================================
    // Likes
    // =========================================================================

    /// Like a comment
    ///
    /// # Errors
    /// `Conflict` if the user already likes it
    pub async fn like(&self, user_id: &str, comment_id: i64) -> Result<LikeOutcome, AppError> {
        let outcome = self
            .apply_like(user_id, comment_id, LikeAction::Like)
            .await?;
        if !outcome.changed {
            return Err(AppError::Conflict("comment already liked".to_string()));
        }
        Ok(outcome)
    }

    /// Remove a like; no-op when absent
    pub async fn unlike(&self, user_id: &str, comment_id: i64) -> Result<LikeOutcome, AppError> {
        self.apply_like(user_id, comment_id, LikeAction::Unlike)
            .await
    }

    /// Flip the like state
    pub async fn toggle_like(
        &self,
        user_id: &str,
        comment_id: i64,
    ) -> Result<LikeOutcome, AppError> {
        self.apply_like(user_id, comment_id, LikeAction::Toggle)
            .await
    }

    async fn apply_like(
        &self,
        user_id: &str,
        comment_id: i64,
        action: LikeAction,
    ) -> Result<LikeOutcome, AppError> {
        let outcome = self
            .db
            .apply_like(user_id, LikeTarget::Comment(comment_id), action, Utc::now())
            .await?;

        if outcome.changed && outcome.liked {
            self.events.publish(DomainEvent::Liked {
                target: outcome.target,
                liker_id: user_id.to_string(),
                owner_id: outcome.owner_id.clone(),
                post_id: outcome.post_id,
            });
        }

        Ok(outcome)
    }

    // =========================================================================
    // Threads
    // =========================================================================

    /// Floors of a post, most liked first, then newest
    pub async fn list_floors(
        &self,
        viewer: Option<&str>,
        post_id: i64,
        page: PageRequest,
    ) -> Result<Vec<CommentView>, AppError> {
        let rows = self
            .db
            .list_floors(post_id, page.clamped(self.max_page_size))
            .await?;
        self.hydrator.comments(viewer, rows).await
    }

    /// All replies under a floor, oldest first
    pub async fn list_replies(
        &self,
        viewer: Option<&str>,
        floor_id: i64,
    ) -> Result<Vec<CommentView>, AppError> {
        let rows = self.db.list_replies(floor_id).await?;
        self.hydrator.comments(viewer, rows).await
    }

    /// A user's comment history, newest first
    pub async fn list_by_author(
        &self,
        viewer: Option<&str>,
        author_id: &str,
        page: PageRequest,
    ) -> Result<Vec<CommentView>, AppError> {
        let rows = self
            .db
            .list_comments_by_author(author_id, page.clamped(self.max_page_size))
            .await?;
        self.hydrator.comments(viewer, rows).await
    }
}
