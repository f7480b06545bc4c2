//! Notification aggregator
//!
//! Likes, comments and replies always produce a fresh row. Private
//! messages fold into the receiver's unread row from the same sender.
//! Nobody is ever notified about their own action.

use std::sync::Arc;

use crate::agent::truncate_chars;
use crate::data::{Database, LikeTarget, NewNotification, NotificationType, NotificationWrite};
use crate::error::AppError;
use crate::events::{DomainEvent, EventEnvelope};
use crate::metrics::NOTIFICATIONS_WRITTEN_TOTAL;

pub struct NotificationAggregator {
    db: Arc<Database>,
    preview_chars: usize,
}

impl NotificationAggregator {
    pub fn new(db: Arc<Database>, preview_chars: usize) -> Self {
        Self { db, preview_chars }
    }

    /// Notify the post author about a floor, or the reply target about a
    /// reply.
    pub async fn on_comment_created(&self, envelope: &EventEnvelope) -> Result<(), AppError> {
        let DomainEvent::CommentCreated {
            comment_id,
            post_id,
            author_id,
            parent_id,
            reply_to_uid,
            content,
            post_author_id,
            parent_author_id,
            ..
        } = &envelope.event
        else {
            return Ok(());
        };

        let (receiver_id, notification_type) = if *parent_id == 0 {
            (Some(post_author_id), NotificationType::CommentPost)
        } else {
            (
                reply_to_uid.as_ref().or(parent_author_id.as_ref()),
                NotificationType::ReplyComment,
            )
        };
        let Some(receiver_id) = receiver_id else {
            return Ok(());
        };

        self.insert(NewNotification {
            receiver_id: receiver_id.clone(),
            sender_id: author_id.clone(),
            notification_type,
            post_id: Some(*post_id),
            comment_id: Some(*comment_id),
            content: Some(truncate_chars(content, self.preview_chars)),
            created_at: envelope.occurred_at,
        })
        .await
    }

    /// Notify the owner of a liked post or comment.
    pub async fn on_liked(&self, envelope: &EventEnvelope) -> Result<(), AppError> {
        let DomainEvent::Liked {
            target,
            liker_id,
            owner_id,
            post_id,
        } = &envelope.event
        else {
            return Ok(());
        };

        let (notification_type, comment_id) = match target {
            LikeTarget::Post(_) => (NotificationType::LikePost, None),
            LikeTarget::Comment(id) => (NotificationType::LikeComment, Some(*id)),
        };

        self.insert(NewNotification {
            receiver_id: owner_id.clone(),
            sender_id: liker_id.clone(),
            notification_type,
            post_id: Some(*post_id),
            comment_id,
            content: None,
            created_at: envelope.occurred_at,
        })
        .await
    }

    /// Fold a private message into the receiver's unread notification from
    /// the same sender.
    pub async fn on_message_sent(&self, envelope: &EventEnvelope) -> Result<(), AppError> {
        let DomainEvent::MessageSent {
            sender_id,
            receiver_id,
            content,
            sent_at,
            ..
        } = &envelope.event
        else {
            return Ok(());
        };
        if sender_id == receiver_id {
            return Ok(());
        }

        let notification = NewNotification {
            receiver_id: receiver_id.clone(),
            sender_id: sender_id.clone(),
            notification_type: NotificationType::PrivateMessage,
            post_id: None,
            comment_id: None,
            content: Some(truncate_chars(content, self.preview_chars)),
            created_at: *sent_at,
        };
        let write = self.db.upsert_message_notification(&notification).await?;

        NOTIFICATIONS_WRITTEN_TOTAL
            .with_label_values(&[NotificationType::PrivateMessage.as_str(), write.as_str()])
            .inc();
        if write == NotificationWrite::Stale {
            tracing::debug!(
                event_id = %envelope.id,
                receiver_id = %receiver_id,
                "Older message arrived late, notification kept"
            );
        }
        Ok(())
    }

    async fn insert(&self, notification: NewNotification) -> Result<(), AppError> {
        if notification.sender_id == notification.receiver_id {
            return Ok(());
        }

        let id = self.db.insert_notification(&notification).await?;
        NOTIFICATIONS_WRITTEN_TOTAL
            .with_label_values(&[
                notification.notification_type.as_str(),
                NotificationWrite::Inserted.as_str(),
            ])
            .inc();
        tracing::debug!(
            notification_id = id,
            receiver_id = %notification.receiver_id,
            notification_type = notification.notification_type.as_str(),
            "Notification written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    use crate::data::PageRequest;

    async fn setup(preview_chars: usize) -> (NotificationAggregator, Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        (
            NotificationAggregator::new(db.clone(), preview_chars),
            db,
            temp_dir,
        )
    }

    fn comment_event(author: &str, parent_id: i64, reply_to: Option<&str>) -> EventEnvelope {
        EventEnvelope::new(DomainEvent::CommentCreated {
            comment_id: 10,
            post_id: 1,
            author_id: author.to_string(),
            parent_id,
            root_parent_id: parent_id,
            reply_to_uid: reply_to.map(str::to_string),
            content: "a fairly long comment body".to_string(),
            post_author_id: "alice".to_string(),
            parent_author_id: (parent_id != 0).then(|| "bob".to_string()),
        })
    }

    #[tokio::test]
    async fn floor_notifies_post_author_with_preview() {
        let (aggregator, db, _temp_dir) = setup(6).await;

        aggregator
            .on_comment_created(&comment_event("bob", 0, None))
            .await
            .unwrap();

        let rows = db.list_notifications("alice", PageRequest::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].notification_type, NotificationType::CommentPost);
        assert_eq!(rows[0].content.as_deref(), Some("a fair"));
        assert_eq!(rows[0].comment_id, Some(10));
    }

    #[tokio::test]
    async fn reply_notifies_reply_target_only() {
        let (aggregator, db, _temp_dir) = setup(100).await;

        aggregator
            .on_comment_created(&comment_event("carol", 5, Some("bob")))
            .await
            .unwrap();

        assert_eq!(db.count_unread_notifications("bob").await.unwrap(), 1);
        assert_eq!(db.count_unread_notifications("alice").await.unwrap(), 0);
        let rows = db.list_notifications("bob", PageRequest::default()).await.unwrap();
        assert_eq!(rows[0].notification_type, NotificationType::ReplyComment);
    }

    #[tokio::test]
    async fn self_actions_are_silent() {
        let (aggregator, db, _temp_dir) = setup(100).await;

        aggregator
            .on_comment_created(&comment_event("alice", 0, None))
            .await
            .unwrap();
        aggregator
            .on_liked(&EventEnvelope::new(DomainEvent::Liked {
                target: LikeTarget::Post(1),
                liker_id: "alice".to_string(),
                owner_id: "alice".to_string(),
                post_id: 1,
            }))
            .await
            .unwrap();

        assert_eq!(db.count_unread_notifications("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn comment_likes_carry_the_comment_id() {
        let (aggregator, db, _temp_dir) = setup(100).await;

        for _ in 0..2 {
            aggregator
                .on_liked(&EventEnvelope::new(DomainEvent::Liked {
                    target: LikeTarget::Comment(7),
                    liker_id: "bob".to_string(),
                    owner_id: "alice".to_string(),
                    post_id: 1,
                }))
                .await
                .unwrap();
        }

        // Likes never aggregate
        let rows = db.list_notifications("alice", PageRequest::default()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|n| n.comment_id == Some(7)
            && n.notification_type == NotificationType::LikeComment));
    }

    #[tokio::test]
    async fn reordered_messages_converge_on_newest() {
        let (aggregator, db, _temp_dir) = setup(100).await;
        let first_at = Utc::now();
        let message = |id: i64, content: &str, sent_at| {
            EventEnvelope::new(DomainEvent::MessageSent {
                message_id: id,
                sender_id: "alice".to_string(),
                receiver_id: "bob".to_string(),
                content: content.to_string(),
                sent_at,
            })
        };

        aggregator
            .on_message_sent(&message(2, "hi again", first_at + Duration::seconds(1)))
            .await
            .unwrap();
        aggregator
            .on_message_sent(&message(1, "hi", first_at))
            .await
            .unwrap();

        let rows = db.list_notifications("bob", PageRequest::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content.as_deref(), Some("hi again"));
        assert!(!rows[0].is_read);
    }
}
