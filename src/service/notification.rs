//! Notification query service
//!
//! Notifications are written by listeners only; this service reads and
//! marks them on behalf of their receiver.

use std::sync::Arc;

use super::hydration::{Hydrator, NotificationView};
use crate::data::{Database, PageRequest};
use crate::error::AppError;

/// Notification service
pub struct NotificationService {
    db: Arc<Database>,
    hydrator: Arc<Hydrator>,
    max_page_size: u32,
}

impl NotificationService {
    /// Create new notification service
    pub fn new(db: Arc<Database>, hydrator: Arc<Hydrator>, max_page_size: u32) -> Self {
        Self {
            db,
            hydrator,
            max_page_size,
        }
    }

    /// Notifications of a receiver, newest first
    pub async fn list(
        &self,
        receiver_id: &str,
        page: PageRequest,
    ) -> Result<Vec<NotificationView>, AppError> {
        let rows = self
            .db
            .list_notifications(receiver_id, page.clamped(self.max_page_size))
            .await?;
        self.hydrator.notifications(rows).await
    }

    pub async fn unread_count(&self, receiver_id: &str) -> Result<i64, AppError> {
        self.db.count_unread_notifications(receiver_id).await
    }

    /// Mark one notification read
    ///
    /// # Errors
    /// `NotFound` if it does not exist or belongs to someone else
    pub async fn mark_read(&self, receiver_id: &str, notification_id: i64) -> Result<(), AppError> {
        if !self
            .db
            .mark_notification_read(receiver_id, notification_id)
            .await?
        {
            return Err(AppError::NotFound("notification"));
        }
        Ok(())
    }

    /// Mark every notification of the receiver read
    pub async fn mark_all_read(&self, receiver_id: &str) -> Result<u64, AppError> {
        self.db.mark_all_notifications_read(receiver_id).await
    }

    /// Mark the private-message notifications from `sender_id` read.
    ///
    /// The messages themselves are flipped in the same transaction.
    pub async fn mark_conversation_read(
        &self,
        receiver_id: &str,
        sender_id: &str,
    ) -> Result<u64, AppError> {
        let (_, notifications) = self
            .db
            .mark_conversation_read(receiver_id, sender_id)
            .await?;
        Ok(notifications)
    }

    /// Delete one notification
    pub async fn delete(&self, receiver_id: &str, notification_id: i64) -> Result<(), AppError> {
        if !self
            .db
            .delete_notification(receiver_id, notification_id)
            .await?
        {
            return Err(AppError::NotFound("notification"));
        }
        Ok(())
    }
}
