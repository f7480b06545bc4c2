//! Private message service
//!
//! Messages are only allowed between friends, except conversations with
//! the bot account which anyone may start.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use super::account::require_active_user;
use super::hydration::{ConversationView, Hydrator};
use crate::data::{Database, PageRequest, PrivateMessage};
use crate::error::AppError;
use crate::events::{DomainEvent, EventBus};

/// Private message service
pub struct MessageService {
    db: Arc<Database>,
    events: Arc<EventBus>,
    hydrator: Arc<Hydrator>,
    bot_id: String,
    max_page_size: u32,
}

impl MessageService {
    /// Create new message service
    pub fn new(
        db: Arc<Database>,
        events: Arc<EventBus>,
        hydrator: Arc<Hydrator>,
        bot_id: String,
        max_page_size: u32,
    ) -> Self {
        Self {
            db,
            events,
            hydrator,
            bot_id,
            max_page_size,
        }
    }

    /// Send a private message
    ///
    /// # Side Effects
    /// - Inserts the message
    /// - Publishes `MessageSent` after commit
    ///
    /// # Errors
    /// - `Validation` for empty content or messaging oneself
    /// - `NotFound` if the receiver is unknown
    /// - `Forbidden` if the pair are not friends and neither is the bot
    /// - `RateRestricted` if the sender is muted
    pub async fn send(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<PrivateMessage, AppError> {
        if sender_id == receiver_id {
            return Err(AppError::Validation(
                "cannot send a message to yourself".to_string(),
            ));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation(
                "message content is required".to_string(),
            ));
        }

        let now = Utc::now();
        require_active_user(&self.db, sender_id, now).await?;
        if self.db.get_user(receiver_id).await?.is_none() {
            return Err(AppError::NotFound("user"));
        }

        let involves_bot = sender_id == self.bot_id || receiver_id == self.bot_id;
        if !involves_bot && !self.db.are_friends(sender_id, receiver_id).await? {
            return Err(AppError::Forbidden);
        }

        let message = self
            .db
            .insert_private_message(sender_id, receiver_id, content, now)
            .await?;

        tracing::debug!(message_id = message.id, sender_id, receiver_id, "Private message sent");
        self.events.publish(DomainEvent::MessageSent {
            message_id: message.id,
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            sent_at: message.created_at,
        });

        Ok(message)
    }

    /// Mark everything `peer_id` sent to `reader_id` as read, together with
    /// the matching message notifications.
    pub async fn mark_read(&self, reader_id: &str, peer_id: &str) -> Result<u64, AppError> {
        let (messages, notifications) = self.db.mark_conversation_read(reader_id, peer_id).await?;
        tracing::debug!(reader_id, peer_id, messages, notifications, "Conversation marked read");
        Ok(messages)
    }

    /// One entry per peer, most recent conversation first
    pub async fn conversations(&self, viewer: &str) -> Result<Vec<ConversationView>, AppError> {
        let latest = self.db.list_latest_messages_per_peer(viewer).await?;
        let unread = self.db.count_unread_messages_by_sender(viewer).await?;
        self.hydrator.conversations(viewer, latest, &unread).await
    }

    /// Messages with `peer_id` still visible to `viewer`, newest first
    pub async fn history(
        &self,
        viewer: &str,
        peer_id: &str,
        page: PageRequest,
    ) -> Result<Vec<PrivateMessage>, AppError> {
        self.db
            .list_chat_history(viewer, peer_id, page.clamped(self.max_page_size))
            .await
    }

    /// Hide the conversation from `viewer`'s side; the peer keeps it.
    pub async fn clear_history(&self, viewer: &str, peer_id: &str) -> Result<u64, AppError> {
        let hidden = self.db.clear_chat_history(viewer, peer_id).await?;
        tracing::info!(viewer, peer_id, hidden, "Chat history cleared");
        Ok(hidden)
    }

    /// Unread message counts keyed by sender
    pub async fn unread_counts(&self, viewer: &str) -> Result<HashMap<String, i64>, AppError> {
        self.db.count_unread_messages_by_sender(viewer).await
    }
}
