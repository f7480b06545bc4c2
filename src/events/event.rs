//! Domain events
//!
//! Events are facts about committed writes. They carry every id a
//! subscriber needs so that most subscribers never have to re-read the
//! row that triggered them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data::{EventId, LikeTarget};

/// Subscription key of a domain event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PostCreated,
    CommentCreated,
    Liked,
    MessageSent,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostCreated => "post_created",
            Self::CommentCreated => "comment_created",
            Self::Liked => "liked",
            Self::MessageSent => "message_sent",
        }
    }
}

/// A committed interaction
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    PostCreated {
        post_id: i64,
        author_id: String,
        content: String,
        is_anonymous: bool,
    },
    CommentCreated {
        comment_id: i64,
        post_id: i64,
        author_id: String,
        /// 0 for floors
        parent_id: i64,
        root_parent_id: i64,
        reply_to_uid: Option<String>,
        content: String,
        post_author_id: String,
        /// Author of the comment replied to; `None` for floors
        parent_author_id: Option<String>,
    },
    Liked {
        target: LikeTarget,
        liker_id: String,
        owner_id: String,
        post_id: i64,
    },
    MessageSent {
        message_id: i64,
        sender_id: String,
        receiver_id: String,
        content: String,
        sent_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PostCreated { .. } => EventKind::PostCreated,
            Self::CommentCreated { .. } => EventKind::CommentCreated,
            Self::Liked { .. } => EventKind::Liked,
            Self::MessageSent { .. } => EventKind::MessageSent,
        }
    }

    /// User whose action produced the event.
    pub fn actor_id(&self) -> &str {
        match self {
            Self::PostCreated { author_id, .. } | Self::CommentCreated { author_id, .. } => {
                author_id
            }
            Self::Liked { liker_id, .. } => liker_id,
            Self::MessageSent { sender_id, .. } => sender_id,
        }
    }
}

/// A published event with its identity
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            id: EventId::new(),
            occurred_at: Utc::now(),
            event,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_is_the_acting_user() {
        let event = DomainEvent::Liked {
            target: LikeTarget::Comment(3),
            liker_id: "bob".to_string(),
            owner_id: "alice".to_string(),
            post_id: 1,
        };
        assert_eq!(event.actor_id(), "bob");
        assert_eq!(event.kind(), EventKind::Liked);
    }

    #[test]
    fn envelopes_get_distinct_ids() {
        let event = DomainEvent::PostCreated {
            post_id: 1,
            author_id: "alice".to_string(),
            content: "hi".to_string(),
            is_anonymous: false,
        };
        let first = EventEnvelope::new(event.clone());
        let second = EventEnvelope::new(event);
        assert_ne!(first.id, second.id);
        assert_eq!(first.id.0.len(), 26);
    }
}
