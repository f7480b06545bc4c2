//! Event listeners
//!
//! Reactions to committed domain events: the notification aggregator and,
//! when enabled, the reactive agent. Handlers for the same event run
//! independently; one failing never affects another.

mod agent;
mod notification;

pub use agent::AgentDispatcher;
pub use notification::NotificationAggregator;

use std::sync::Arc;

use crate::events::{EventKind, Subscriptions};

/// Build the subscription table handed to the event bus.
pub fn build_subscriptions(
    notifications: Arc<NotificationAggregator>,
    agent: Option<Arc<AgentDispatcher>>,
) -> Subscriptions {
    let mut subscriptions = Subscriptions::new();

    let aggregator = notifications.clone();
    subscriptions.subscribe(EventKind::CommentCreated, "notify_comment", move |envelope| {
        let aggregator = aggregator.clone();
        async move { aggregator.on_comment_created(&envelope).await }
    });
    let aggregator = notifications.clone();
    subscriptions.subscribe(EventKind::Liked, "notify_like", move |envelope| {
        let aggregator = aggregator.clone();
        async move { aggregator.on_liked(&envelope).await }
    });
    let aggregator = notifications;
    subscriptions.subscribe(EventKind::MessageSent, "notify_message", move |envelope| {
        let aggregator = aggregator.clone();
        async move { aggregator.on_message_sent(&envelope).await }
    });

    let Some(agent) = agent else {
        return subscriptions;
    };

    let dispatcher = agent.clone();
    subscriptions.subscribe(
        EventKind::CommentCreated,
        "agent_comment_reply",
        move |envelope| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.on_comment_created(&envelope).await }
        },
    );
    let dispatcher = agent.clone();
    subscriptions.subscribe(EventKind::MessageSent, "agent_chat_reply", move |envelope| {
        let dispatcher = dispatcher.clone();
        async move { dispatcher.on_message_sent(&envelope).await }
    });
    let summary_delay = agent.summary_delay();
    let dispatcher = agent;
    subscriptions.subscribe_delayed(
        EventKind::PostCreated,
        "agent_post_summary",
        summary_delay,
        move |envelope| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.on_post_created(&envelope).await }
        },
    );

    subscriptions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn agent_handlers_are_optional() {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );

        let aggregator = Arc::new(NotificationAggregator::new(db, 100));
        let subscriptions = build_subscriptions(aggregator, None);

        assert_eq!(
            subscriptions.names(EventKind::CommentCreated),
            vec!["notify_comment"]
        );
        assert_eq!(subscriptions.names(EventKind::Liked), vec!["notify_like"]);
        assert_eq!(
            subscriptions.names(EventKind::MessageSent),
            vec!["notify_message"]
        );
        assert!(subscriptions.names(EventKind::PostCreated).is_empty());
    }
}
