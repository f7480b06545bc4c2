//! E2E tests for notification aggregation and read state

mod common;

use campuswall::data::{NotificationType, PageRequest};
use common::TestApp;

#[tokio::test]
async fn test_messages_fold_into_one_unread_notification() {
    let app = TestApp::new().await;
    for user in ["alice", "bob"] {
        app.create_user(user).await;
    }
    app.befriend("alice", "bob").await;

    app.state.messages.send("alice", "bob", "hi").await.unwrap();
    app.settle().await;
    app.state
        .messages
        .send("alice", "bob", "hi again")
        .await
        .unwrap();
    app.settle().await;

    let bob = app
        .state
        .notifications
        .list("bob", PageRequest::default())
        .await
        .unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].notification_type, NotificationType::PrivateMessage);
    assert_eq!(bob[0].content.as_deref(), Some("hi again"));
    assert_eq!(bob[0].sender.id, "alice");
    assert!(!bob[0].is_read);

    let conversations = app.state.messages.conversations("bob").await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].peer.id, "alice");
    assert_eq!(conversations[0].unread_count, 2);
    assert_eq!(conversations[0].last_message.content, "hi again");
}

#[tokio::test]
async fn test_reading_the_conversation_starts_a_new_window() {
    let app = TestApp::new().await;
    for user in ["alice", "bob"] {
        app.create_user(user).await;
    }
    app.befriend("alice", "bob").await;

    app.state.messages.send("alice", "bob", "first").await.unwrap();
    app.settle().await;

    let read = app.state.messages.mark_read("bob", "alice").await.unwrap();
    assert_eq!(read, 1);
    assert_eq!(app.state.notifications.unread_count("bob").await.unwrap(), 0);

    app.state.messages.send("alice", "bob", "second").await.unwrap();
    app.settle().await;

    let bob = app
        .state
        .notifications
        .list("bob", PageRequest::default())
        .await
        .unwrap();
    assert_eq!(bob.len(), 2);
    assert_eq!(bob[0].content.as_deref(), Some("second"));
    assert!(!bob[0].is_read);
    assert!(bob[1].is_read);
}

#[tokio::test]
async fn test_mark_and_delete_only_touch_own_notifications() {
    let app = TestApp::new().await;
    for user in ["alice", "bob", "carol"] {
        app.create_user(user).await;
    }
    app.befriend("alice", "bob").await;
    app.state.messages.send("alice", "bob", "ping").await.unwrap();
    app.settle().await;

    let id = app
        .state
        .notifications
        .list("bob", PageRequest::default())
        .await
        .unwrap()[0]
        .id;

    assert!(app.state.notifications.mark_read("carol", id).await.is_err());
    assert!(app.state.notifications.delete("carol", id).await.is_err());

    app.state.notifications.mark_read("bob", id).await.unwrap();
    assert_eq!(app.state.notifications.unread_count("bob").await.unwrap(), 0);
    app.state.notifications.delete("bob", id).await.unwrap();
    assert!(app
        .state
        .notifications
        .list("bob", PageRequest::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_clearing_history_hides_only_one_side() {
    let app = TestApp::new().await;
    for user in ["alice", "bob"] {
        app.create_user(user).await;
    }
    app.befriend("alice", "bob").await;
    app.state.messages.send("alice", "bob", "one").await.unwrap();
    app.state.messages.send("bob", "alice", "two").await.unwrap();

    let hidden = app.state.messages.clear_history("alice", "bob").await.unwrap();
    assert_eq!(hidden, 2);

    assert!(app
        .state
        .messages
        .history("alice", "bob", PageRequest::default())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        app.state
            .messages
            .history("bob", "alice", PageRequest::default())
            .await
            .unwrap()
            .len(),
        2
    );
}
