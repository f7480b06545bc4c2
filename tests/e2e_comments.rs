//! E2E tests for comment threads and their notifications

mod common;

use campuswall::data::{NewPost, NotificationType, PageRequest};
use campuswall::service::CommentDraft;
use common::TestApp;

async fn post_by(app: &TestApp, author: &str, content: &str) -> i64 {
    app.state
        .posts
        .create(
            author,
            NewPost {
                content: content.to_string(),
                ..NewPost::default()
            },
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_floor_and_reply_notify_the_right_users() {
    let app = TestApp::new().await;
    for user in ["alice", "bob", "carol"] {
        app.create_user(user).await;
    }
    let post_id = post_by(&app, "alice", "hello").await;

    let floor = app
        .state
        .comments
        .publish("bob", CommentDraft::floor(post_id, "nice post"))
        .await
        .unwrap();
    app.settle().await;

    assert_eq!(floor.parent_id, 0);
    assert_eq!(floor.root_parent_id, 0);
    let alice = app
        .state
        .notifications
        .list("alice", PageRequest::default())
        .await
        .unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].notification_type, NotificationType::CommentPost);
    assert_eq!(alice[0].sender.id, "bob");

    let reply = app
        .state
        .comments
        .publish("carol", CommentDraft::reply(post_id, floor.id, "agreed"))
        .await
        .unwrap();
    app.settle().await;

    assert_eq!(reply.parent_id, floor.id);
    assert_eq!(reply.root_parent_id, floor.id);
    assert_eq!(reply.reply_to_uid.as_deref(), Some("bob"));

    let bob = app
        .state
        .notifications
        .list("bob", PageRequest::default())
        .await
        .unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].notification_type, NotificationType::ReplyComment);
    assert_eq!(bob[0].content.as_deref(), Some("agreed"));
    assert_eq!(app.state.notifications.unread_count("alice").await.unwrap(), 1);
}

#[tokio::test]
async fn test_deep_replies_flatten_onto_the_floor() {
    let app = TestApp::new().await;
    for user in ["alice", "bob", "carol", "dave"] {
        app.create_user(user).await;
    }
    let post_id = post_by(&app, "alice", "thread test").await;

    let floor = app
        .state
        .comments
        .publish("bob", CommentDraft::floor(post_id, "floor"))
        .await
        .unwrap();
    let first = app
        .state
        .comments
        .publish("carol", CommentDraft::reply(post_id, floor.id, "depth one"))
        .await
        .unwrap();
    let second = app
        .state
        .comments
        .publish("dave", CommentDraft::reply(post_id, first.id, "depth two"))
        .await
        .unwrap();
    app.settle().await;

    assert_eq!(second.parent_id, first.id);
    assert_eq!(second.root_parent_id, floor.id);
    assert_eq!(second.reply_to_uid.as_deref(), Some("carol"));

    let replies = app
        .state
        .comments
        .list_replies(Some("alice"), floor.id)
        .await
        .unwrap();
    assert_eq!(
        replies.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![first.id, second.id]
    );
    assert_eq!(
        replies[1].reply_to.as_ref().map(|u| u.id.as_str()),
        Some("carol")
    );

    let post = app.state.posts.get(None, post_id).await.unwrap();
    assert_eq!(post.comment_count, 3);
    let floors = app
        .state
        .comments
        .list_floors(None, post_id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(floors.len(), 1);
    assert_eq!(floors[0].reply_count, 2);
}

#[tokio::test]
async fn test_post_author_can_tombstone_a_comment() {
    let app = TestApp::new().await;
    for user in ["alice", "bob", "carol"] {
        app.create_user(user).await;
    }
    let post_id = post_by(&app, "alice", "moderated by me").await;
    let floor = app
        .state
        .comments
        .publish("bob", CommentDraft::floor(post_id, "rude words"))
        .await
        .unwrap();

    assert!(app.state.comments.delete("carol", floor.id).await.is_err());
    app.state.comments.delete("alice", floor.id).await.unwrap();

    let floors = app
        .state
        .comments
        .list_floors(None, post_id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(floors.len(), 1);
    assert!(floors[0].is_deleted);
    assert_ne!(floors[0].content, "rude words");
}

#[tokio::test]
async fn test_comment_on_deleted_post_is_rejected() {
    let app = TestApp::new().await;
    for user in ["alice", "bob"] {
        app.create_user(user).await;
    }
    let post_id = post_by(&app, "alice", "short lived").await;
    app.state.posts.delete("alice", post_id).await.unwrap();

    let result = app
        .state
        .comments
        .publish("bob", CommentDraft::floor(post_id, "too late"))
        .await;

    assert!(result.is_err());
    app.settle().await;
    assert_eq!(app.state.notifications.unread_count("alice").await.unwrap(), 0);
}
