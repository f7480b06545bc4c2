//! E2E tests for likes, counters and like notifications

mod common;

use campuswall::data::{NewPost, NotificationType, PageRequest};
use campuswall::error::AppError;
use campuswall::service::CommentDraft;
use common::TestApp;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_toggles_keep_counter_in_sync() {
    let app = TestApp::new().await;
    app.create_user("alice").await;
    let users: Vec<String> = (0..8).map(|i| format!("user{i}")).collect();
    for user in &users {
        app.create_user(user).await;
    }
    let post = app
        .state
        .posts
        .create(
            "alice",
            NewPost {
                content: "like me".to_string(),
                ..NewPost::default()
            },
        )
        .await
        .unwrap();

    // Every user toggles three times: each ends up liking the post
    let post_id = post.id;
    let mut handles = Vec::new();
    for user in users.clone() {
        let posts = app.state.posts.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..3 {
                posts.toggle_like(&user, post_id).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    app.settle().await;

    let stored = app.state.posts.get(None, post.id).await.unwrap();
    assert_eq!(stored.like_count, users.len() as i64);
    assert_eq!(
        app.state.db.count_post_likes(post.id).await.unwrap(),
        stored.like_count
    );
    // One notification per like transition that created a row
    assert_eq!(
        app.state.notifications.unread_count("alice").await.unwrap(),
        2 * users.len() as i64
    );
}

#[tokio::test]
async fn test_like_twice_conflicts_and_unlike_is_idempotent() {
    let app = TestApp::new().await;
    for user in ["alice", "bob"] {
        app.create_user(user).await;
    }
    let post = app
        .state
        .posts
        .create(
            "alice",
            NewPost {
                content: "once only".to_string(),
                ..NewPost::default()
            },
        )
        .await
        .unwrap();

    let first = app.state.posts.like("bob", post.id).await.unwrap();
    assert_eq!(first.like_count, 1);
    assert!(matches!(
        app.state.posts.like("bob", post.id).await,
        Err(AppError::Conflict(_))
    ));

    let removed = app.state.posts.unlike("bob", post.id).await.unwrap();
    assert!(removed.changed);
    let again = app.state.posts.unlike("bob", post.id).await.unwrap();
    assert!(!again.changed);
    assert_eq!(again.like_count, 0);
}

#[tokio::test]
async fn test_self_like_is_counted_but_not_notified() {
    let app = TestApp::new().await;
    app.create_user("alice").await;
    let post = app
        .state
        .posts
        .create(
            "alice",
            NewPost {
                content: "my own".to_string(),
                ..NewPost::default()
            },
        )
        .await
        .unwrap();

    let outcome = app.state.posts.like("alice", post.id).await.unwrap();
    app.settle().await;

    assert_eq!(outcome.like_count, 1);
    assert_eq!(app.state.notifications.unread_count("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn test_comment_like_notifies_comment_author() {
    let app = TestApp::new().await;
    for user in ["alice", "bob", "carol"] {
        app.create_user(user).await;
    }
    let post = app
        .state
        .posts
        .create(
            "alice",
            NewPost {
                content: "discuss".to_string(),
                ..NewPost::default()
            },
        )
        .await
        .unwrap();
    let floor = app
        .state
        .comments
        .publish("bob", CommentDraft::floor(post.id, "first"))
        .await
        .unwrap();

    let outcome = app.state.comments.toggle_like("carol", floor.id).await.unwrap();
    app.settle().await;

    assert!(outcome.liked);
    let bob = app
        .state
        .notifications
        .list("bob", PageRequest::default())
        .await
        .unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].notification_type, NotificationType::LikeComment);
    assert_eq!(bob[0].comment_id, Some(floor.id));
    assert_eq!(bob[0].post_id, Some(post.id));

    let liked = app
        .state
        .comments
        .list_floors(Some("carol"), post.id, PageRequest::default())
        .await
        .unwrap();
    assert!(liked[0].liked);
    assert_eq!(liked[0].like_count, 1);
}
