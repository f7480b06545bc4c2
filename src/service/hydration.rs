//! Batch hydration
//!
//! Turns raw rows into views for a given viewer. Each fact (likes,
//! friendships, profiles, media, tags) costs at most one query per batch,
//! no matter how many rows are hydrated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::FeedConfig;
use crate::data::{
    Comment, Database, FriendRequest, Media, Notification, NotificationType, Post, PostStatus,
    PrivateMessage, User,
};
use crate::error::AppError;

/// Public face of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub avatar: String,
}

/// Author of a post as the viewer may see it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorView {
    /// `None` for anonymous posts
    pub id: Option<String>,
    pub name: String,
    pub avatar: String,
    pub is_friend: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: i64,
    pub author: AuthorView,
    pub content: String,
    pub location: Option<String>,
    pub is_anonymous: bool,
    pub status: PostStatus,
    pub like_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
    pub liked: bool,
    /// Whether the viewer wrote the post
    pub is_owner: bool,
    pub media: Vec<Media>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub post_id: i64,
    pub author: UserSummary,
    pub content: String,
    pub is_deleted: bool,
    pub parent_id: i64,
    pub root_parent_id: i64,
    pub reply_to: Option<UserSummary>,
    pub like_count: i64,
    pub reply_count: i64,
    pub liked: bool,
    pub media: Vec<Media>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    pub id: i64,
    pub sender: UserSummary,
    pub notification_type: NotificationType,
    pub post_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub content: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendRequestView {
    pub request: FriendRequest,
    pub requester: UserSummary,
}

/// Latest exchange with one peer
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub peer: UserSummary,
    pub last_message: PrivateMessage,
    pub unread_count: i64,
}

fn unique_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Batch hydration service
pub struct Hydrator {
    db: Arc<Database>,
    feed: FeedConfig,
}

impl Hydrator {
    /// Create new hydrator
    pub fn new(db: Arc<Database>, feed: FeedConfig) -> Self {
        Self { db, feed }
    }

    fn summary(&self, users: &HashMap<String, User>, id: &str) -> UserSummary {
        match users.get(id) {
            Some(user) => UserSummary {
                id: user.id.clone(),
                name: user.name.clone(),
                avatar: user
                    .avatar
                    .clone()
                    .unwrap_or_else(|| self.feed.default_avatar.clone()),
            },
            None => UserSummary {
                id: id.to_string(),
                name: id.to_string(),
                avatar: self.feed.default_avatar.clone(),
            },
        }
    }

    /// Profiles of the given users in the given order
    pub async fn users(&self, ids: &[String]) -> Result<Vec<UserSummary>, AppError> {
        let users = self.db.get_users_batch(ids).await?;
        Ok(ids.iter().map(|id| self.summary(&users, id)).collect())
    }

    /// Hydrate posts for `viewer` (`None` for a logged-out reader).
    ///
    /// # Queries
    /// liked ids, friend ids, author profiles, media, tags: one each
    pub async fn posts(
        &self,
        viewer: Option<&str>,
        rows: Vec<Post>,
    ) -> Result<Vec<PostView>, AppError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let post_ids: Vec<i64> = rows.iter().map(|post| post.id).collect();
        let author_ids = unique_ids(
            rows.iter()
                .filter(|post| !post.is_anonymous)
                .map(|post| post.author_id.as_str()),
        );

        let (liked, friends) = match viewer {
            Some(viewer) => (
                self.db.get_liked_post_ids_batch(viewer, &post_ids).await?,
                self.db.get_friend_ids_batch(viewer, &author_ids).await?,
            ),
            None => (HashSet::new(), HashSet::new()),
        };
        let authors = self.db.get_users_batch(&author_ids).await?;
        let mut media = self.db.get_post_media_batch(&post_ids).await?;
        let mut tags = self.db.get_post_tags_batch(&post_ids).await?;

        let views = rows
            .into_iter()
            .map(|post| {
                let author = if post.is_anonymous {
                    AuthorView {
                        id: None,
                        name: self.feed.anonymous_name.clone(),
                        avatar: self.feed.anonymous_avatar.clone(),
                        is_friend: false,
                    }
                } else {
                    let summary = self.summary(&authors, &post.author_id);
                    AuthorView {
                        is_friend: friends.contains(&post.author_id),
                        id: Some(summary.id),
                        name: summary.name,
                        avatar: summary.avatar,
                    }
                };

                PostView {
                    id: post.id,
                    liked: liked.contains(&post.id),
                    is_owner: viewer == Some(post.author_id.as_str()),
                    media: media.remove(&post.id).unwrap_or_default(),
                    tags: tags
                        .remove(&post.id)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|tag| tag.name)
                        .collect(),
                    author,
                    content: post.content,
                    location: post.location,
                    is_anonymous: post.is_anonymous,
                    status: post.status,
                    like_count: post.like_count,
                    comment_count: post.comment_count,
                    view_count: post.view_count,
                    created_at: post.created_at,
                    updated_at: post.updated_at,
                }
            })
            .collect();

        Ok(views)
    }

    /// Hydrate comments for `viewer`.
    ///
    /// # Queries
    /// liked ids, profiles of authors and reply targets, media: one each
    pub async fn comments(
        &self,
        viewer: Option<&str>,
        rows: Vec<Comment>,
    ) -> Result<Vec<CommentView>, AppError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let comment_ids: Vec<i64> = rows.iter().map(|comment| comment.id).collect();
        let user_ids = unique_ids(rows.iter().flat_map(|comment| {
            std::iter::once(comment.author_id.as_str()).chain(comment.reply_to_uid.as_deref())
        }));

        let liked = match viewer {
            Some(viewer) => {
                self.db
                    .get_liked_comment_ids_batch(viewer, &comment_ids)
                    .await?
            }
            None => HashSet::new(),
        };
        let users = self.db.get_users_batch(&user_ids).await?;
        let mut media = self.db.get_comment_media_batch(&comment_ids).await?;

        let views = rows
            .into_iter()
            .map(|comment| CommentView {
                id: comment.id,
                post_id: comment.post_id,
                author: self.summary(&users, &comment.author_id),
                content: comment.body.text().to_string(),
                is_deleted: comment.body.is_tombstoned(),
                parent_id: comment.parent_id,
                root_parent_id: comment.root_parent_id,
                reply_to: comment
                    .reply_to_uid
                    .as_deref()
                    .map(|id| self.summary(&users, id)),
                like_count: comment.like_count,
                reply_count: comment.reply_count,
                liked: liked.contains(&comment.id),
                media: media.remove(&comment.id).unwrap_or_default(),
                created_at: comment.created_at,
            })
            .collect();

        Ok(views)
    }

    /// Hydrate notifications with one batched sender lookup.
    pub async fn notifications(
        &self,
        rows: Vec<Notification>,
    ) -> Result<Vec<NotificationView>, AppError> {
        let sender_ids = unique_ids(rows.iter().map(|n| n.sender_id.as_str()));
        let senders = self.db.get_users_batch(&sender_ids).await?;

        Ok(rows
            .into_iter()
            .map(|notification| NotificationView {
                id: notification.id,
                sender: self.summary(&senders, &notification.sender_id),
                notification_type: notification.notification_type,
                post_id: notification.post_id,
                comment_id: notification.comment_id,
                content: notification.content,
                is_read: notification.is_read,
                created_at: notification.created_at,
            })
            .collect())
    }

    /// Attach requester profiles to pending requests.
    pub async fn friend_requests(
        &self,
        rows: Vec<FriendRequest>,
    ) -> Result<Vec<FriendRequestView>, AppError> {
        let requester_ids = unique_ids(rows.iter().map(|r| r.requester_id.as_str()));
        let requesters = self.db.get_users_batch(&requester_ids).await?;

        Ok(rows
            .into_iter()
            .map(|request| FriendRequestView {
                requester: self.summary(&requesters, &request.requester_id),
                request,
            })
            .collect())
    }

    /// Build conversation summaries from each peer's latest message.
    pub async fn conversations(
        &self,
        viewer: &str,
        latest: Vec<PrivateMessage>,
        unread: &HashMap<String, i64>,
    ) -> Result<Vec<ConversationView>, AppError> {
        let peer_of = |message: &PrivateMessage| -> String {
            if message.sender_id == viewer {
                message.receiver_id.clone()
            } else {
                message.sender_id.clone()
            }
        };
        let peer_ids: Vec<String> = latest.iter().map(peer_of).collect();
        let peers = self.db.get_users_batch(&peer_ids).await?;

        Ok(latest
            .into_iter()
            .map(|message| {
                let peer_id = peer_of(&message);
                ConversationView {
                    unread_count: unread.get(&peer_id).copied().unwrap_or(0),
                    peer: self.summary(&peers, &peer_id),
                    last_message: message,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LikeAction, LikeTarget, NewComment, NewPost, RequestOutcome, UserRole};
    use tempfile::TempDir;

    async fn setup() -> (Hydrator, Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        for id in ["alice", "bob"] {
            db.upsert_user(&User {
                id: id.to_string(),
                name: format!("{id} name"),
                avatar: Some(format!("https://cdn/{id}.png")),
                role: UserRole::User,
                enabled: true,
                muted_until: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let mut feed = crate::config::tests::valid_config().feed;
        feed.anonymous_name = "Someone".to_string();
        feed.anonymous_avatar = "anon.png".to_string();
        (Hydrator::new(db.clone(), feed), db, temp_dir)
    }

    #[tokio::test]
    async fn anonymous_posts_hide_their_author() {
        let (hydrator, db, _temp_dir) = setup().await;
        let RequestOutcome::Created(request) =
            db.open_friend_request("bob", "alice", Utc::now()).await.unwrap()
        else {
            panic!("expected a new request");
        };
        db.respond_friend_request(request.id, "alice", true, Utc::now())
            .await
            .unwrap();

        let anonymous = db
            .insert_post(
                "alice",
                &NewPost {
                    content: "secret".to_string(),
                    is_anonymous: true,
                    ..NewPost::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let public = db
            .insert_post(
                "alice",
                &NewPost {
                    content: "hello".to_string(),
                    tags: vec!["intro".to_string()],
                    ..NewPost::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        db.apply_like("bob", LikeTarget::Post(public.id), LikeAction::Like, Utc::now())
            .await
            .unwrap();
        let public = db.get_post(public.id).await.unwrap().unwrap();

        let views = hydrator
            .posts(Some("bob"), vec![anonymous, public])
            .await
            .unwrap();

        assert_eq!(views[0].author.id, None);
        assert_eq!(views[0].author.name, "Someone");
        assert_eq!(views[0].author.avatar, "anon.png");
        assert!(!views[0].author.is_friend);
        assert!(!views[0].liked);

        assert_eq!(views[1].author.id.as_deref(), Some("alice"));
        assert!(views[1].author.is_friend);
        assert!(views[1].liked);
        assert_eq!(views[1].tags, vec!["intro".to_string()]);
        assert!(!views[1].is_owner);
    }

    #[tokio::test]
    async fn comments_resolve_reply_targets() {
        let (hydrator, db, _temp_dir) = setup().await;
        let post = db
            .insert_post(
                "alice",
                &NewPost {
                    content: "hello".to_string(),
                    ..NewPost::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let floor = db
            .insert_comment(
                &NewComment {
                    post_id: post.id,
                    author_id: "bob".to_string(),
                    content: "first".to_string(),
                    parent_id: 0,
                    root_parent_id: 0,
                    reply_to_uid: None,
                    media: Vec::new(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let reply = db
            .insert_comment(
                &NewComment {
                    post_id: post.id,
                    author_id: "alice".to_string(),
                    content: "thanks".to_string(),
                    parent_id: floor.id,
                    root_parent_id: floor.id,
                    reply_to_uid: Some("bob".to_string()),
                    media: Vec::new(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        db.tombstone_comment(floor.id).await.unwrap();
        let floor = db.get_comment(floor.id).await.unwrap().unwrap();

        let views = hydrator.comments(None, vec![floor, reply]).await.unwrap();

        assert!(views[0].is_deleted);
        assert_eq!(views[0].content, crate::data::COMMENT_TOMBSTONE);
        assert_eq!(views[1].author.name, "alice name");
        assert_eq!(
            views[1].reply_to.as_ref().map(|u| u.id.as_str()),
            Some("bob")
        );
    }

    #[tokio::test]
    async fn unknown_profiles_fall_back_to_their_id() {
        let (hydrator, _db, _temp_dir) = setup().await;

        let users = hydrator
            .users(&["ghost".to_string(), "alice".to_string()])
            .await
            .unwrap();
        assert_eq!(users[0].name, "ghost");
        assert_eq!(users[1].avatar, "https://cdn/alice.png");
    }
}
