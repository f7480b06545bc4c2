//! Data models
//!
//! Rust structs representing database entities.
//! Users are keyed by their external identity string; every other entity
//! uses an integer surrogate key. Timestamps are chrono UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::hash::{Hash, Hasher};

// =============================================================================
// ID Types
// =============================================================================

/// Event ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Paging
// =============================================================================

/// Zero-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    /// Clamp the page size into `1..=max`.
    pub fn clamped(self, max: u32) -> Self {
        Self {
            page: self.page,
            size: self.size.clamp(1, max.max(1)),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

// =============================================================================
// User
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
    Bot,
}

/// A campus user profile
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub role: UserRole,
    /// false once banned by a moderator
    pub enabled: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Mute expiry if the user is muted at `now`.
    pub fn active_mute(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.muted_until.filter(|until| *until > now)
    }
}

// =============================================================================
// Post
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PostStatus {
    Visible,
    /// Hidden from feeds by a moderator
    Blocked,
}

/// A wall post
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub author_id: String,
    pub content: String,
    pub location: Option<String>,
    pub is_anonymous: bool,
    pub status: PostStatus,
    pub like_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PartialEq for Post {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Post {}

impl Hash for Post {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Content written over a post deleted by its author
pub const POST_TOMBSTONE: &str = "[post deleted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// Media attached to a post or comment
///
/// `owner_id` is the post id or the comment id depending on the table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Media {
    pub id: i64,
    pub owner_id: i64,
    pub url: String,
    pub kind: MediaKind,
    pub cover_url: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Already-uploaded media supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInput {
    pub url: String,
    pub kind: MediaKind,
    pub cover_url: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl MediaInput {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Image,
            cover_url: None,
            width: None,
            height: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Fields of a new post
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub content: String,
    pub location: Option<String>,
    pub is_anonymous: bool,
    pub media: Vec<MediaInput>,
    pub tags: Vec<String>,
}

// =============================================================================
// Comment
// =============================================================================

/// Content written over a comment deleted by its author or the post author
pub const COMMENT_TOMBSTONE: &str = "[comment deleted]";

/// Comment body state at the domain layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "content", rename_all = "snake_case")]
pub enum CommentBody {
    Active(String),
    Tombstoned,
}

impl CommentBody {
    pub fn text(&self) -> &str {
        match self {
            CommentBody::Active(content) => content,
            CommentBody::Tombstoned => COMMENT_TOMBSTONE,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        matches!(self, CommentBody::Tombstoned)
    }
}

/// A comment on a post
///
/// Stored flattened: a floor has `parent_id == 0` and `root_parent_id == 0`;
/// every reply carries the id of its floor in `root_parent_id` no matter how
/// deep the client nested it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: String,
    pub body: CommentBody,
    pub parent_id: i64,
    pub root_parent_id: i64,
    pub reply_to_uid: Option<String>,
    pub like_count: i64,
    pub reply_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_floor(&self) -> bool {
        self.parent_id == 0
    }

    /// Floor id this comment belongs to (its own id for floors).
    pub fn floor_id(&self) -> i64 {
        if self.root_parent_id == 0 {
            self.id
        } else {
            self.root_parent_id
        }
    }
}

impl PartialEq for Comment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Comment {}

impl Hash for Comment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<'r> FromRow<'r, SqliteRow> for Comment {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let is_deleted: bool = row.try_get("is_deleted")?;
        let body = if is_deleted {
            CommentBody::Tombstoned
        } else {
            CommentBody::Active(row.try_get("content")?)
        };

        Ok(Self {
            id: row.try_get("id")?,
            post_id: row.try_get("post_id")?,
            author_id: row.try_get("author_id")?,
            body,
            parent_id: row.try_get("parent_id")?,
            root_parent_id: row.try_get("root_parent_id")?,
            reply_to_uid: row.try_get("reply_to_uid")?,
            like_count: row.try_get("like_count")?,
            reply_count: row.try_get("reply_count")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Fields of a new comment after thread resolution
#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: i64,
    pub author_id: String,
    pub content: String,
    pub parent_id: i64,
    pub root_parent_id: i64,
    pub reply_to_uid: Option<String>,
    pub media: Vec<MediaInput>,
}

// =============================================================================
// Friendship
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FriendRequest {
    pub id: i64,
    pub requester_id: String,
    pub addressee_id: String,
    pub status: FriendRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FriendRequest {
    /// The other side of the pair as seen from `user_id`.
    pub fn counterpart(&self, user_id: &str) -> &str {
        if self.requester_id == user_id {
            &self.addressee_id
        } else {
            &self.requester_id
        }
    }
}

/// Sorted form of an unordered user pair
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

// =============================================================================
// Notification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationType {
    LikePost,
    LikeComment,
    CommentPost,
    ReplyComment,
    PrivateMessage,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LikePost => "like_post",
            Self::LikeComment => "like_comment",
            Self::CommentPost => "comment_post",
            Self::ReplyComment => "reply_comment",
            Self::PrivateMessage => "private_message",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub receiver_id: String,
    pub sender_id: String,
    pub notification_type: NotificationType,
    pub post_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub content: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields of a notification about to be written
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub receiver_id: String,
    pub sender_id: String,
    pub notification_type: NotificationType,
    pub post_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of writing a private-message notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationWrite {
    Inserted,
    /// An unread row from the same sender absorbed the message
    Aggregated,
    /// An unread row already holds a newer message
    Stale,
}

impl NotificationWrite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Aggregated => "aggregated",
            Self::Stale => "stale",
        }
    }
}

// =============================================================================
// Private messages
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PrivateMessage {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub is_read: bool,
    pub deleted_by_sender: bool,
    pub deleted_by_receiver: bool,
    pub created_at: DateTime<Utc>,
}
