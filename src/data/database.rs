//! SQLite database operations
//!
//! All database access goes through this module.
//! Every mutation touching more than one row runs inside a
//! `BEGIN IMMEDIATE` transaction on a single pooled connection, and every
//! denormalized counter change happens in the same transaction as the row
//! change it mirrors.

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, Pool, QueryBuilder, Sqlite, SqliteConnection};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use super::counters::{self, CommentCounter, Counter, PostCounter};
use super::models::*;
use crate::error::AppError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const POST_FEED_SELECT: &str = "SELECT p.* FROM posts p LEFT JOIN users u ON u.id = p.author_id \
     WHERE p.status = 'visible' AND p.is_deleted = 0 AND COALESCE(u.enabled, 1) = 1";

/// Database connection pool wrapper.
pub struct Database {
    pub(super) pool: Pool<Sqlite>,
}

/// Target of a like
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LikeTarget {
    Post(i64),
    Comment(i64),
}

impl LikeTarget {
    pub fn id(&self) -> i64 {
        match self {
            LikeTarget::Post(id) | LikeTarget::Comment(id) => *id,
        }
    }
}

/// Requested like transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeAction {
    Like,
    Unlike,
    Toggle,
}

/// Result of a like transition
#[derive(Debug, Clone)]
pub struct LikeOutcome {
    pub target: LikeTarget,
    /// Author of the liked post or comment
    pub owner_id: String,
    /// Post the target belongs to
    pub post_id: i64,
    /// Whether the like row exists after the call
    pub liked: bool,
    /// Whether a like row was inserted or deleted
    pub changed: bool,
    /// Counter value after the call
    pub like_count: i64,
}

/// Result of a friend request attempt
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Created(FriendRequest),
    Reactivated(FriendRequest),
    AlreadyPending,
    AlreadyFriends,
}

async fn insert_media(
    conn: &mut SqliteConnection,
    table: &'static str,
    owner_column: &'static str,
    owner_id: i64,
    media: &[MediaInput],
) -> Result<(), AppError> {
    let sql = format!(
        "INSERT INTO {table} ({owner_column}, url, kind, cover_url, width, height, position) \
         VALUES (?, ?, ?, ?, ?, ?, ?)"
    );
    for (position, item) in media.iter().filter(|m| !m.url.trim().is_empty()).enumerate() {
        sqlx::query(&sql)
            .bind(owner_id)
            .bind(item.url.trim())
            .bind(item.kind)
            .bind(&item.cover_url)
            .bind(item.width)
            .bind(item.height)
            .bind(position as i64)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn attach_tags(
    conn: &mut SqliteConnection,
    post_id: i64,
    tags: &[String],
) -> Result<(), AppError> {
    for name in tags {
        sqlx::query("INSERT INTO tags (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&mut *conn)
            .await?;
        let tag_id: i64 = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(post_id)
            .bind(tag_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn insert_like_row(
    conn: &mut SqliteConnection,
    sql: &str,
    user_id: &str,
    target_id: i64,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let result = sqlx::query(sql)
        .bind(user_id)
        .bind(target_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

async fn delete_like_row(
    conn: &mut SqliteConnection,
    sql: &str,
    user_id: &str,
    target_id: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query(sql)
        .bind(user_id)
        .bind(target_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

async fn finish<T>(
    mut conn: PoolConnection<Sqlite>,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => Ok(value),
            Err(error) => {
                rollback(conn).await;
                Err(error.into())
            }
        },
        Err(error) => {
            rollback(conn).await;
            Err(error)
        }
    }
}

/// Roll back the open transaction. A connection that cannot be rolled back
/// is detached from the pool and closed.
async fn rollback(mut conn: PoolConnection<Sqlite>) {
    if let Err(error) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::error!(error = %error, "Rollback failed, detaching connection");
        if let Err(error) = conn.detach().close().await {
            tracing::warn!(error = %error, "Closing detached connection failed");
        }
    }
}

impl Database {
    /// Connect to SQLite database
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        Self::connect_with(path, 8).await
    }

    /// Connect with an explicit pool size.
    pub async fn connect_with(path: &Path, max_connections: u32) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    async fn begin_immediate(&self) -> Result<PoolConnection<Sqlite>, AppError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user or refresh its profile fields
    pub async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, avatar, role, enabled, muted_until, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                avatar = excluded.avatar,
                role = excluded.role
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.avatar)
        .bind(user.role)
        .bind(user.enabled)
        .bind(user.muted_until)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get user by ID
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Get users by IDs (batch operation to avoid N+1)
    pub async fn get_users_batch(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, User>, AppError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query_builder = QueryBuilder::<Sqlite>::new("SELECT * FROM users WHERE id IN (");
        {
            let mut separated = query_builder.separated(", ");
            for id in ids {
                separated.push_bind(id);
            }
        }
        query_builder.push(")");

        let users = query_builder
            .build_query_as::<User>()
            .fetch_all(&self.pool)
            .await?;

        Ok(users.into_iter().map(|user| (user.id.clone(), user)).collect())
    }

    /// Set or clear a user's mute expiry
    pub async fn set_user_muted_until(
        &self,
        id: &str,
        muted_until: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE users SET muted_until = ? WHERE id = ?")
            .bind(muted_until)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Enable or ban a user
    pub async fn set_user_enabled(&self, id: &str, enabled: bool) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE users SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Posts
    // =========================================================================

    /// Get post by ID
    pub async fn get_post(&self, id: i64) -> Result<Option<Post>, AppError> {
        let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(post)
    }

    /// Insert a post with its media and tags atomically.
    ///
    /// `post.tags` must already be trimmed and deduplicated.
    pub async fn insert_post(
        &self,
        author_id: &str,
        post: &NewPost,
        now: DateTime<Utc>,
    ) -> Result<Post, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<Post, AppError> = async {
            let inserted = sqlx::query(
                r#"
                INSERT INTO posts (
                    author_id, content, location, is_anonymous, status,
                    like_count, comment_count, view_count, is_deleted, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, 0, 0, 0, 0, ?, ?)
                "#,
            )
            .bind(author_id)
            .bind(&post.content)
            .bind(&post.location)
            .bind(post.is_anonymous)
            .bind(PostStatus::Visible)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            let post_id = inserted.last_insert_rowid();

            insert_media(&mut conn, "post_media", "post_id", post_id, &post.media).await?;
            attach_tags(&mut conn, post_id, &post.tags).await?;

            let stored = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
                .bind(post_id)
                .fetch_one(&mut *conn)
                .await?;
            Ok(stored)
        }
        .await;

        finish(conn, result).await
    }

    /// Replace content, location and tags of a post.
    pub async fn update_post(
        &self,
        id: i64,
        content: &str,
        location: Option<&str>,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<Post, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<Post, AppError> = async {
            let updated = sqlx::query(
                "UPDATE posts SET content = ?, location = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
            )
            .bind(content)
            .bind(location)
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(AppError::NotFound("post"));
            }

            sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            attach_tags(&mut conn, id, tags).await?;

            let stored = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;
            Ok(stored)
        }
        .await;

        finish(conn, result).await
    }

    /// Redact a post: content replaced, media and tags detached.
    ///
    /// The row, its likes, comments and counters are kept.
    pub async fn soft_delete_post(&self, id: i64, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<bool, AppError> = async {
            let updated = sqlx::query(
                "UPDATE posts SET content = ?, is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0",
            )
            .bind(POST_TOMBSTONE)
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                return Ok(false);
            }

            sqlx::query("DELETE FROM post_media WHERE post_id = ?")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            Ok(true)
        }
        .await;

        finish(conn, result).await
    }

    /// Flip moderation status of a post
    pub async fn set_post_status(&self, id: i64, status: PostStatus) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE posts SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Physically remove a post with its comments, likes, media and tags.
    pub async fn purge_post(&self, id: i64) -> Result<bool, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<bool, AppError> = async {
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM posts WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
            if exists.is_none() {
                return Ok(false);
            }

            for sql in [
                "DELETE FROM comment_likes WHERE comment_id IN (SELECT id FROM comments WHERE post_id = ?)",
                "DELETE FROM comment_media WHERE comment_id IN (SELECT id FROM comments WHERE post_id = ?)",
                "DELETE FROM comments WHERE post_id = ?",
                "DELETE FROM post_likes WHERE post_id = ?",
                "DELETE FROM post_media WHERE post_id = ?",
                "DELETE FROM post_tags WHERE post_id = ?",
                "DELETE FROM posts WHERE id = ?",
            ] {
                sqlx::query(sql).bind(id).execute(&mut *conn).await?;
            }
            Ok(true)
        }
        .await;

        finish(conn, result).await
    }

    /// Count one view of a post.
    pub async fn record_post_view(&self, id: i64) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        counters::increment(&mut conn, Counter::Post(id, PostCounter::Views)).await
    }

    /// Latest visible posts from enabled authors
    pub async fn list_visible_posts(&self, page: PageRequest) -> Result<Vec<Post>, AppError> {
        let sql = format!("{POST_FEED_SELECT} ORDER BY p.created_at DESC, p.id DESC LIMIT ? OFFSET ?");
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(posts)
    }

    /// Posts of one author; blocked posts only when `include_blocked`
    pub async fn list_posts_by_author(
        &self,
        author_id: &str,
        include_blocked: bool,
        page: PageRequest,
    ) -> Result<Vec<Post>, AppError> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM posts
            WHERE author_id = ? AND is_deleted = 0 AND (status = 'visible' OR ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(author_id)
        .bind(include_blocked)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(posts)
    }

    /// Visible posts liked by a user, most recent like first
    pub async fn list_liked_posts(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Vec<Post>, AppError> {
        let sql = format!(
            "{POST_FEED_SELECT} AND p.id IN (SELECT post_id FROM post_likes WHERE user_id = ?) \
             ORDER BY (SELECT created_at FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?) DESC, p.id DESC \
             LIMIT ? OFFSET ?"
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(user_id)
            .bind(user_id)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(posts)
    }

    /// Visible posts whose content or a tag name contains `keyword`
    pub async fn search_posts(
        &self,
        keyword: &str,
        page: PageRequest,
    ) -> Result<Vec<Post>, AppError> {
        let sql = format!(
            "{POST_FEED_SELECT} AND (p.content LIKE '%' || ? || '%' OR EXISTS (\
                SELECT 1 FROM post_tags pt JOIN tags t ON t.id = pt.tag_id \
                WHERE pt.post_id = p.id AND t.name LIKE '%' || ? || '%')) \
             ORDER BY p.created_at DESC, p.id DESC LIMIT ? OFFSET ?"
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(keyword)
            .bind(keyword)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(posts)
    }

    /// Visible posts ranked by views + likes + comments
    pub async fn list_hot_posts(&self, page: PageRequest) -> Result<Vec<Post>, AppError> {
        let sql = format!(
            "{POST_FEED_SELECT} \
             ORDER BY (p.view_count + p.like_count + p.comment_count) DESC, p.created_at DESC, p.id DESC \
             LIMIT ? OFFSET ?"
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(posts)
    }

    /// Media of the given posts, grouped by post id
    pub async fn get_post_media_batch(
        &self,
        post_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Media>>, AppError> {
        self.get_media_batch("post_media", "post_id", post_ids).await
    }

    /// Media of the given comments, grouped by comment id
    pub async fn get_comment_media_batch(
        &self,
        comment_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Media>>, AppError> {
        self.get_media_batch("comment_media", "comment_id", comment_ids)
            .await
    }

    async fn get_media_batch(
        &self,
        table: &'static str,
        owner_column: &'static str,
        owner_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Media>>, AppError> {
        if owner_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query_builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT id, {owner_column} AS owner_id, url, kind, cover_url, width, height \
             FROM {table} WHERE {owner_column} IN ("
        ));
        {
            let mut separated = query_builder.separated(", ");
            for id in owner_ids {
                separated.push_bind(*id);
            }
        }
        query_builder.push(") ORDER BY position ASC, id ASC");

        let rows = query_builder
            .build_query_as::<Media>()
            .fetch_all(&self.pool)
            .await?;

        let mut grouped: HashMap<i64, Vec<Media>> = HashMap::new();
        for media in rows {
            grouped.entry(media.owner_id).or_default().push(media);
        }
        Ok(grouped)
    }

    /// Tags of the given posts, grouped by post id
    pub async fn get_post_tags_batch(
        &self,
        post_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Tag>>, AppError> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query_builder = QueryBuilder::<Sqlite>::new(
            "SELECT pt.post_id, t.id, t.name FROM post_tags pt JOIN tags t ON t.id = pt.tag_id WHERE pt.post_id IN (",
        );
        {
            let mut separated = query_builder.separated(", ");
            for id in post_ids {
                separated.push_bind(*id);
            }
        }
        query_builder.push(") ORDER BY t.id ASC");

        let rows = query_builder
            .build_query_as::<(i64, i64, String)>()
            .fetch_all(&self.pool)
            .await?;

        let mut grouped: HashMap<i64, Vec<Tag>> = HashMap::new();
        for (post_id, id, name) in rows {
            grouped.entry(post_id).or_default().push(Tag { id, name });
        }
        Ok(grouped)
    }

    // =========================================================================
    // Likes
    // =========================================================================

    /// Apply a like transition and its counter change in one transaction.
    ///
    /// The counter moves only when a like row was actually inserted or
    /// deleted, so concurrent toggles keep `like_count` equal to the number
    /// of like rows. Soft-deleted posts accept only `Unlike`; liking or
    /// toggling them is `NotFound`.
    pub async fn apply_like(
        &self,
        user_id: &str,
        target: LikeTarget,
        action: LikeAction,
        now: DateTime<Utc>,
    ) -> Result<LikeOutcome, AppError> {
        let (lookup_sql, insert_sql, delete_sql, counter, missing) = match target {
            LikeTarget::Post(id) => (
                "SELECT author_id, id, like_count, is_deleted FROM posts WHERE id = ?",
                "INSERT OR IGNORE INTO post_likes (user_id, post_id, created_at) VALUES (?, ?, ?)",
                "DELETE FROM post_likes WHERE user_id = ? AND post_id = ?",
                Counter::Post(id, PostCounter::Likes),
                "post",
            ),
            LikeTarget::Comment(id) => (
                "SELECT author_id, post_id, like_count, 0 FROM comments WHERE id = ?",
                "INSERT OR IGNORE INTO comment_likes (user_id, comment_id, created_at) VALUES (?, ?, ?)",
                "DELETE FROM comment_likes WHERE user_id = ? AND comment_id = ?",
                Counter::Comment(id, CommentCounter::Likes),
                "comment",
            ),
        };
        let target_id = target.id();

        let mut conn = self.begin_immediate().await?;

        let result: Result<LikeOutcome, AppError> = async {
            let (owner_id, post_id, like_count, is_deleted): (String, i64, i64, bool) =
                sqlx::query_as(lookup_sql)
                    .bind(target_id)
                    .fetch_optional(&mut *conn)
                    .await?
                    .ok_or(AppError::NotFound(missing))?;
            // A deleted post can still shed its likes
            if is_deleted && action != LikeAction::Unlike {
                return Err(AppError::NotFound(missing));
            }

            let (changed, liked) = match action {
                LikeAction::Like => (
                    insert_like_row(&mut conn, insert_sql, user_id, target_id, now).await?,
                    true,
                ),
                LikeAction::Unlike => (
                    delete_like_row(&mut conn, delete_sql, user_id, target_id).await?,
                    false,
                ),
                LikeAction::Toggle => {
                    if insert_like_row(&mut conn, insert_sql, user_id, target_id, now).await? {
                        (true, true)
                    } else {
                        (
                            delete_like_row(&mut conn, delete_sql, user_id, target_id).await?,
                            false,
                        )
                    }
                }
            };

            let like_count = match (changed, liked) {
                (true, true) => {
                    counters::increment(&mut conn, counter).await?;
                    like_count.saturating_add(1)
                }
                (true, false) => {
                    counters::decrement(&mut conn, counter).await?;
                    (like_count - 1).max(0)
                }
                (false, _) => like_count,
            };

            Ok(LikeOutcome {
                target,
                owner_id,
                post_id,
                liked,
                changed,
                like_count,
            })
        }
        .await;

        finish(conn, result).await
    }

    /// Post ids among `post_ids` the user has liked
    pub async fn get_liked_post_ids_batch(
        &self,
        user_id: &str,
        post_ids: &[i64],
    ) -> Result<HashSet<i64>, AppError> {
        self.get_liked_ids_batch("post_likes", "post_id", user_id, post_ids)
            .await
    }

    /// Comment ids among `comment_ids` the user has liked
    pub async fn get_liked_comment_ids_batch(
        &self,
        user_id: &str,
        comment_ids: &[i64],
    ) -> Result<HashSet<i64>, AppError> {
        self.get_liked_ids_batch("comment_likes", "comment_id", user_id, comment_ids)
            .await
    }

    async fn get_liked_ids_batch(
        &self,
        table: &'static str,
        column: &'static str,
        user_id: &str,
        ids: &[i64],
    ) -> Result<HashSet<i64>, AppError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut query_builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {column} FROM {table} WHERE user_id = "
        ));
        query_builder.push_bind(user_id);
        query_builder.push(format!(" AND {column} IN ("));
        {
            let mut separated = query_builder.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
        }
        query_builder.push(")");

        let liked = query_builder
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await?;

        Ok(liked.into_iter().collect())
    }

    /// Number of like rows referencing a post
    pub async fn count_post_likes(&self, post_id: i64) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_likes WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Number of like rows referencing a comment
    pub async fn count_comment_likes(&self, comment_id: i64) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM comment_likes WHERE comment_id = ?")
                .bind(comment_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    // =========================================================================
    // Comments
    // =========================================================================

    /// Get comment by ID
    pub async fn get_comment(&self, id: i64) -> Result<Option<Comment>, AppError> {
        let comment = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(comment)
    }

    /// Insert a resolved comment, its media and counter changes atomically.
    ///
    /// Increments the post's `comment_count` and, for replies, the floor's
    /// `reply_count`.
    pub async fn insert_comment(
        &self,
        comment: &NewComment,
        now: DateTime<Utc>,
    ) -> Result<Comment, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<Comment, AppError> = async {
            let inserted = sqlx::query(
                r#"
                INSERT INTO comments (
                    post_id, author_id, content, parent_id, root_parent_id, reply_to_uid,
                    like_count, reply_count, is_deleted, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, 0, 0, 0, ?)
                "#,
            )
            .bind(comment.post_id)
            .bind(&comment.author_id)
            .bind(&comment.content)
            .bind(comment.parent_id)
            .bind(comment.root_parent_id)
            .bind(&comment.reply_to_uid)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            let comment_id = inserted.last_insert_rowid();

            insert_media(
                &mut conn,
                "comment_media",
                "comment_id",
                comment_id,
                &comment.media,
            )
            .await?;

            if !counters::increment(
                &mut conn,
                Counter::Post(comment.post_id, PostCounter::Comments),
            )
            .await?
            {
                return Err(AppError::NotFound("post"));
            }
            if comment.root_parent_id != 0
                && !counters::increment(
                    &mut conn,
                    Counter::Comment(comment.root_parent_id, CommentCounter::Replies),
                )
                .await?
            {
                return Err(AppError::NotFound("comment"));
            }

            let stored = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ?")
                .bind(comment_id)
                .fetch_one(&mut *conn)
                .await?;
            Ok(stored)
        }
        .await;

        finish(conn, result).await
    }

    /// Replace a comment's content with the tombstone and detach its media.
    pub async fn tombstone_comment(&self, id: i64) -> Result<bool, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<bool, AppError> = async {
            let updated = sqlx::query(
                "UPDATE comments SET content = ?, is_deleted = 1 WHERE id = ? AND is_deleted = 0",
            )
            .bind(COMMENT_TOMBSTONE)
            .bind(id)
            .execute(&mut *conn)
            .await?;

            sqlx::query("DELETE FROM comment_media WHERE comment_id = ?")
                .bind(id)
                .execute(&mut *conn)
                .await?;

            Ok(updated.rows_affected() == 1)
        }
        .await;

        finish(conn, result).await
    }

    /// Physically remove a comment (and, for a floor, its replies).
    ///
    /// Replies to a purged reply are re-parented onto its parent.
    /// Likes and media of removed comments are deleted and the post's
    /// `comment_count` (plus the floor's `reply_count` for a reply) is
    /// decremented once per removed row. Returns the number of removed
    /// comments.
    pub async fn purge_comment(&self, id: i64) -> Result<u64, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<u64, AppError> = async {
            let Some(comment) = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
            else {
                return Ok(0);
            };

            let mut doomed = vec![comment.id];
            if !comment.is_floor() {
                // Direct replies keep a chain that still ends at the floor
                sqlx::query("UPDATE comments SET parent_id = ? WHERE parent_id = ?")
                    .bind(comment.parent_id)
                    .bind(comment.id)
                    .execute(&mut *conn)
                    .await?;
            } else {
                let replies: Vec<i64> =
                    sqlx::query_scalar("SELECT id FROM comments WHERE root_parent_id = ?")
                        .bind(comment.id)
                        .fetch_all(&mut *conn)
                        .await?;
                doomed.extend(replies);
            }

            for comment_id in &doomed {
                for sql in [
                    "DELETE FROM comment_likes WHERE comment_id = ?",
                    "DELETE FROM comment_media WHERE comment_id = ?",
                    "DELETE FROM comments WHERE id = ?",
                ] {
                    sqlx::query(sql).bind(comment_id).execute(&mut *conn).await?;
                }
                counters::decrement(
                    &mut conn,
                    Counter::Post(comment.post_id, PostCounter::Comments),
                )
                .await?;
            }

            if !comment.is_floor() {
                counters::decrement(
                    &mut conn,
                    Counter::Comment(comment.root_parent_id, CommentCounter::Replies),
                )
                .await?;
            }

            Ok(doomed.len() as u64)
        }
        .await;

        finish(conn, result).await
    }

    /// Floors of a post, hottest first
    pub async fn list_floors(
        &self,
        post_id: i64,
        page: PageRequest,
    ) -> Result<Vec<Comment>, AppError> {
        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT * FROM comments
            WHERE post_id = ? AND root_parent_id = 0
            ORDER BY like_count DESC, created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(post_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(comments)
    }

    /// Every reply under a floor in chronological order
    pub async fn list_replies(&self, floor_id: i64) -> Result<Vec<Comment>, AppError> {
        let comments = sqlx::query_as::<_, Comment>(
            "SELECT * FROM comments WHERE root_parent_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(floor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(comments)
    }

    /// Comments written by one user, newest first
    pub async fn list_comments_by_author(
        &self,
        author_id: &str,
        page: PageRequest,
    ) -> Result<Vec<Comment>, AppError> {
        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT * FROM comments
            WHERE author_id = ? AND is_deleted = 0
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(author_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(comments)
    }

    // =========================================================================
    // Friend requests
    // =========================================================================

    /// Get friend request by ID
    pub async fn get_friend_request(&self, id: i64) -> Result<Option<FriendRequest>, AppError> {
        let request = sqlx::query_as::<_, FriendRequest>(
            "SELECT id, requester_id, addressee_id, status, created_at, updated_at FROM friend_requests WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    /// The request row of an unordered pair, whichever side sent it
    pub async fn find_friend_request_between(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<FriendRequest>, AppError> {
        let (low, high) = canonical_pair(a, b);
        let request = sqlx::query_as::<_, FriendRequest>(
            r#"
            SELECT id, requester_id, addressee_id, status, created_at, updated_at
            FROM friend_requests WHERE user_low = ? AND user_high = ?
            "#,
        )
        .bind(low)
        .bind(high)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    /// Open a friend request from `requester` to `addressee`.
    ///
    /// # Transitions
    /// - no row: insert PENDING
    /// - REJECTED: back to PENDING with requester/addressee overwritten
    /// - PENDING / ACCEPTED: unchanged, reported to the caller
    pub async fn open_friend_request(
        &self,
        requester: &str,
        addressee: &str,
        now: DateTime<Utc>,
    ) -> Result<RequestOutcome, AppError> {
        let (low, high) = canonical_pair(requester, addressee);
        let mut conn = self.begin_immediate().await?;

        let result: Result<RequestOutcome, AppError> = async {
            let existing: Option<(i64, FriendRequestStatus)> = sqlx::query_as(
                "SELECT id, status FROM friend_requests WHERE user_low = ? AND user_high = ?",
            )
            .bind(low)
            .bind(high)
            .fetch_optional(&mut *conn)
            .await?;

            let id = match existing {
                Some((_, FriendRequestStatus::Pending)) => {
                    return Ok(RequestOutcome::AlreadyPending);
                }
                Some((_, FriendRequestStatus::Accepted)) => {
                    return Ok(RequestOutcome::AlreadyFriends);
                }
                Some((id, FriendRequestStatus::Rejected)) => {
                    sqlx::query(
                        r#"
                        UPDATE friend_requests
                        SET requester_id = ?, addressee_id = ?, status = ?, updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(requester)
                    .bind(addressee)
                    .bind(FriendRequestStatus::Pending)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                    id
                }
                None => sqlx::query(
                    r#"
                    INSERT INTO friend_requests (
                        requester_id, addressee_id, user_low, user_high, status, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(requester)
                .bind(addressee)
                .bind(low)
                .bind(high)
                .bind(FriendRequestStatus::Pending)
                .bind(now)
                .bind(now)
                .execute(&mut *conn)
                .await?
                .last_insert_rowid(),
            };

            let request = sqlx::query_as::<_, FriendRequest>(
                "SELECT id, requester_id, addressee_id, status, created_at, updated_at FROM friend_requests WHERE id = ?",
            )
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;

            Ok(if existing.is_some() {
                RequestOutcome::Reactivated(request)
            } else {
                RequestOutcome::Created(request)
            })
        }
        .await;

        finish(conn, result).await
    }

    /// Accept or reject a pending request as its addressee.
    pub async fn respond_friend_request(
        &self,
        id: i64,
        acting_uid: &str,
        accept: bool,
        now: DateTime<Utc>,
    ) -> Result<FriendRequest, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<FriendRequest, AppError> = async {
            let mut request = sqlx::query_as::<_, FriendRequest>(
                "SELECT id, requester_id, addressee_id, status, created_at, updated_at FROM friend_requests WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(AppError::NotFound("friend request"))?;

            if request.addressee_id != acting_uid {
                return Err(AppError::Forbidden);
            }
            if request.status != FriendRequestStatus::Pending {
                return Err(AppError::Conflict("request already handled".to_string()));
            }

            let status = if accept {
                FriendRequestStatus::Accepted
            } else {
                FriendRequestStatus::Rejected
            };
            sqlx::query("UPDATE friend_requests SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status)
                .bind(now)
                .bind(id)
                .execute(&mut *conn)
                .await?;

            request.status = status;
            request.updated_at = now;
            Ok(request)
        }
        .await;

        finish(conn, result).await
    }

    /// Remove an accepted friendship row
    pub async fn delete_friendship(&self, a: &str, b: &str) -> Result<bool, AppError> {
        let (low, high) = canonical_pair(a, b);
        let result = sqlx::query(
            "DELETE FROM friend_requests WHERE user_low = ? AND user_high = ? AND status = 'ACCEPTED'",
        )
        .bind(low)
        .bind(high)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Check whether two users are friends
    pub async fn are_friends(&self, a: &str, b: &str) -> Result<bool, AppError> {
        let (low, high) = canonical_pair(a, b);
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM friend_requests WHERE user_low = ? AND user_high = ? AND status = 'ACCEPTED'",
        )
        .bind(low)
        .bind(high)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Which of `candidates` are friends of `user_id`
    pub async fn get_friend_ids_batch(
        &self,
        user_id: &str,
        candidates: &[String],
    ) -> Result<HashSet<String>, AppError> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let mut query_builder = QueryBuilder::<Sqlite>::new(
            "SELECT CASE WHEN requester_id = ",
        );
        query_builder.push_bind(user_id);
        query_builder.push(" THEN addressee_id ELSE requester_id END FROM friend_requests WHERE status = 'ACCEPTED' AND (requester_id = ");
        query_builder.push_bind(user_id);
        query_builder.push(" OR addressee_id = ");
        query_builder.push_bind(user_id);
        query_builder.push(") AND (requester_id IN (");
        {
            let mut separated = query_builder.separated(", ");
            for candidate in candidates {
                separated.push_bind(candidate);
            }
        }
        query_builder.push(") OR addressee_id IN (");
        {
            let mut separated = query_builder.separated(", ");
            for candidate in candidates {
                separated.push_bind(candidate);
            }
        }
        query_builder.push("))");

        let friends = query_builder
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;

        Ok(friends.into_iter().collect())
    }

    /// Every friend of a user
    pub async fn list_friend_ids(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let friends = sqlx::query_scalar::<_, String>(
            r#"
            SELECT CASE WHEN requester_id = ? THEN addressee_id ELSE requester_id END
            FROM friend_requests
            WHERE status = 'ACCEPTED' AND (requester_id = ? OR addressee_id = ?)
            ORDER BY updated_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(friends)
    }

    /// Pending requests addressed to a user, newest first
    pub async fn list_pending_requests(
        &self,
        addressee_id: &str,
    ) -> Result<Vec<FriendRequest>, AppError> {
        let requests = sqlx::query_as::<_, FriendRequest>(
            r#"
            SELECT id, requester_id, addressee_id, status, created_at, updated_at
            FROM friend_requests
            WHERE addressee_id = ? AND status = 'PENDING'
            ORDER BY updated_at DESC, id DESC
            "#,
        )
        .bind(addressee_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }

    /// Number of request rows for an unordered pair
    pub async fn count_friend_requests_between(&self, a: &str, b: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM friend_requests
            WHERE (requester_id = ? AND addressee_id = ?) OR (requester_id = ? AND addressee_id = ?)
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Insert notification
    pub async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<i64, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (
                receiver_id, sender_id, notification_type, post_id, comment_id, content, is_read, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&notification.receiver_id)
        .bind(&notification.sender_id)
        .bind(notification.notification_type)
        .bind(notification.post_id)
        .bind(notification.comment_id)
        .bind(&notification.content)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Write a private-message notification, folding it into the receiver's
    /// unread row from the same sender when one exists.
    ///
    /// An existing row is only overwritten by a message at least as new as
    /// the one it holds.
    pub async fn upsert_message_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<NotificationWrite, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<NotificationWrite, AppError> = async {
            let existing: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
                r#"
                SELECT id, created_at FROM notifications
                WHERE receiver_id = ? AND sender_id = ? AND notification_type = ? AND is_read = 0
                ORDER BY created_at DESC, id DESC
                LIMIT 1
                "#,
            )
            .bind(&notification.receiver_id)
            .bind(&notification.sender_id)
            .bind(NotificationType::PrivateMessage)
            .fetch_optional(&mut *conn)
            .await?;

            match existing {
                Some((id, created_at)) if created_at <= notification.created_at => {
                    sqlx::query("UPDATE notifications SET content = ?, created_at = ? WHERE id = ?")
                        .bind(&notification.content)
                        .bind(notification.created_at)
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(NotificationWrite::Aggregated)
                }
                Some(_) => Ok(NotificationWrite::Stale),
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO notifications (
                            receiver_id, sender_id, notification_type, post_id, comment_id, content, is_read, created_at
                        ) VALUES (?, ?, ?, NULL, NULL, ?, 0, ?)
                        "#,
                    )
                    .bind(&notification.receiver_id)
                    .bind(&notification.sender_id)
                    .bind(NotificationType::PrivateMessage)
                    .bind(&notification.content)
                    .bind(notification.created_at)
                    .execute(&mut *conn)
                    .await?;
                    Ok(NotificationWrite::Inserted)
                }
            }
        }
        .await;

        finish(conn, result).await
    }

    /// Notifications of a receiver, newest first
    pub async fn list_notifications(
        &self,
        receiver_id: &str,
        page: PageRequest,
    ) -> Result<Vec<Notification>, AppError> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications WHERE receiver_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(receiver_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    /// Count unread notifications of a receiver
    pub async fn count_unread_notifications(&self, receiver_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE receiver_id = ? AND is_read = 0",
        )
        .bind(receiver_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Mark one notification as read
    pub async fn mark_notification_read(
        &self,
        receiver_id: &str,
        id: i64,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND receiver_id = ?")
                .bind(id)
                .bind(receiver_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark all notifications of a receiver as read
    pub async fn mark_all_notifications_read(&self, receiver_id: &str) -> Result<u64, AppError> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE receiver_id = ? AND is_read = 0")
                .bind(receiver_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Delete one notification of a receiver
    pub async fn delete_notification(&self, receiver_id: &str, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND receiver_id = ?")
            .bind(id)
            .bind(receiver_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Private messages
    // =========================================================================

    /// Insert a private message
    pub async fn insert_private_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<PrivateMessage, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO private_messages (
                sender_id, receiver_id, content, is_read, deleted_by_sender, deleted_by_receiver, created_at
            ) VALUES (?, ?, ?, 0, 0, 0, ?)
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(PrivateMessage {
            id: result.last_insert_rowid(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            is_read: false,
            deleted_by_sender: false,
            deleted_by_receiver: false,
            created_at: now,
        })
    }

    /// Mark messages from `peer` to `reader` and the matching private-message
    /// notifications as read in one transaction.
    ///
    /// Returns (messages flipped, notifications flipped).
    pub async fn mark_conversation_read(
        &self,
        reader: &str,
        peer: &str,
    ) -> Result<(u64, u64), AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<(u64, u64), AppError> = async {
            let messages = sqlx::query(
                "UPDATE private_messages SET is_read = 1 WHERE receiver_id = ? AND sender_id = ? AND is_read = 0",
            )
            .bind(reader)
            .bind(peer)
            .execute(&mut *conn)
            .await?;

            let notifications = sqlx::query(
                r#"
                UPDATE notifications SET is_read = 1
                WHERE receiver_id = ? AND sender_id = ? AND notification_type = ? AND is_read = 0
                "#,
            )
            .bind(reader)
            .bind(peer)
            .bind(NotificationType::PrivateMessage)
            .execute(&mut *conn)
            .await?;

            Ok((messages.rows_affected(), notifications.rows_affected()))
        }
        .await;

        finish(conn, result).await
    }

    /// Messages between `viewer` and `peer` still visible to `viewer`,
    /// newest first
    pub async fn list_chat_history(
        &self,
        viewer: &str,
        peer: &str,
        page: PageRequest,
    ) -> Result<Vec<PrivateMessage>, AppError> {
        let messages = sqlx::query_as::<_, PrivateMessage>(
            r#"
            SELECT * FROM private_messages
            WHERE (sender_id = ? AND receiver_id = ? AND deleted_by_sender = 0)
               OR (sender_id = ? AND receiver_id = ? AND deleted_by_receiver = 0)
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(viewer)
        .bind(peer)
        .bind(peer)
        .bind(viewer)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Most recent messages between two users regardless of hidden flags,
    /// newest first
    pub async fn list_recent_messages_between(
        &self,
        a: &str,
        b: &str,
        limit: usize,
    ) -> Result<Vec<PrivateMessage>, AppError> {
        let messages = sqlx::query_as::<_, PrivateMessage>(
            r#"
            SELECT * FROM private_messages
            WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Hide the conversation with `peer` from `viewer`'s side only.
    pub async fn clear_chat_history(&self, viewer: &str, peer: &str) -> Result<u64, AppError> {
        let mut conn = self.begin_immediate().await?;

        let result: Result<u64, AppError> = async {
            let sent = sqlx::query(
                "UPDATE private_messages SET deleted_by_sender = 1 WHERE sender_id = ? AND receiver_id = ? AND deleted_by_sender = 0",
            )
            .bind(viewer)
            .bind(peer)
            .execute(&mut *conn)
            .await?;

            let received = sqlx::query(
                "UPDATE private_messages SET deleted_by_receiver = 1, is_read = 1 WHERE sender_id = ? AND receiver_id = ? AND deleted_by_receiver = 0",
            )
            .bind(peer)
            .bind(viewer)
            .execute(&mut *conn)
            .await?;

            Ok(sent.rows_affected() + received.rows_affected())
        }
        .await;

        finish(conn, result).await
    }

    /// Latest visible message per peer, most recent conversation first
    pub async fn list_latest_messages_per_peer(
        &self,
        viewer: &str,
    ) -> Result<Vec<PrivateMessage>, AppError> {
        let messages = sqlx::query_as::<_, PrivateMessage>(
            r#"
            SELECT m.* FROM private_messages m
            JOIN (
                SELECT CASE WHEN sender_id = ? THEN receiver_id ELSE sender_id END AS peer_id,
                       MAX(id) AS last_id
                FROM private_messages
                WHERE (sender_id = ? AND deleted_by_sender = 0)
                   OR (receiver_id = ? AND deleted_by_receiver = 0)
                GROUP BY peer_id
            ) latest ON latest.last_id = m.id
            ORDER BY m.created_at DESC, m.id DESC
            "#,
        )
        .bind(viewer)
        .bind(viewer)
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Unread message counts keyed by sender
    pub async fn count_unread_messages_by_sender(
        &self,
        receiver_id: &str,
    ) -> Result<HashMap<String, i64>, AppError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT sender_id, COUNT(*) FROM private_messages
            WHERE receiver_id = ? AND is_read = 0 AND deleted_by_receiver = 0
            GROUP BY sender_id
            "#,
        )
        .bind(receiver_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}
