//! Denormalized counters
//!
//! Counters are only ever changed by a single `UPDATE` statement on the
//! caller's transaction connection. Decrement stops at zero.

use sqlx::SqliteConnection;

use crate::error::AppError;
use crate::metrics::COUNTER_UPDATES_TOTAL;

/// Counters kept on a post row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCounter {
    Likes,
    Comments,
    Views,
}

/// Counters kept on a comment row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentCounter {
    Likes,
    Replies,
}

/// A counter column bound to the row that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Post(i64, PostCounter),
    Comment(i64, CommentCounter),
}

impl Counter {
    fn table(&self) -> &'static str {
        match self {
            Counter::Post(..) => "posts",
            Counter::Comment(..) => "comments",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Counter::Post(_, PostCounter::Likes) => "like_count",
            Counter::Post(_, PostCounter::Comments) => "comment_count",
            Counter::Post(_, PostCounter::Views) => "view_count",
            Counter::Comment(_, CommentCounter::Likes) => "like_count",
            Counter::Comment(_, CommentCounter::Replies) => "reply_count",
        }
    }

    fn row_id(&self) -> i64 {
        match self {
            Counter::Post(id, _) | Counter::Comment(id, _) => *id,
        }
    }
}

/// Add one to the counter. Returns whether a row was updated.
pub async fn increment(conn: &mut SqliteConnection, counter: Counter) -> Result<bool, AppError> {
    let sql = format!(
        "UPDATE {table} SET {column} = {column} + 1 WHERE id = ?",
        table = counter.table(),
        column = counter.column()
    );
    let result = sqlx::query(&sql)
        .bind(counter.row_id())
        .execute(&mut *conn)
        .await?;

    COUNTER_UPDATES_TOTAL
        .with_label_values(&[counter.table(), counter.column(), "increment"])
        .inc();

    Ok(result.rows_affected() == 1)
}

/// Subtract one from the counter unless it is already zero.
///
/// Returns whether the stored value changed.
pub async fn decrement(conn: &mut SqliteConnection, counter: Counter) -> Result<bool, AppError> {
    let sql = format!(
        "UPDATE {table} SET {column} = {column} - 1 WHERE id = ? AND {column} > 0",
        table = counter.table(),
        column = counter.column()
    );
    let result = sqlx::query(&sql)
        .bind(counter.row_id())
        .execute(&mut *conn)
        .await?;

    COUNTER_UPDATES_TOTAL
        .with_label_values(&[counter.table(), counter.column(), "decrement"])
        .inc();

    Ok(result.rows_affected() == 1)
}
