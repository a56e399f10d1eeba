//! # SQLite
//!
//! Embedded [Backend], the default store.
//!
//! ## Schema
//!
//! - `comments`: one row per comment, `likes` is the aggregate
//! - `comment_likes`: one row per like, primary key `(comment_id, user_identifier)`, foreign key
//!   into `comments`
//!
//! The primary key is what guarantees one like per client; the foreign key is what keeps likes
//! off comments that don't exist. [Backend::record_like] runs the insert, the increment and the
//! read back inside one `IMMEDIATE` transaction so a failure part way leaves nothing behind.
//!
//! `rusqlite` is blocking, so every call hops onto the blocking pool.
use std::{
    os::raw::c_int,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, ffi, params};
use tokio::task::spawn_blocking;
use tracing::info;

use crate::{
    comments::NewComment,
    identity::ClientId,
    storage::{Backend, Comment, CommentId, LikeRecorded, StoreError},
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL,
        text TEXT NOT NULL,
        likes INTEGER NOT NULL DEFAULT 0 CHECK (likes >= 0),
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS comments_created_at ON comments (created_at DESC);

    CREATE TABLE IF NOT EXISTS comment_likes (
        comment_id INTEGER NOT NULL REFERENCES comments (id),
        user_identifier TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        PRIMARY KEY (comment_id, user_identifier)
    );
"#;

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // readers don't block the single writer
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;

        info!("Opened SQLite store at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await?
    }
}

/// Extended result code of a constraint violation, if that's what `err` is.
fn constraint_violation(err: &rusqlite::Error) -> Option<c_int> {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Some(failure.extended_code)
        }
        _ => None,
    }
}

fn to_count(likes: i64) -> Result<u64, StoreError> {
    u64::try_from(likes).map_err(|_| StoreError::Corrupt(format!("negative like count {likes}")))
}

fn to_comment(
    (id, username, text, likes, created_at): (i64, String, String, i64, String),
) -> Result<Comment, StoreError> {
    let id = CommentId::new(id).map_err(|_| StoreError::Corrupt(format!("comment id {id}")))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::Corrupt(format!("created_at of {id}: {e}")))?
        .with_timezone(&Utc);

    Ok(Comment {
        id,
        username,
        text,
        likes: to_count(likes)?,
        created_at,
    })
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn list_comments(&self, limit: usize) -> Result<Vec<Comment>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, username, text, likes, created_at FROM comments \
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;

            let rows: Vec<(i64, String, String, i64, String)> = stmt
                .query_map([limit], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(to_comment).collect()
        })
        .await
    }

    async fn add_comment(
        &self,
        comment: &NewComment,
        created_at: DateTime<Utc>,
    ) -> Result<Comment, StoreError> {
        let comment = comment.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO comments (username, text, likes, created_at) VALUES (?1, ?2, 0, ?3)",
                params![
                    comment.username,
                    comment.text,
                    created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
                ],
            )?;

            to_comment((
                conn.last_insert_rowid(),
                comment.username,
                comment.text,
                0,
                created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ))
        })
        .await
    }

    async fn like_count(&self, id: CommentId) -> Result<Option<u64>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT likes FROM comments WHERE id = ?1",
                [id.get()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(to_count)
            .transpose()
        })
        .await
    }

    async fn has_liked(&self, id: CommentId, client: &ClientId) -> Result<bool, StoreError> {
        let client = client.clone();

        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM comment_likes WHERE comment_id = ?1 AND user_identifier = ?2",
                    params![id.get(), client.as_str()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
        .await
    }

    async fn record_like(
        &self,
        id: CommentId,
        client: &ClientId,
    ) -> Result<LikeRecorded, StoreError> {
        let client = client.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            // dropping `tx` on an early return rolls back
            if let Err(err) = tx.execute(
                "INSERT INTO comment_likes (comment_id, user_identifier) VALUES (?1, ?2)",
                params![id.get(), client.as_str()],
            ) {
                return match constraint_violation(&err) {
                    Some(ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                        Ok(LikeRecorded::Duplicate)
                    }
                    Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => Ok(LikeRecorded::NoSuchComment),
                    _ => Err(err.into()),
                };
            }

            if tx.execute("UPDATE comments SET likes = likes + 1 WHERE id = ?1", [id.get()])? == 0 {
                return Ok(LikeRecorded::NoSuchComment);
            }

            let likes: i64 =
                tx.query_row("SELECT likes FROM comments WHERE id = ?1", [id.get()], |row| {
                    row.get(0)
                })?;

            tx.commit()?;

            Ok(LikeRecorded::Counted(to_count(likes)?))
        })
        .await
    }
}
