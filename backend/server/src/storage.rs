//! # Storage
//!
//! Abstractions for the comments storage layer.
//!
//! The store is the only source of truth: nothing in-process is relied on to keep likes unique or
//! counts correct. Each [Backend] must provide
//!
//! - a point lookup on the `(comment, client)` pair
//! - an insert of that pair guarded by a uniqueness constraint
//! - an in-store `likes = likes + 1`
//! - a point read of the count
//!
//! with the last three applied as one atomic unit by [Backend::record_like].
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{comments::NewComment, identity::ClientId, ledger::LikeError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CommentId(i64);

impl CommentId {
    pub fn new(id: i64) -> Result<Self, LikeError> {
        if id <= 0 {
            return Err(LikeError::InvalidCommentId);
        }

        Ok(Self(id))
    }

    /// Fails closed: only a positive, integer-valued JSON number is an id.
    pub fn from_json(value: &Value) -> Result<Self, LikeError> {
        let Value::Number(number) = value else {
            return Err(LikeError::InvalidCommentId);
        };

        if let Some(id) = number.as_i64() {
            return Self::new(id);
        }

        // `3.0` is an integer as far as a JavaScript client is concerned
        match number.as_f64() {
            Some(float) if float.fract() == 0.0 && float >= 1.0 && float <= i64::MAX as f64 => {
                Self::new(float as i64)
            }
            _ => Err(LikeError::InvalidCommentId),
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub username: String,
    pub text: String,
    pub likes: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of an atomic attempt to record one like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LikeRecorded {
    /// The pair was new; carries the count after the increment.
    Counted(u64),
    /// The uniqueness constraint rejected the pair; nothing changed.
    Duplicate,
    /// No comment with that id; nothing changed.
    NoSuchComment,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Newest first, at most `limit` comments.
    async fn list_comments(&self, limit: usize) -> Result<Vec<Comment>, StoreError>;
    /// Persist a validated comment with zero likes; the store assigns the id.
    async fn add_comment(
        &self,
        comment: &NewComment,
        created_at: DateTime<Utc>,
    ) -> Result<Comment, StoreError>;
    /// None means there is no such comment.
    async fn like_count(&self, id: CommentId) -> Result<Option<u64>, StoreError>;
    async fn has_liked(&self, id: CommentId, client: &ClientId) -> Result<bool, StoreError>;
    /// Insert the `(id, client)` record, bump the count and read it back, all or nothing.
    async fn record_like(
        &self,
        id: CommentId,
        client: &ClientId,
    ) -> Result<LikeRecorded, StoreError>;
}
