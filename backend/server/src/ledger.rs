//! # Like Ledger
//!
//! Owns "at most one like per (comment, client)" and the per-comment count derived from it.
//!
//! ## Protocol
//!
//! 1. Validate the comment id and client id without touching storage
//! 2. Early exit if the pair is already recorded
//! 3. [Backend::record_like]: insert the pair, `likes = likes + 1`, read back, atomically
//!
//! Step 2 is only an optimization. Two requests for the same pair can both pass it; the store's
//! uniqueness constraint in step 3 decides which one counts and the other surfaces as
//! [LikeError::AlreadyLiked]. Retrying any failed like is therefore safe.
//!
//! ## Limitations
//!
//! Read-your-writes only holds as far as the [Backend] provides it. A replicated store may serve
//! a stale count on [LikeLedger::like_count] right after a like.
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
#[cfg(feature = "verbose")]
use tracing::info;
use tracing::{debug, error};

use crate::{
    identity::{ClientId, RequestMetadata},
    storage::{Backend, Comment, CommentId, LikeRecorded, StoreError},
};

#[derive(Error, Debug)]
pub enum LikeError {
    #[error("Invalid comment ID")]
    InvalidCommentId,

    #[error("Client ID unavailable")]
    MissingClientId,

    #[error("Already liked")]
    AlreadyLiked,

    #[error("Comment not found")]
    CommentNotFound,

    /// `recorded` is set when the like itself took but the count may not reflect it.
    #[error("Storage failure")]
    StorageFailure {
        recorded: bool,
        #[source]
        source: StoreError,
    },
}

/// Why a like was rejected, as the caller sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Reason {
    InvalidCommentId,
    MissingClientId,
    AlreadyLiked,
    CommentNotFound,
    StorageFailure,
}

impl LikeError {
    pub fn reason(&self) -> Reason {
        match self {
            LikeError::InvalidCommentId => Reason::InvalidCommentId,
            LikeError::MissingClientId => Reason::MissingClientId,
            LikeError::AlreadyLiked => Reason::AlreadyLiked,
            LikeError::CommentNotFound => Reason::CommentNotFound,
            LikeError::StorageFailure { .. } => Reason::StorageFailure,
        }
    }
}

impl From<StoreError> for LikeError {
    fn from(source: StoreError) -> Self {
        LikeError::StorageFailure {
            recorded: false,
            source,
        }
    }
}

/// The `submitLike` result as the routing layer sends it.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LikeOutcome {
    Liked {
        success: bool,
        likes: u64,
    },
    Rejected {
        success: bool,
        reason: Reason,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        recorded: Option<bool>,
    },
}

impl From<Result<u64, LikeError>> for LikeOutcome {
    fn from(result: Result<u64, LikeError>) -> Self {
        match result {
            Ok(likes) => LikeOutcome::Liked {
                success: true,
                likes,
            },
            Err(err) => LikeOutcome::Rejected {
                success: false,
                reason: err.reason(),
                recorded: match &err {
                    LikeError::StorageFailure { recorded, .. } => Some(*recorded),
                    _ => None,
                },
                error: err.to_string(),
            },
        }
    }
}

impl LikeOutcome {
    pub fn rejection(&self) -> Option<Reason> {
        match self {
            LikeOutcome::Liked { .. } => None,
            LikeOutcome::Rejected { reason, .. } => Some(*reason),
        }
    }
}

#[derive(Clone)]
pub struct LikeLedger {
    backend: Arc<dyn Backend>,
}

impl LikeLedger {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn like(&self, comment_id: i64, client_id: &str) -> Result<u64, LikeError> {
        let comment_id = CommentId::new(comment_id)?;
        let client_id = ClientId::parse(client_id)?;

        self.like_with_id(comment_id, &client_id).await
    }

    pub async fn like_with_id(
        &self,
        comment_id: CommentId,
        client_id: &ClientId,
    ) -> Result<u64, LikeError> {
        if self
            .backend
            .has_liked(comment_id, client_id)
            .await
            .map_err(|e| storage_failure("lookup", e))?
        {
            debug!("{client_id} already liked comment {comment_id}");
            return Err(LikeError::AlreadyLiked);
        }

        let recorded = self
            .backend
            .record_like(comment_id, client_id)
            .await
            .map_err(|e| storage_failure("record", e))?;

        #[cfg(feature = "verbose")]
        info!("Like {comment_id} by {client_id}: {recorded:?}");

        match recorded {
            LikeRecorded::Counted(likes) => Ok(likes),
            LikeRecorded::Duplicate => Err(LikeError::AlreadyLiked),
            LikeRecorded::NoSuchComment => Err(LikeError::CommentNotFound),
        }
    }

    /// `submitLike`: validate a raw `commentId`, derive the client and like.
    pub async fn submit_like(&self, comment_id: &Value, metadata: &RequestMetadata) -> LikeOutcome {
        let result = match CommentId::from_json(comment_id) {
            Ok(id) => self.like_with_id(id, &metadata.client_id()).await,
            Err(err) => Err(err),
        };

        result.into()
    }

    pub async fn like_count(&self, comment_id: i64) -> Result<u64, LikeError> {
        let comment_id = CommentId::new(comment_id)?;

        self.backend
            .like_count(comment_id)
            .await
            .map_err(|e| storage_failure("count", e))?
            .ok_or(LikeError::CommentNotFound)
    }

    pub async fn list_comments(&self, limit: usize) -> Result<Vec<Comment>, StoreError> {
        self.backend.list_comments(limit).await
    }
}

fn storage_failure(step: &str, source: StoreError) -> LikeError {
    error!("Like {step} failed: {source}");
    source.into()
}
