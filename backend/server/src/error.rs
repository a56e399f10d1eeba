use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{
    comments::CommentError,
    ledger::{LikeError, LikeOutcome, Reason},
    storage::StoreError,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid JSON")]
    MalformedPayload,

    #[error("{0}")]
    InvalidComment(#[from] CommentError),

    #[error("{0}")]
    Like(#[from] LikeError),

    #[error("Not Found")]
    NotFound,

    #[error("Internal error: {0}")]
    Store(#[from] StoreError),
}

pub fn reason_status(reason: Reason) -> StatusCode {
    match reason {
        Reason::InvalidCommentId | Reason::MissingClientId | Reason::AlreadyLiked => {
            StatusCode::BAD_REQUEST
        }
        Reason::CommentNotFound => StatusCode::NOT_FOUND,
        Reason::StorageFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MalformedPayload | AppError::InvalidComment(_) => StatusCode::BAD_REQUEST,
            AppError::Like(err) => reason_status(err.reason()),
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match self {
            AppError::Like(err) => {
                (status, Json(LikeOutcome::from(Err::<u64, _>(err)))).into_response()
            }
            AppError::Store(err) => {
                error!("Request failed: {err}");
                (status, Json(json!({ "error": "Internal Server Error" }))).into_response()
            }
            other => (status, Json(json!({ "error": other.to_string() }))).into_response(),
        }
    }
}
