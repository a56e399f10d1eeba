use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{self, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    comments::NewComment,
    error::{AppError, reason_status},
    identity::RequestMetadata,
    ledger::LikeError,
    state::State,
    utils::{field, json_object},
};

pub async fn list_comments_handler(
    extract::State(state): extract::State<Arc<State>>,
) -> Result<Json<Value>, AppError> {
    let comments = state.ledger.list_comments(state.config.comments_limit).await?;

    Ok(Json(json!({ "comments": comments })))
}

pub async fn post_comment_handler(
    extract::State(state): extract::State<Arc<State>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let payload = json_object(&body)?;
    let comment = NewComment::validate(field(&payload, "username"), field(&payload, "text"))?;

    let comment = state.backend.add_comment(&comment, Utc::now()).await?;
    info!("New comment {} by {}", comment.id, comment.username);

    Ok(Json(json!({ "success": true, "comment": comment })))
}

pub async fn like_handler(
    extract::State(state): extract::State<Arc<State>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let payload = json_object(&body)?;
    let metadata = RequestMetadata::from_headers(&headers, &state.config.client_ip_header);

    let outcome = state
        .ledger
        .submit_like(field(&payload, "commentId"), &metadata)
        .await;

    let status = outcome.rejection().map_or(StatusCode::OK, |reason| {
        debug!("Like rejected: {reason:?}");
        reason_status(reason)
    });

    Ok((status, Json(outcome)).into_response())
}

pub async fn like_count_handler(
    extract::State(state): extract::State<Arc<State>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = id.parse().map_err(|_| LikeError::InvalidCommentId)?;
    // a read has nothing to report as "recorded", so storage trouble is a plain 500
    let likes = state.ledger.like_count(id).await.map_err(|err| match err {
        LikeError::StorageFailure { source, .. } => AppError::Store(source),
        other => AppError::Like(other),
    })?;

    Ok(Json(json!({ "likes": likes })))
}

pub async fn not_found_handler() -> AppError {
    AppError::NotFound
}
