use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderValue, Request, StatusCode, header},
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use server::{
    comments::NewComment,
    config::{Config, StoreUrl},
    identity::ClientId,
    router,
    sqlite::SqliteBackend,
    state::State,
    storage::{Backend, Comment, CommentId, LikeRecorded, StoreError},
};
use tower::ServiceExt;

const ORIGIN: &str = "https://example.org";

fn setup() -> Router {
    setup_with(Arc::new(SqliteBackend::open_in_memory().unwrap()))
}

fn setup_with(backend: Arc<dyn Backend>) -> Router {
    let config = Config {
        port: 0,
        store_url: StoreUrl::Sqlite(":memory:".to_string()),
        allowed_origin: HeaderValue::from_static(ORIGIN),
        client_ip_header: "CF-Connecting-IP".to_string(),
        comments_limit: 50,
    };

    router(State::with_backend(config, backend))
}

async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    ip: &str,
    body: Option<&str>,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("CF-Connecting-IP", ip)
        .header(header::USER_AGENT, "tests")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();

    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, json)
}

async fn post_comment(router: &Router, username: &str, text: &str) -> Value {
    let body = json!({ "username": username, "text": text }).to_string();
    let (status, json) = call(router, "POST", "/api/comments", "1.1.1.1", Some(&body)).await;

    assert_eq!(status, StatusCode::OK, "{json}");
    json["comment"].clone()
}

#[tokio::test]
async fn like_scenario() {
    let router = setup();
    let comment = post_comment(&router, "ann", "hello world").await;
    assert_eq!(comment["likes"], json!(0));

    let like = json!({ "commentId": comment["id"] }).to_string();

    let (status, body) = call(&router, "POST", "/api/comments/like", "1.2.3.4", Some(&like)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "likes": 1 }));

    let (status, body) = call(&router, "POST", "/api/comments/like", "1.2.3.4", Some(&like)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["reason"], json!("AlreadyLiked"));

    let uri = format!("/api/comments/{}/likes", comment["id"]);
    let (status, body) = call(&router, "GET", &uri, "1.2.3.4", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "likes": 1 }));

    let (status, body) = call(&router, "POST", "/api/comments/like", "5.6.7.8", Some(&like)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "likes": 2 }));
}

#[tokio::test]
async fn like_rejections() {
    let router = setup();

    for body in [
        r#"{"commentId": -1}"#,
        r#"{"commentId": 3.5}"#,
        r#"{"commentId": "1"}"#,
        r#"{}"#,
    ] {
        let (status, json) = call(&router, "POST", "/api/comments/like", "1.2.3.4", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(json["reason"], json!("InvalidCommentId"), "{body}");
    }

    let (status, json) = call(
        &router,
        "POST",
        "/api/comments/like",
        "1.2.3.4",
        Some(r#"{"commentId": 999999}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["reason"], json!("CommentNotFound"));

    let (status, json) = call(&router, "POST", "/api/comments/like", "1.2.3.4", Some("{oops")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({ "error": "Invalid JSON" }));
}

#[tokio::test]
async fn like_count_rejections() {
    let router = setup();

    let (status, json) = call(&router, "GET", "/api/comments/abc/likes", "1.2.3.4", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["reason"], json!("InvalidCommentId"));

    let (status, json) = call(&router, "GET", "/api/comments/42/likes", "1.2.3.4", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["reason"], json!("CommentNotFound"));
}

#[tokio::test]
async fn comments_listed_newest_first() {
    let router = setup();

    let first = post_comment(&router, "ann", "first comment").await;
    let second = post_comment(&router, "bob", "second comment").await;

    let (status, json) = call(&router, "GET", "/api/comments", "1.2.3.4", None).await;
    assert_eq!(status, StatusCode::OK);

    let ids: Vec<_> = json["comments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].clone())
        .collect();
    assert_eq!(ids, [second["id"].clone(), first["id"].clone()]);
}

#[tokio::test]
async fn comment_is_sanitized() {
    let router = setup();

    let comment = post_comment(&router, " ann!! ", "  <b>bold</b> claim ").await;

    assert_eq!(comment["username"], json!("ann"));
    assert_eq!(comment["text"], json!("&lt;b&gt;bold&lt;/b&gt; claim"));
    assert!(comment["created_at"].is_string());
}

#[tokio::test]
async fn comment_rejections() {
    let router = setup();

    let cases = [
        (json!({ "username": "a", "text": "hello world" }), "Invalid username (2-20 chars)"),
        (json!({ "username": "ann", "text": "hey" }), "Invalid comment (5-500 chars)"),
        (json!({ "username": "!!!", "text": "hello world" }), "Username contains invalid characters"),
        (json!({}), "Invalid username (2-20 chars)"),
    ];

    for (body, message) in cases {
        let (status, json) =
            call(&router, "POST", "/api/comments", "1.2.3.4", Some(&body.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({ "error": message }));
    }
}

#[tokio::test]
async fn unknown_route() {
    let router = setup();

    let (status, json) = call(&router, "GET", "/api/nope", "1.2.3.4", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json, json!({ "error": "Not Found" }));
}

#[tokio::test]
async fn cors_headers() {
    let router = setup();

    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/api/comments/like")
        .header(header::ORIGIN, ORIGIN)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = router.clone().oneshot(preflight).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], ORIGIN);
    assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
    assert!(
        headers[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap()
            .contains("POST")
    );

    let get = Request::builder()
        .uri("/api/comments")
        .header(header::ORIGIN, ORIGIN)
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(get).await.unwrap();
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], ORIGIN);
}

struct Broken;

#[async_trait]
impl Backend for Broken {
    async fn list_comments(&self, _limit: usize) -> Result<Vec<Comment>, StoreError> {
        Err(StoreError::Poisoned)
    }

    async fn add_comment(
        &self,
        _comment: &NewComment,
        _created_at: DateTime<Utc>,
    ) -> Result<Comment, StoreError> {
        Err(StoreError::Poisoned)
    }

    async fn like_count(&self, _id: CommentId) -> Result<Option<u64>, StoreError> {
        Err(StoreError::Poisoned)
    }

    async fn has_liked(&self, _id: CommentId, _client: &ClientId) -> Result<bool, StoreError> {
        Err(StoreError::Poisoned)
    }

    async fn record_like(
        &self,
        _id: CommentId,
        _client: &ClientId,
    ) -> Result<LikeRecorded, StoreError> {
        Err(StoreError::Poisoned)
    }
}

#[tokio::test]
async fn storage_failures() {
    let router = setup_with(Arc::new(Broken));
    let internal = json!({ "error": "Internal Server Error" });

    let (status, body) = call(&router, "GET", "/api/comments/1/likes", "1.2.3.4", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, internal);

    let (status, body) = call(&router, "GET", "/api/comments", "1.2.3.4", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, internal);

    let like = json!({ "commentId": 1 }).to_string();
    let (status, body) = call(&router, "POST", "/api/comments/like", "1.2.3.4", Some(&like)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["reason"], json!("StorageFailure"));
    assert_eq!(body["recorded"], json!(false));
}
