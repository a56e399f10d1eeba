//! Comments and likes backend for a static site.
//!
//! # General Infrastructure
//! - Site is static, this server only answers `/api/comments*`
//! - Sits behind Cloudflare, which puts the real client address in `CF-Connecting-IP`
//! - One store, SQLite by default, Redis if `STORE_URL` is a `redis://` url
//!
//!
//!
//! # Likes
//!
//! **Goal**: one like per visitor per comment, without accounts.
//!
//! - A visitor is the hash of their address and user agent, see [identity]
//! - The store decides whether a like is new, see [ledger]
//! - The count only ever moves by an in-store `+ 1`, never read-modify-write in here
//! - A repeated like is rejected with `AlreadyLiked` and changes nothing, so clients can retry
//!
//!
//!
//! # Routes
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | GET | `/api/comments` | |
//! | POST | `/api/comments` | `{"username": "...", "text": "..."}` |
//! | POST | `/api/comments/like` | `{"commentId": 1}` |
//! | GET | `/api/comments/{id}/likes` | |
//!
//!
//!
//! # Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `RUST_PORT` | `1111` |
//! | `STORE_URL` | `comments.db` |
//! | `ALLOWED_ORIGIN` | `https://worldoftech.qzz.io` |
//! | `CLIENT_IP_HEADER` | `CF-Connecting-IP` |
//! | `COMMENTS_LIMIT` | `50` |
//! | `RUST_LOG` | |
//!
//!
//!
//! # Setup
//!
//! Run locally against a throwaway database.
//! ```sh
//! STORE_URL=:memory: RUST_LOG=info cargo run -p comments
//! ```
//!
//! Hammer a running server with duplicate likes.
//! ```sh
//! cargo run -p tester -- --comment-id 1 --requests 100
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod comments;
pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod routes;
pub mod sqlite;
pub mod state;
pub mod storage;
pub mod utils;

use config::Config;
use routes::{
    like_count_handler, like_handler, list_comments_handler, not_found_handler,
    post_comment_handler,
};
use state::State;

const CORS_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24);

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config).await.context("Failed to open store")?;

    info!("Starting server...");
    let app = router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

pub fn router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(state.config.allowed_origin.clone())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(CORS_MAX_AGE);

    Router::new()
        .route(
            "/api/comments",
            get(list_comments_handler).post(post_comment_handler),
        )
        .route("/api/comments/like", post(like_handler))
        .route("/api/comments/{id}/likes", get(like_count_handler))
        .fallback(not_found_handler)
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
