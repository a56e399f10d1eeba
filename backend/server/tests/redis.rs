//! Ledger properties against a live Redis. Runs only when `REDIS_URL` is set, e.g.
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis`.
use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use server::{
    comments::NewComment,
    database::RedisBackend,
    identity::derive,
    ledger::{LikeError, LikeLedger},
    storage::{Backend, CommentId},
};
use tokio::task::JoinSet;

async fn setup() -> Option<(LikeLedger, Arc<RedisBackend>, CommentId)> {
    let Ok(url) = std::env::var("REDIS_URL") else {
        eprintln!("REDIS_URL not set, skipping");
        return None;
    };

    let store = Arc::new(RedisBackend::connect(&url).await.unwrap());
    let comment = store
        .add_comment(
            &NewComment {
                username: "ann".to_string(),
                text: "first comment".to_string(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    Some((LikeLedger::new(store.clone()), store, comment.id))
}

fn client(n: usize) -> String {
    derive(Some(&format!("10.0.0.{n}")), Some("Mozilla/5.0")).to_string()
}

#[tokio::test]
async fn like_then_duplicate_then_other_client() {
    let Some((ledger, store, id)) = setup().await else {
        return;
    };

    assert_eq!(store.like_count(id).await.unwrap(), Some(0));
    assert_eq!(ledger.like(id.get(), &client(1)).await.unwrap(), 1);
    assert!(
        store
            .has_liked(id, &derive(Some("10.0.0.1"), Some("Mozilla/5.0")))
            .await
            .unwrap()
    );

    assert!(matches!(
        ledger.like(id.get(), &client(1)).await,
        Err(LikeError::AlreadyLiked)
    ));
    assert_eq!(store.like_count(id).await.unwrap(), Some(1));

    assert_eq!(ledger.like(id.get(), &client(2)).await.unwrap(), 2);
    assert_eq!(ledger.like_count(id.get()).await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_count_once() {
    let Some((ledger, _store, id)) = setup().await else {
        return;
    };
    let n = 32;

    let mut tasks = JoinSet::new();
    for _ in 0..n {
        let ledger = ledger.clone();
        tasks.spawn(async move { ledger.like(id.get(), &client(1)).await });
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(likes) => {
                assert_eq!(likes, 1);
                succeeded += 1;
            }
            Err(LikeError::AlreadyLiked) => rejected += 1,
            Err(err) => panic!("unexpected {err:?}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(rejected, n - 1);
    assert_eq!(ledger.like_count(id.get()).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_lose_no_updates() {
    let Some((ledger, _store, id)) = setup().await else {
        return;
    };
    let n = 32;

    let mut tasks = JoinSet::new();
    for i in 0..n {
        let ledger = ledger.clone();
        tasks.spawn(async move { ledger.like(id.get(), &client(i)).await });
    }

    let mut counts = HashSet::new();
    while let Some(result) = tasks.join_next().await {
        counts.insert(result.unwrap().unwrap());
    }

    assert_eq!(counts, (1..=n as u64).collect());
    assert_eq!(ledger.like_count(id.get()).await.unwrap(), n as u64);
}

#[tokio::test]
async fn missing_comment() {
    let Some((ledger, store, _id)) = setup().await else {
        return;
    };
    let missing = CommentId::new(999_999_999).unwrap();

    assert!(matches!(
        ledger.like(missing.get(), &client(1)).await,
        Err(LikeError::CommentNotFound)
    ));
    assert!(matches!(
        ledger.like_count(missing.get()).await,
        Err(LikeError::CommentNotFound)
    ));
    assert_eq!(store.like_count(missing).await.unwrap(), None);
}

#[tokio::test]
async fn same_instant_comments_list_newest_first() {
    let Some((_ledger, store, _id)) = setup().await else {
        return;
    };
    let username = format!("u{}", Utc::now().timestamp_micros());
    let created_at = Utc::now();

    let mut ids = Vec::new();
    for i in 0..12 {
        let comment = store
            .add_comment(
                &NewComment {
                    username: username.clone(),
                    text: format!("comment number {i}"),
                },
                created_at,
            )
            .await
            .unwrap();
        ids.push(comment.id.get());
    }

    let listed: Vec<i64> = store
        .list_comments(1000)
        .await
        .unwrap()
        .into_iter()
        .filter(|comment| comment.username == username)
        .map(|comment| comment.id.get())
        .collect();

    ids.reverse();
    assert_eq!(listed, ids);
}
