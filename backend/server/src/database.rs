//! # Redis
//!
//! RAM database, the alternative [Backend] for deployments that already run Redis.
//!
//! ## Keys
//!
//! - `comments:next_id`: counter, `INCR` hands out comment ids
//! - `comment:{id}`: hash of `username`, `text`, `likes`, `created_at`
//! - `comments:timeline`: sorted set of ids scored by the id itself. Ids only grow, so score
//!   order is creation order even for comments posted within the same millisecond
//! - `comment:{id}:likers`: set of client ids that liked the comment
//!
//! ## Likes
//!
//! Set membership is the uniqueness constraint: `SADD` answers 0 when the client is already in
//! the set. The existence check, the `SADD` and the `HINCRBY` run as one Lua script, and Redis
//! runs scripts atomically, so the count can never drift from the size of the likers set.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::info;

use crate::{
    comments::NewComment,
    identity::ClientId,
    storage::{Backend, Comment, CommentId, LikeRecorded, StoreError},
};

const NEXT_ID: &str = "comments:next_id";
const TIMELINE: &str = "comments:timeline";

const USERNAME: &str = "username";
const TEXT: &str = "text";
const LIKES: &str = "likes";
const CREATED_AT: &str = "created_at";

const NO_SUCH_COMMENT: i64 = -1;
const DUPLICATE: i64 = -2;

const RECORD_LIKE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end
if redis.call('SADD', KEYS[2], ARGV[1]) == 0 then
    return -2
end
return redis.call('HINCRBY', KEYS[1], 'likes', 1)
"#;

fn comment_key(id: CommentId) -> String {
    format!("comment:{id}")
}

fn likers_key(id: CommentId) -> String {
    format!("comment:{id}:likers")
}

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

pub struct RedisBackend {
    connection: ConnectionManager,
    record_like: Script,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let connection = init_redis(redis_url).await?;
        info!("Connected to Redis");

        Ok(Self {
            connection,
            record_like: Script::new(RECORD_LIKE),
        })
    }
}

fn from_hash(id: i64, mut hash: HashMap<String, String>) -> Result<Comment, StoreError> {
    let mut field = |name: &str| {
        hash.remove(name)
            .ok_or_else(|| StoreError::Corrupt(format!("comment {id} has no {name}")))
    };

    let username = field(USERNAME)?;
    let text = field(TEXT)?;
    let likes = field(LIKES)?;
    let created_at = field(CREATED_AT)?;

    Ok(Comment {
        id: CommentId::new(id).map_err(|_| StoreError::Corrupt(format!("comment id {id}")))?,
        username,
        text,
        likes: likes
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("likes of {id}: {e}")))?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::Corrupt(format!("created_at of {id}: {e}")))?
            .with_timezone(&Utc),
    })
}

#[async_trait]
impl Backend for RedisBackend {
    async fn list_comments(&self, limit: usize) -> Result<Vec<Comment>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut connection = self.connection.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let ids: Vec<i64> = connection.zrevrange(TIMELINE, 0, stop).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for &id in &ids {
            pipe.hgetall(format!("comment:{id}"));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut connection).await?;

        ids.into_iter()
            .zip(hashes)
            .filter(|(_, hash)| !hash.is_empty())
            .map(|(id, hash)| from_hash(id, hash))
            .collect()
    }

    async fn add_comment(
        &self,
        comment: &NewComment,
        created_at: DateTime<Utc>,
    ) -> Result<Comment, StoreError> {
        let mut connection = self.connection.clone();

        let id: i64 = connection.incr(NEXT_ID, 1).await?;
        let id = CommentId::new(id).map_err(|_| StoreError::Corrupt(format!("next id {id}")))?;
        let timestamp = created_at.to_rfc3339_opts(SecondsFormat::Micros, true);

        let () = redis::pipe()
            .atomic()
            .hset_multiple(
                comment_key(id),
                &[
                    (USERNAME, comment.username.as_str()),
                    (TEXT, comment.text.as_str()),
                    (LIKES, "0"),
                    (CREATED_AT, timestamp.as_str()),
                ],
            )
            .ignore()
            .zadd(TIMELINE, id.get(), id.get())
            .ignore()
            .query_async(&mut connection)
            .await?;

        Ok(Comment {
            id,
            username: comment.username.clone(),
            text: comment.text.clone(),
            likes: 0,
            created_at,
        })
    }

    async fn like_count(&self, id: CommentId) -> Result<Option<u64>, StoreError> {
        let mut connection = self.connection.clone();
        let likes: Option<u64> = connection.hget(comment_key(id), LIKES).await?;

        Ok(likes)
    }

    async fn has_liked(&self, id: CommentId, client: &ClientId) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let liked: bool = connection.sismember(likers_key(id), client.as_str()).await?;

        Ok(liked)
    }

    async fn record_like(
        &self,
        id: CommentId,
        client: &ClientId,
    ) -> Result<LikeRecorded, StoreError> {
        let mut connection = self.connection.clone();

        let code: i64 = self
            .record_like
            .key(comment_key(id))
            .key(likers_key(id))
            .arg(client.as_str())
            .invoke_async(&mut connection)
            .await?;

        match code {
            NO_SUCH_COMMENT => Ok(LikeRecorded::NoSuchComment),
            DUPLICATE => Ok(LikeRecorded::Duplicate),
            likes => u64::try_from(likes)
                .map(LikeRecorded::Counted)
                .map_err(|_| StoreError::Corrupt(format!("like script returned {likes}"))),
        }
    }
}
