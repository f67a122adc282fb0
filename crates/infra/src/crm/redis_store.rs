//! Redis token store (optional). Entries expire with the token itself.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::token::{CrmToken, TokenStore, TokenStoreError};

#[derive(Clone)]
pub struct RedisTokenStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisTokenStore {
    pub async fn connect(redis_url: &str) -> Result<Self, TokenStoreError> {
        let client = redis::Client::open(redis_url).map_err(map_redis_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        Ok(Self {
            conn,
            prefix: "brandkit:crm-token".to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, key: &str) -> Result<Option<CrmToken>, TokenStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(key)).await.map_err(map_redis_error)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let token: CrmToken = serde_json::from_str(&raw)
            .map_err(|e| TokenStoreError::Serialization(e.to_string()))?;
        if token.expires_within(Utc::now(), chrono::Duration::zero()) {
            return Ok(None);
        }
        Ok(Some(token))
    }

    async fn put(&self, key: &str, token: &CrmToken) -> Result<(), TokenStoreError> {
        let ttl = (token.expires_at - Utc::now()).num_seconds();
        if ttl <= 0 {
            return Ok(());
        }
        let raw =
            serde_json::to_string(token).map_err(|e| TokenStoreError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.key(key), raw, ttl as u64)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), TokenStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(key)).await.map_err(map_redis_error)?;
        Ok(())
    }
}

fn map_redis_error(err: redis::RedisError) -> TokenStoreError {
    TokenStoreError::Storage(err.to_string())
}
