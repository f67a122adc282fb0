//! Redis pub/sub live-update channel (optional).
//!
//! Pub/sub is not durable: updates published while nobody listens are lost,
//! which is acceptable for progress notifications.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use brandkit_agent::{LiveChannel, LiveUpdate, SinkError};

/// Publishes each update on `brandkit:live:<session_id>`.
#[derive(Clone)]
pub struct RedisLiveChannel {
    conn: MultiplexedConnection,
}

impl RedisLiveChannel {
    pub async fn connect(redis_url: &str) -> Result<Self, SinkError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SinkError::new("live channel", e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SinkError::new("live channel", e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn channel_for(session_id: &str) -> String {
        format!("brandkit:live:{session_id}")
    }
}

#[async_trait]
impl LiveChannel for RedisLiveChannel {
    async fn publish(&self, update: LiveUpdate) -> Result<(), SinkError> {
        let payload = serde_json::to_string(&update)
            .map_err(|e| SinkError::new("live channel", e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .publish(Self::channel_for(update.session_id()), payload)
            .await
            .map_err(|e| SinkError::new("live channel", e.to_string()))?;
        Ok(())
    }
}
