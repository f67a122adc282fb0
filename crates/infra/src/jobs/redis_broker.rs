//! Redis-backed job broker (optional).
//!
//! Layout per queue `q`:
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `brandkit:job:<id>` | string | JSON job record, created with `SET NX` |
//! | `brandkit:queue:<q>:waiting` | sorted set | ids scored by priority, then creation time |
//! | `brandkit:queue:<q>:delayed` | sorted set | ids scored by ready-at millis |
//! | `brandkit:queue:<q>:active` | set | claimed ids |
//! | `brandkit:queue:<q>:completed` / `:failed` | sorted set | ids scored by finish millis |
//!
//! `SET NX` on the job key is the de-duplication point: a second enqueue with
//! the same id never touches the queue sets. `ZPOPMIN` on the waiting set makes
//! a claim exclusive across workers; `ZREM` returning 1 makes promotion of a
//! delayed job exclusive.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use brandkit_agent::ProgressUpdate;

use super::broker::{BrokerError, EnqueueOutcome, JobBroker, QueueCounts};
use super::registry::Queue;
use super::types::{Job, JobId, JobState};

/// Width reserved for the creation timestamp inside a waiting-set score.
const PRIORITY_STRIDE: f64 = 1e13;

#[derive(Clone)]
pub struct RedisJobBroker {
    conn: MultiplexedConnection,
}

impl RedisJobBroker {
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| map_redis_error("connect", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_redis_error("connect", e))?;
        Ok(Self { conn })
    }

    fn job_key(id: &JobId) -> String {
        format!("brandkit:job:{id}")
    }

    fn set_key(queue: Queue, set: &str) -> String {
        format!("brandkit:queue:{}:{set}", queue.name())
    }

    fn waiting_score(job: &Job) -> f64 {
        f64::from(job.priority) * PRIORITY_STRIDE + job.created_at.timestamp_millis() as f64
    }

    async fn load(&self, id: &JobId) -> Result<Option<Job>, BrokerError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::job_key(id))
            .await
            .map_err(|e| map_redis_error("load", e))?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| BrokerError::Serialization(e.to_string())))
            .transpose()
    }

    async fn save(&self, job: &Job) -> Result<(), BrokerError> {
        let json =
            serde_json::to_string(job).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(Self::job_key(&job.id), json)
            .await
            .map_err(|e| map_redis_error("save", e))?;
        Ok(())
    }

    async fn load_active(&self, id: &JobId) -> Result<Job, BrokerError> {
        let job = self
            .load(id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(id.clone()))?;
        if job.state != JobState::Active {
            return Err(BrokerError::NotActive {
                id: id.clone(),
                state: job.state,
            });
        }
        Ok(job)
    }

    /// Move delayed jobs whose ready-at has passed into the waiting set.
    async fn promote_due(&self, queue: Queue) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let delayed = Self::set_key(queue, "delayed");
        let due: Vec<String> = conn
            .zrangebyscore(&delayed, "-inf", Utc::now().timestamp_millis())
            .await
            .map_err(|e| map_redis_error("promote", e))?;

        for raw_id in due {
            let removed: i64 = conn
                .zrem(&delayed, &raw_id)
                .await
                .map_err(|e| map_redis_error("promote", e))?;
            if removed == 0 {
                continue;
            }
            let id = JobId::from(raw_id);
            let Some(mut job) = self.load(&id).await? else {
                continue;
            };
            job.state = JobState::Waiting;
            job.ready_at = None;
            self.save(&job).await?;
            let _: () = conn
                .zadd(Self::set_key(queue, "waiting"), id.as_str(), Self::waiting_score(&job))
                .await
                .map_err(|e| map_redis_error("promote", e))?;
            debug!(queue = %queue, job_id = %id, "promoted delayed job");
        }
        Ok(())
    }
}

#[async_trait]
impl JobBroker for RedisJobBroker {
    #[instrument(skip(self, job), fields(queue = %job.queue, job_id = %job.id), err)]
    async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome, BrokerError> {
        let json =
            serde_json::to_string(&job).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();

        let created: bool = conn
            .set_nx(Self::job_key(&job.id), json)
            .await
            .map_err(|e| map_redis_error("enqueue", e))?;
        if !created {
            return Ok(EnqueueOutcome::Duplicate(job.id));
        }

        let _: () = match (job.state, job.ready_at) {
            (JobState::Delayed, Some(ready_at)) => conn
                .zadd(
                    Self::set_key(job.queue, "delayed"),
                    job.id.as_str(),
                    ready_at.timestamp_millis(),
                )
                .await,
            _ => conn
                .zadd(
                    Self::set_key(job.queue, "waiting"),
                    job.id.as_str(),
                    Self::waiting_score(&job),
                )
                .await,
        }
        .map_err(|e| map_redis_error("enqueue", e))?;

        Ok(EnqueueOutcome::Created(job.id))
    }

    #[instrument(skip(self), fields(queue = %queue), err)]
    async fn claim_next(&self, queue: Queue) -> Result<Option<Job>, BrokerError> {
        self.promote_due(queue).await?;

        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
            .arg(Self::set_key(queue, "waiting"))
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("claim_next", e))?;

        let Some((raw_id, _)) = popped.into_iter().next() else {
            return Ok(None);
        };
        let id = JobId::from(raw_id);
        let Some(mut job) = self.load(&id).await? else {
            return Ok(None);
        };

        job.mark_active();
        self.save(&job).await?;
        let _: () = conn
            .sadd(Self::set_key(queue, "active"), id.as_str())
            .await
            .map_err(|e| map_redis_error("claim_next", e))?;
        Ok(Some(job))
    }

    #[instrument(skip(self, result), fields(job_id = %id), err)]
    async fn complete(&self, id: &JobId, result: JsonValue) -> Result<Job, BrokerError> {
        let mut job = self.load_active(id).await?;
        job.mark_completed(result);
        self.save(&job).await?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .srem(Self::set_key(job.queue, "active"), id.as_str())
            .await
            .map_err(|e| map_redis_error("complete", e))?;
        let _: () = conn
            .zadd(
                Self::set_key(job.queue, "completed"),
                id.as_str(),
                Utc::now().timestamp_millis(),
            )
            .await
            .map_err(|e| map_redis_error("complete", e))?;
        Ok(job)
    }

    #[instrument(skip(self, error), fields(job_id = %id, retryable), err)]
    async fn fail(&self, id: &JobId, error: &str, retryable: bool) -> Result<Job, BrokerError> {
        let mut job = self.load_active(id).await?;
        job.mark_failed(error.to_string(), retryable);
        self.save(&job).await?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .srem(Self::set_key(job.queue, "active"), id.as_str())
            .await
            .map_err(|e| map_redis_error("fail", e))?;
        let (set, score) = match (job.state, job.ready_at) {
            (JobState::Delayed, Some(ready_at)) => ("delayed", ready_at.timestamp_millis()),
            _ => ("failed", Utc::now().timestamp_millis()),
        };
        let _: () = conn
            .zadd(Self::set_key(job.queue, set), id.as_str(), score)
            .await
            .map_err(|e| map_redis_error("fail", e))?;
        Ok(job)
    }

    async fn update_progress(
        &self,
        id: &JobId,
        progress: &ProgressUpdate,
    ) -> Result<(), BrokerError> {
        // Last writer wins; progress is advisory.
        let mut job = self
            .load(id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(id.clone()))?;
        job.progress = progress.percent;
        if let Some(tool) = &progress.last_tool {
            job.last_tool = Some(tool.clone());
        }
        job.updated_at = Utc::now();
        self.save(&job).await
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, BrokerError> {
        self.load(id).await
    }

    async fn counts(&self, queue: Queue) -> Result<QueueCounts, BrokerError> {
        let mut conn = self.conn.clone();
        let map = |e| map_redis_error("counts", e);
        Ok(QueueCounts {
            waiting: conn.zcard(Self::set_key(queue, "waiting")).await.map_err(map)?,
            active: conn.scard(Self::set_key(queue, "active")).await.map_err(map)?,
            completed: conn.zcard(Self::set_key(queue, "completed")).await.map_err(map)?,
            failed: conn.zcard(Self::set_key(queue, "failed")).await.map_err(map)?,
            delayed: conn.zcard(Self::set_key(queue, "delayed")).await.map_err(map)?,
        })
    }

    #[instrument(skip(self), fields(queue = %queue), err)]
    async fn trim(&self, queue: Queue) -> Result<usize, BrokerError> {
        let retention = queue.config().retention;
        let mut conn = self.conn.clone();
        let mut removed = 0;

        for (set, keep) in [
            ("completed", retention.keep_completed),
            ("failed", retention.keep_failed),
        ] {
            let key = Self::set_key(queue, set);
            let count: usize = conn.zcard(&key).await.map_err(|e| map_redis_error("trim", e))?;
            if count <= keep {
                continue;
            }
            let excess = (count - keep) as isize;
            // Ascending score: oldest first.
            let stale: Vec<String> = conn
                .zrange(&key, 0, excess - 1)
                .await
                .map_err(|e| map_redis_error("trim", e))?;
            for raw_id in stale {
                let _: () = conn
                    .zrem(&key, &raw_id)
                    .await
                    .map_err(|e| map_redis_error("trim", e))?;
                let _: () = conn
                    .del(Self::job_key(&JobId::from(raw_id)))
                    .await
                    .map_err(|e| map_redis_error("trim", e))?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> BrokerError {
    BrokerError::Unavailable(format!("redis error in {operation}: {err}"))
}
