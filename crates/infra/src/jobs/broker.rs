//! Job broker abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;

use brandkit_agent::ProgressUpdate;

use super::registry::Queue;
use super::types::{Job, JobId, JobState};

/// Result of an enqueue; a duplicate id leaves the existing job untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(JobId),
    Duplicate(JobId),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> &JobId {
        match self {
            EnqueueOutcome::Created(id) | EnqueueOutcome::Duplicate(id) => id,
        }
    }
}

/// Per-state job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id} is {state:?}, expected active")]
    NotActive { id: JobId, state: JobState },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Durable, priority-ordered job queues.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Store a new job. De-duplicates by job id.
    async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome, BrokerError>;

    /// Claim the highest-priority ready job of `queue`, promoting delayed jobs
    /// whose time has come first.
    async fn claim_next(&self, queue: Queue) -> Result<Option<Job>, BrokerError>;

    async fn complete(&self, id: &JobId, result: JsonValue) -> Result<Job, BrokerError>;

    /// Record a failed attempt. Returns the job in its new state.
    async fn fail(&self, id: &JobId, error: &str, retryable: bool) -> Result<Job, BrokerError>;

    async fn update_progress(
        &self,
        id: &JobId,
        progress: &ProgressUpdate,
    ) -> Result<(), BrokerError>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>, BrokerError>;

    async fn counts(&self, queue: Queue) -> Result<QueueCounts, BrokerError>;

    /// Drop the oldest completed/failed jobs beyond the queue's retention.
    /// Returns how many were removed.
    async fn trim(&self, queue: Queue) -> Result<usize, BrokerError>;
}

#[async_trait]
impl<B: JobBroker + ?Sized> JobBroker for Arc<B> {
    async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome, BrokerError> {
        (**self).enqueue(job).await
    }

    async fn claim_next(&self, queue: Queue) -> Result<Option<Job>, BrokerError> {
        (**self).claim_next(queue).await
    }

    async fn complete(&self, id: &JobId, result: JsonValue) -> Result<Job, BrokerError> {
        (**self).complete(id, result).await
    }

    async fn fail(&self, id: &JobId, error: &str, retryable: bool) -> Result<Job, BrokerError> {
        (**self).fail(id, error, retryable).await
    }

    async fn update_progress(
        &self,
        id: &JobId,
        progress: &ProgressUpdate,
    ) -> Result<(), BrokerError> {
        (**self).update_progress(id, progress).await
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, BrokerError> {
        (**self).get(id).await
    }

    async fn counts(&self, queue: Queue) -> Result<QueueCounts, BrokerError> {
        (**self).counts(queue).await
    }

    async fn trim(&self, queue: Queue) -> Result<usize, BrokerError> {
        (**self).trim(queue).await
    }
}

/// In-memory broker for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobBroker {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_active<T>(
        &self,
        id: &JobId,
        f: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, BrokerError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(id.clone()))?;
        if job.state != JobState::Active {
            return Err(BrokerError::NotActive {
                id: id.clone(),
                state: job.state,
            });
        }
        Ok(f(job))
    }
}

#[async_trait]
impl JobBroker for InMemoryJobBroker {
    async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome, BrokerError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Ok(EnqueueOutcome::Duplicate(job.id));
        }
        let id = job.id.clone();
        jobs.insert(id.clone(), job);
        Ok(EnqueueOutcome::Created(id))
    }

    async fn claim_next(&self, queue: Queue) -> Result<Option<Job>, BrokerError> {
        let mut jobs = self.jobs.write().unwrap();
        let now = Utc::now();

        // Lowest priority value first, then FIFO.
        let next = jobs
            .values()
            .filter(|j| j.queue == queue && j.is_ready(now))
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|j| j.id.clone());

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_active();
                job.clone()
            })
        }))
    }

    async fn complete(&self, id: &JobId, result: JsonValue) -> Result<Job, BrokerError> {
        self.with_active(id, |job| {
            job.mark_completed(result);
            job.clone()
        })
    }

    async fn fail(&self, id: &JobId, error: &str, retryable: bool) -> Result<Job, BrokerError> {
        self.with_active(id, |job| {
            job.mark_failed(error.to_string(), retryable);
            job.clone()
        })
    }

    async fn update_progress(
        &self,
        id: &JobId,
        progress: &ProgressUpdate,
    ) -> Result<(), BrokerError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(id.clone()))?;
        job.progress = progress.percent;
        if let Some(tool) = &progress.last_tool {
            job.last_tool = Some(tool.clone());
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, BrokerError> {
        Ok(self.jobs.read().unwrap().get(id).cloned())
    }

    async fn counts(&self, queue: Queue) -> Result<QueueCounts, BrokerError> {
        let jobs = self.jobs.read().unwrap();
        let mut counts = QueueCounts::default();
        for job in jobs.values().filter(|j| j.queue == queue) {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Delayed => counts.delayed += 1,
            }
        }
        Ok(counts)
    }

    async fn trim(&self, queue: Queue) -> Result<usize, BrokerError> {
        let retention = queue.config().retention;
        let mut jobs = self.jobs.write().unwrap();
        let mut removed = 0;

        for (state, keep) in [
            (JobState::Completed, retention.keep_completed),
            (JobState::Failed, retention.keep_failed),
        ] {
            let mut finished: Vec<_> = jobs
                .values()
                .filter(|j| j.queue == queue && j.state == state)
                .map(|j| (j.finished_at, j.id.clone()))
                .collect();
            if finished.len() <= keep {
                continue;
            }
            // Newest first; everything past `keep` goes.
            finished.sort_by(|a, b| b.cmp(a));
            for (_, id) in finished.into_iter().skip(keep) {
                jobs.remove(&id);
                removed += 1;
            }
        }

        Ok(removed)
    }
}
