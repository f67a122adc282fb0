//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::registry::Queue;

/// Job identifier.
///
/// Generated ids are `<queue>-<uuid v7>`; callers may supply their own id to
/// make a dispatch idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate(queue: Queue) -> Self {
        Self(format!("{}-{}", queue.name(), Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be claimed
    Waiting,
    /// Claimed by a worker
    Active,
    /// Finished successfully
    Completed,
    /// Exhausted its attempts or failed fatally
    Failed,
    /// Waiting for its ready-at time (initial delay or retry backoff)
    Delayed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,
    /// `base * 2^(attempt - 1)`
    #[default]
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between attempts
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay to wait after `attempt` (1-indexed) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2_u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Caller options for a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Explicit id; dispatching the same id twice yields one job.
    pub job_id: Option<String>,
    /// Lower values are claimed first. Defaults to the queue's priority.
    pub priority: Option<u32>,
    /// Delay before the job becomes claimable.
    pub delay: Option<Duration>,
}

impl DispatchOptions {
    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: Queue,
    /// Validated JSON payload
    pub payload: JsonValue,
    pub priority: u32,
    pub state: JobState,
    /// Attempts started so far
    pub attempts_made: u32,
    /// In-flight progress, 0-100
    pub progress: u8,
    pub last_tool: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When a delayed job becomes claimable
    pub ready_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub return_value: Option<JsonValue>,
}

impl Job {
    pub fn new(id: JobId, queue: Queue, payload: JsonValue, priority: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            queue,
            payload,
            priority,
            state: JobState::Waiting,
            attempts_made: 0,
            progress: 0,
            last_tool: None,
            created_at: now,
            updated_at: now,
            ready_at: None,
            finished_at: None,
            failed_reason: None,
            return_value: None,
        }
    }

    /// Hold the job back for `delay` before it can be claimed. `None` when the
    /// release time is not representable.
    pub fn delayed(mut self, delay: Duration) -> Option<Self> {
        if !delay.is_zero() {
            self.ready_at = Some(offset(self.created_at, delay)?);
            self.state = JobState::Delayed;
        }
        Some(self)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Waiting => true,
            JobState::Delayed => self.ready_at.is_none_or(|at| now >= at),
            _ => false,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.queue.config().retry
    }

    pub fn mark_active(&mut self) {
        self.state = JobState::Active;
        self.attempts_made += 1;
        self.ready_at = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self, result: JsonValue) {
        let now = Utc::now();
        self.state = JobState::Completed;
        self.progress = 100;
        self.return_value = Some(result);
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed attempt; schedules a retry while the queue's policy
    /// allows one and `retryable` is set.
    pub fn mark_failed(&mut self, error: String, retryable: bool) {
        let now = Utc::now();
        self.updated_at = now;
        self.failed_reason = Some(error);

        let policy = self.retry_policy();
        if retryable && policy.should_retry(self.attempts_made) {
            let delay = policy.delay_for_attempt(self.attempts_made);
            self.state = JobState::Delayed;
            self.ready_at = Some(offset(now, delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
        } else {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
        }
    }
}

fn offset(at: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
}

/// Outcome a handler reports for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Success(JsonValue),
    /// Transient failure; retried according to the queue's policy
    Failure(String),
    /// Permanent failure; remaining attempts are skipped
    Fatal(String),
}
