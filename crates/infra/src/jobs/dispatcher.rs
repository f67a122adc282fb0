//! Admission of new jobs: queue lookup, payload validation, enqueue.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::broker::{BrokerError, EnqueueOutcome, JobBroker};
use super::registry::{PayloadError, Queue};
use super::types::{DispatchOptions, Job, JobId};

/// Highest accepted explicit priority.
pub const MAX_PRIORITY: u32 = 1_000;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown queue '{name}'; valid queues: {}", .valid.join(", "))]
    UnknownQueue {
        name: String,
        valid: Vec<&'static str>,
    },

    #[error(transparent)]
    Validation(#[from] PayloadError),

    #[error("invalid dispatch options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Where a dispatched job landed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    pub job_id: JobId,
    pub queue: Queue,
}

/// Validates and enqueues jobs.
#[derive(Clone)]
pub struct JobDispatcher {
    broker: Arc<dyn JobBroker>,
}

impl JobDispatcher {
    pub fn new(broker: Arc<dyn JobBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn JobBroker> {
        &self.broker
    }

    /// Dispatch by queue name.
    ///
    /// Unknown names and invalid payloads fail before anything is enqueued.
    /// Broker errors are returned as they are.
    pub async fn dispatch(
        &self,
        queue_name: &str,
        payload: JsonValue,
        options: DispatchOptions,
    ) -> Result<DispatchReceipt, DispatchError> {
        let queue = queue_name
            .parse::<Queue>()
            .map_err(|_| DispatchError::UnknownQueue {
                name: queue_name.to_string(),
                valid: Queue::names(),
            })?;
        self.dispatch_to(queue, payload, options).await
    }

    #[instrument(skip(self, payload, options), fields(queue = %queue), err)]
    pub async fn dispatch_to(
        &self,
        queue: Queue,
        payload: JsonValue,
        options: DispatchOptions,
    ) -> Result<DispatchReceipt, DispatchError> {
        queue.validate(&payload)?;

        let job_id = match options.job_id {
            Some(id) if id.trim().is_empty() => {
                return Err(DispatchError::InvalidOptions("job id must not be empty".into()));
            }
            Some(id) => JobId::from(id),
            None => JobId::generate(queue),
        };
        let priority = match options.priority {
            Some(p) if p > MAX_PRIORITY => {
                return Err(DispatchError::InvalidOptions(format!(
                    "priority {p} exceeds {MAX_PRIORITY}"
                )));
            }
            Some(p) => p,
            None => queue.config().priority,
        };

        let mut job = Job::new(job_id, queue, payload, priority);
        if let Some(delay) = options.delay {
            job = job.delayed(delay).ok_or_else(|| {
                DispatchError::InvalidOptions(format!("delay of {}s is out of range", delay.as_secs()))
            })?;
        }

        match self.broker.enqueue(job).await? {
            EnqueueOutcome::Created(job_id) => {
                info!(queue = %queue, job_id = %job_id, priority, "job dispatched");
                Ok(DispatchReceipt { job_id, queue })
            }
            EnqueueOutcome::Duplicate(job_id) => {
                debug!(queue = %queue, job_id = %job_id, "job id already queued; not enqueued again");
                Ok(DispatchReceipt { job_id, queue })
            }
        }
    }
}
