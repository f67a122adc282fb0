//! Background jobs: queue registry, admission, brokers and the worker pool.
//!
//! ## Design
//!
//! - Queues are a closed enum with compiled-in concurrency, timeout,
//!   priority, retry and retention policy
//! - Payloads are validated against typed schemas before anything is enqueued
//! - Brokers de-duplicate by job id, so an explicit id makes dispatch idempotent
//! - Broker errors reach the caller unchanged
//!
//! ## Components
//!
//! - `JobDispatcher`: validates and enqueues
//! - `JobBroker`: durable queue storage (in-memory or Redis)
//! - `JobWorker`: runs claimed jobs with per-queue limits and retries

pub mod broker;
pub mod dispatcher;
pub mod progress;
#[cfg(feature = "redis")]
pub mod redis_broker;
pub mod registry;
pub mod types;
pub mod worker;

pub use broker::{BrokerError, EnqueueOutcome, InMemoryJobBroker, JobBroker, QueueCounts};
pub use dispatcher::{DispatchError, DispatchReceipt, JobDispatcher};
pub use progress::BrokerProgressReporter;
#[cfg(feature = "redis")]
pub use redis_broker::RedisJobBroker;
pub use registry::{
    BrandWizardPayload, CleanupKind, CleanupPayload, CrmAction, CrmSyncPayload,
    NotificationPayload, PayloadError, Queue, QueueConfig, QueuePayload, Retention,
};
pub use types::{BackoffStrategy, DispatchOptions, Job, JobId, JobResult, JobState, RetryPolicy};
pub use worker::{JobHandler, JobWorker, JobWorkerConfig, JobWorkerHandle, WorkerStats};
