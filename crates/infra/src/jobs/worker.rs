//! In-process worker pool with per-queue concurrency, timeouts and retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::broker::{BrokerError, JobBroker};
use super::registry::Queue;
use super::types::{Job, JobResult, JobState};

/// Executes the jobs of one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult;
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// How often an idle queue is polled
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            name: "job-worker".to_string(),
        }
    }
}

impl JobWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    /// Attempts that failed and were scheduled again
    pub jobs_retried: u64,
    /// Jobs that ended in `failed`
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct JobWorkerHandle {
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl JobWorkerHandle {
    /// Stop claiming new jobs and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.loops {
            if let Err(e) = handle.await {
                error!(error = %e, "worker loop panicked");
            }
        }
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = self.stats.lock().unwrap().clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Claims jobs from a broker and runs them with registered handlers.
pub struct JobWorker {
    broker: Arc<dyn JobBroker>,
    handlers: HashMap<Queue, Arc<dyn JobHandler>>,
}

impl JobWorker {
    pub fn new(broker: Arc<dyn JobBroker>) -> Self {
        Self {
            broker,
            handlers: HashMap::new(),
        }
    }

    pub fn register_handler(&mut self, queue: Queue, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(queue, handler);
        self
    }

    /// Claim and run one job of `queue` on the current task.
    ///
    /// Returns the job in its post-attempt state, or `None` when nothing was
    /// ready or no handler is registered.
    pub async fn run_once(&self, queue: Queue) -> Result<Option<Job>, BrokerError> {
        let Some(handler) = self.handlers.get(&queue) else {
            return Ok(None);
        };
        let Some(job) = self.broker.claim_next(queue).await? else {
            return Ok(None);
        };
        let stats = Mutex::new(WorkerStats::default());
        execute(&*self.broker, &**handler, job, &stats).await.map(Some)
    }

    /// Start one polling loop per queue that has a handler.
    pub fn spawn(self, config: JobWorkerConfig) -> JobWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        let loops = self
            .handlers
            .iter()
            .map(|(queue, handler)| {
                tokio::spawn(queue_loop(
                    *queue,
                    self.broker.clone(),
                    handler.clone(),
                    config.clone(),
                    shutdown_rx.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        JobWorkerHandle {
            shutdown: shutdown_tx,
            loops,
            stats,
            started: Instant::now(),
        }
    }
}

async fn queue_loop(
    queue: Queue,
    broker: Arc<dyn JobBroker>,
    handler: Arc<dyn JobHandler>,
    config: JobWorkerConfig,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    let concurrency = queue.config().concurrency;
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut in_flight = JoinSet::new();
    info!(worker = %config.name, queue = %queue, concurrency, "queue loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        while in_flight.try_join_next().is_some() {}

        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => permit,
            _ = shutdown.changed() => break,
        };
        let Ok(permit) = permit else {
            break;
        };

        match broker.claim_next(queue).await {
            Ok(Some(job)) => {
                debug!(worker = %config.name, queue = %queue, job_id = %job.id, attempt = job.attempts_made, "claimed job");
                let broker = broker.clone();
                let handler = handler.clone();
                let stats = stats.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    if let Err(e) = execute(&*broker, &*handler, job, &stats).await {
                        error!(queue = %queue, error = %e, "failed to record job outcome");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            Err(e) => {
                drop(permit);
                error!(worker = %config.name, queue = %queue, error = %e, "failed to claim job");
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    info!(worker = %config.name, queue = %queue, "queue loop stopped");
}

/// Run one claimed job to its post-attempt state.
async fn execute(
    broker: &dyn JobBroker,
    handler: &dyn JobHandler,
    job: Job,
    stats: &Mutex<WorkerStats>,
) -> Result<Job, BrokerError> {
    let queue = job.queue;
    let timeout = queue.config().timeout;
    stats.lock().unwrap().current_running += 1;

    let result = match tokio::time::timeout(timeout, handler.handle(&job)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(queue = %queue, job_id = %job.id, ?timeout, "job timed out");
            stats.lock().unwrap().jobs_timed_out += 1;
            JobResult::Failure(format!("job timed out after {}s", timeout.as_secs()))
        }
    };

    let recorded = match result {
        JobResult::Success(value) => broker.complete(&job.id, value).await,
        JobResult::Failure(reason) => broker.fail(&job.id, &reason, true).await,
        JobResult::Fatal(reason) => broker.fail(&job.id, &reason, false).await,
    };

    {
        let mut s = stats.lock().unwrap();
        s.current_running = s.current_running.saturating_sub(1);
        s.jobs_processed += 1;
        match recorded.as_ref().map(|j| j.state) {
            Ok(JobState::Completed) => s.jobs_succeeded += 1,
            Ok(JobState::Failed) => s.jobs_failed += 1,
            Ok(_) => s.jobs_retried += 1,
            Err(_) => {}
        }
    }

    let job = recorded?;
    match job.state {
        JobState::Completed => debug!(queue = %queue, job_id = %job.id, "job completed"),
        JobState::Failed => warn!(
            queue = %queue,
            job_id = %job.id,
            attempts = job.attempts_made,
            reason = job.failed_reason.as_deref().unwrap_or_default(),
            "job failed"
        ),
        _ => debug!(
            queue = %queue,
            job_id = %job.id,
            attempt = job.attempts_made,
            ready_at = ?job.ready_at,
            "job scheduled for retry"
        ),
    }

    if job.state.is_terminal() {
        match broker.trim(queue).await {
            Ok(0) => {}
            Ok(removed) => debug!(queue = %queue, removed, "trimmed finished jobs"),
            Err(e) => warn!(queue = %queue, error = %e, "failed to trim finished jobs"),
        }
    }

    Ok(job)
}
