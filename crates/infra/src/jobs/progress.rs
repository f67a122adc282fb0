use std::sync::Arc;

use async_trait::async_trait;

use brandkit_agent::{ProgressReporter, ProgressUpdate, SinkError};

use super::broker::JobBroker;
use super::types::JobId;

/// Writes agent-run progress into the owning job record.
#[derive(Clone)]
pub struct BrokerProgressReporter {
    broker: Arc<dyn JobBroker>,
    job_id: JobId,
}

impl BrokerProgressReporter {
    pub fn new(broker: Arc<dyn JobBroker>, job_id: JobId) -> Self {
        Self { broker, job_id }
    }
}

#[async_trait]
impl ProgressReporter for BrokerProgressReporter {
    async fn report(&self, update: ProgressUpdate) -> Result<(), SinkError> {
        self.broker
            .update_progress(&self.job_id, &update)
            .await
            .map_err(|e| SinkError::new("job progress", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::broker::InMemoryJobBroker;
    use crate::jobs::registry::Queue;
    use crate::jobs::types::Job;

    #[tokio::test]
    async fn reports_land_on_the_job() {
        let broker = InMemoryJobBroker::arc();
        let id = JobId::from("brand-wizard-1");
        broker
            .enqueue(Job::new(id.clone(), Queue::BrandWizard, serde_json::json!({}), 1))
            .await
            .unwrap();

        let reporter = BrokerProgressReporter::new(broker.clone(), id.clone());
        reporter
            .report(ProgressUpdate::percent(30).with_tool("searchWeb"))
            .await
            .unwrap();

        let job = broker.get(&id).await.unwrap().unwrap();
        assert_eq!(job.progress, 30);
        assert_eq!(job.last_tool.as_deref(), Some("searchWeb"));
    }

    #[tokio::test]
    async fn missing_job_is_a_sink_error() {
        let reporter = BrokerProgressReporter::new(InMemoryJobBroker::arc(), JobId::from("gone"));
        let err = reporter.report(ProgressUpdate::percent(10)).await.unwrap_err();
        assert_eq!(err.sink, "job progress");
    }
}
