//! `notifications` job handler: queued webhook fan-out.

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use crate::jobs::{Job, JobHandler, JobResult, Queue, QueuePayload};
use crate::webhooks::WebhookEngine;

/// Delivers a queued domain event to the user's webhooks. Delivery failures
/// are already retried and audited by the engine, so the job always succeeds
/// once the payload is valid.
pub struct NotificationHandler {
    webhooks: WebhookEngine,
}

impl NotificationHandler {
    pub fn new(webhooks: WebhookEngine) -> Self {
        Self { webhooks }
    }
}

#[async_trait]
impl JobHandler for NotificationHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let payload = match Queue::Notifications.validate(&job.payload) {
            Ok(QueuePayload::Notification(payload)) => payload,
            Ok(_) => return JobResult::Fatal("payload is not a notification payload".into()),
            Err(e) => return JobResult::Fatal(e.to_string()),
        };

        let summary = self
            .webhooks
            .dispatch_event(payload.user_id, payload.event_type, JsonValue::Object(payload.data))
            .await;

        JobResult::Success(json!({
            "event": payload.event_type,
            "summary": summary,
        }))
    }
}
