use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue, json};
use tracing::warn;

use brandkit_agent::{ErrorDescription, classify};
use brandkit_core::UserId;

use crate::Settings;
use crate::jobs::{CrmAction, Job, JobHandler, JobResult, Queue, QueuePayload};

use super::sanitize::strip_blocked_fields;
use super::token::CachedTokenProvider;

/// Provider API used by CRM sync jobs.
#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn send(
        &self,
        access_token: &str,
        user_id: UserId,
        action: CrmAction,
        data: &Map<String, JsonValue>,
    ) -> anyhow::Result<()>;
}

/// `crm-sync` job handler: sanitize, authenticate, forward.
pub struct CrmSyncHandler {
    client: Arc<dyn CrmClient>,
    tokens: Arc<CachedTokenProvider>,
    blocked_fields: Vec<String>,
}

impl CrmSyncHandler {
    pub fn new(
        client: Arc<dyn CrmClient>,
        tokens: Arc<CachedTokenProvider>,
        blocked_fields: Vec<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            blocked_fields,
        }
    }

    /// Block the fields listed in `CRM_BLOCKED_FIELDS`.
    pub fn from_settings(
        client: Arc<dyn CrmClient>,
        tokens: Arc<CachedTokenProvider>,
        settings: &Settings,
    ) -> Self {
        Self::new(client, tokens, settings.crm_blocked_fields.clone())
    }
}

#[async_trait]
impl JobHandler for CrmSyncHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let mut payload = match Queue::CrmSync.validate(&job.payload) {
            Ok(QueuePayload::CrmSync(payload)) => payload,
            Ok(_) => return JobResult::Fatal("payload is not a crm-sync payload".into()),
            Err(e) => return JobResult::Fatal(e.to_string()),
        };

        let stripped = strip_blocked_fields(&mut payload.data, &self.blocked_fields);

        let token = match self.tokens.access_token().await {
            Ok(token) => token,
            Err(e) => return JobResult::Failure(e.to_string()),
        };

        match self
            .client
            .send(&token, payload.user_id, payload.action, &payload.data)
            .await
        {
            Ok(()) => JobResult::Success(json!({
                "action": payload.action,
                "strippedFields": stripped,
            })),
            Err(err) => {
                let description = ErrorDescription::from(&err);
                warn!(job_id = %job.id, error = %description.message, "CRM sync failed");
                if classify(&description).is_recoverable() {
                    JobResult::Failure(description.message)
                } else {
                    JobResult::Fatal(description.message)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::token::{CrmToken, InMemoryTokenStore, TokenFetcher};
    use crate::jobs::JobId;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;

    struct StaticFetcher;

    #[async_trait]
    impl TokenFetcher for StaticFetcher {
        async fn fetch(&self) -> anyhow::Result<CrmToken> {
            Ok(CrmToken::new("tok", Utc::now() + Duration::hours(1)))
        }
    }

    #[derive(Default)]
    struct RecordingClient {
        sent: Mutex<Vec<(String, Map<String, JsonValue>)>>,
        fail_with: Option<&'static str>,
    }

    #[async_trait]
    impl CrmClient for RecordingClient {
        async fn send(
            &self,
            access_token: &str,
            _user_id: UserId,
            _action: CrmAction,
            data: &Map<String, JsonValue>,
        ) -> anyhow::Result<()> {
            if let Some(message) = self.fail_with {
                anyhow::bail!(message);
            }
            self.sent
                .lock()
                .unwrap()
                .push((access_token.to_string(), data.clone()));
            Ok(())
        }
    }

    fn tokens() -> Arc<CachedTokenProvider> {
        Arc::new(CachedTokenProvider::new(
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(StaticFetcher),
            "crm",
        ))
    }

    fn handler(client: Arc<RecordingClient>) -> CrmSyncHandler {
        CrmSyncHandler::new(client, tokens(), vec!["password".into()])
    }

    fn job() -> Job {
        Job::new(
            JobId::from("crm-sync-1"),
            Queue::CrmSync,
            json!({
                "userId": UserId::new(),
                "action": "update-contact",
                "data": { "email": "a@b.c", "password": "hunter2" }
            }),
            5,
        )
    }

    #[tokio::test]
    async fn blocked_fields_never_reach_the_client() {
        let client = Arc::new(RecordingClient::default());

        let result = handler(client.clone()).handle(&job()).await;

        let JobResult::Success(output) = result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(output["strippedFields"], json!(["password"]));
        let sent = client.sent.lock().unwrap();
        assert_eq!(sent[0].0, "tok");
        assert!(!sent[0].1.contains_key("password"));
    }

    #[tokio::test]
    async fn configured_blocked_fields_are_stripped() {
        let settings = Settings::from_lookup(|key| {
            (key == "CRM_BLOCKED_FIELDS").then(|| "email, phone".to_string())
        })
        .unwrap();
        let client = Arc::new(RecordingClient::default());

        let result = CrmSyncHandler::from_settings(client.clone(), tokens(), &settings)
            .handle(&job())
            .await;

        let JobResult::Success(output) = result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(output["strippedFields"], json!(["email"]));
        let sent = client.sent.lock().unwrap();
        assert!(!sent[0].1.contains_key("email"));
        assert_eq!(sent[0].1["password"], "hunter2");
    }

    #[tokio::test]
    async fn provider_errors_are_classified() {
        let transient = Arc::new(RecordingClient {
            fail_with: Some("503 Service Unavailable"),
            ..Default::default()
        });
        assert!(matches!(
            handler(transient).handle(&job()).await,
            JobResult::Failure(_)
        ));

        let fatal = Arc::new(RecordingClient {
            fail_with: Some("contact email is invalid"),
            ..Default::default()
        });
        assert!(matches!(handler(fatal).handle(&job()).await, JobResult::Fatal(_)));
    }
}
