//! Signed, retried, audited webhook fan-out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::{Value as JsonValue, json};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use brandkit_core::UserId;
use brandkit_events::{DomainEvent, WebhookEnvelope};

use super::model::{DeliveryRecord, DeliverySummary, VerifyOutcome, WebhookConfig, is_success};
use super::signing::signature_header;
use super::store::WebhookStore;
use super::transport::{WebhookRequest, WebhookTransport};

/// Attempts per subscriber, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Event name used by [`WebhookEngine::verify`] pings.
pub const TEST_EVENT: &str = "webhook.test";

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Product name for the `User-Agent` header.
    pub product_name: String,
    pub base_delay: Duration,
    /// Applied by the transport; kept here for logging and the verification message.
    pub timeout: Duration,
    pub max_parallel: usize,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            product_name: "Brandkit".to_string(),
            base_delay: Duration::from_millis(1_000),
            timeout: Duration::from_secs(10),
            max_parallel: 8,
        }
    }
}

impl WebhookSettings {
    pub fn user_agent(&self) -> String {
        format!("{}-Webhooks/1.0", self.product_name)
    }

    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Delivers domain events to every subscribed webhook of a user.
///
/// Delivery is best-effort: nothing here returns an error to the caller.
/// Each subscriber gets its own sequential retry loop; subscribers run
/// concurrently up to `max_parallel` and never see each other's failures.
#[derive(Clone)]
pub struct WebhookEngine {
    store: Arc<dyn WebhookStore>,
    transport: Arc<dyn WebhookTransport>,
    settings: WebhookSettings,
}

impl WebhookEngine {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        transport: Arc<dyn WebhookTransport>,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            store,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &WebhookSettings {
        &self.settings
    }

    /// Deliver `event` by wire name. Unregistered names are dropped with a warning.
    pub async fn dispatch(&self, user_id: UserId, event: &str, data: JsonValue) -> DeliverySummary {
        match event.parse::<DomainEvent>() {
            Ok(event) => self.dispatch_event(user_id, event, data).await,
            Err(_) => {
                warn!(user_id = %user_id, event, "dropping webhook dispatch for unregistered event");
                DeliverySummary::default()
            }
        }
    }

    /// Detached variant of [`dispatch`](Self::dispatch) for callers that must not wait.
    pub fn spawn_dispatch(
        &self,
        user_id: UserId,
        event: impl Into<String>,
        data: JsonValue,
    ) -> JoinHandle<DeliverySummary> {
        let engine = self.clone();
        let event = event.into();
        tokio::spawn(async move { engine.dispatch(user_id, &event, data).await })
    }

    #[instrument(skip(self, data), fields(user_id = %user_id, event = %event))]
    pub async fn dispatch_event(
        &self,
        user_id: UserId,
        event: DomainEvent,
        data: JsonValue,
    ) -> DeliverySummary {
        let subscribers = match self.store.subscribers(user_id, event).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                error!(error = %e, "failed to load webhook subscribers");
                return DeliverySummary::default();
            }
        };
        if subscribers.is_empty() {
            debug!("no webhook subscribers");
            return DeliverySummary::default();
        }

        let envelope = WebhookEnvelope::now(event.as_str(), data);
        let body = match envelope.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to serialize webhook envelope");
                return DeliverySummary {
                    subscribers: subscribers.len(),
                    delivered: 0,
                    failed: subscribers.len(),
                };
            }
        };
        let payload = serde_json::to_value(&envelope).unwrap_or(JsonValue::Null);

        let delivered = AtomicUsize::new(0);
        let total = subscribers.len();
        stream::iter(subscribers)
            .for_each_concurrent(self.settings.max_parallel.max(1), |config| {
                let body = &body;
                let payload = &payload;
                let delivered = &delivered;
                async move {
                    if self.deliver(&config, event, body, payload).await {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
            .await;

        let delivered = delivered.into_inner();
        DeliverySummary {
            subscribers: total,
            delivered,
            failed: total - delivered,
        }
    }

    /// Retry loop for one subscriber. Returns whether any attempt succeeded.
    async fn deliver(
        &self,
        config: &WebhookConfig,
        event: DomainEvent,
        body: &[u8],
        payload: &JsonValue,
    ) -> bool {
        let signature = match signature_header(&config.secret, body) {
            Ok(signature) => signature,
            Err(e) => {
                error!(webhook_id = %config.id, error = %e, "cannot sign webhook payload");
                return false;
            }
        };

        for attempt in 1..=MAX_ATTEMPTS {
            let request = self.request(&config.url, event.as_str(), body, &signature, attempt);
            let record = DeliveryRecord::new(config.id, event, payload.clone(), attempt);
            let record = match self.transport.post(&request).await {
                Ok(response) => record.with_response(response.status, &response.body),
                Err(e) => record.with_error(e.to_string()),
            };

            if let Err(e) = self.store.record_delivery(&record).await {
                error!(webhook_id = %config.id, attempt, error = %e, "failed to record webhook delivery");
            }

            if record.success {
                info!(
                    webhook_id = %config.id,
                    attempt,
                    status_code = record.status_code,
                    "webhook delivered"
                );
                return true;
            }

            if attempt < MAX_ATTEMPTS {
                let delay = self.settings.delay_for_attempt(attempt);
                warn!(
                    webhook_id = %config.id,
                    attempt,
                    status_code = record.status_code,
                    error = record.error.as_deref().unwrap_or_default(),
                    delay_ms = delay.as_millis() as u64,
                    "webhook attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        error!(
            webhook_id = %config.id,
            url = %config.url,
            attempts = MAX_ATTEMPTS,
            "webhook delivery failed after all attempts"
        );
        false
    }

    fn request(
        &self,
        url: &str,
        event: &str,
        body: &[u8],
        signature: &str,
        attempt: u32,
    ) -> WebhookRequest {
        WebhookRequest {
            url: url.to_string(),
            headers: vec![
                ("Content-Type".into(), "application/json".into()),
                ("X-Signature".into(), signature.to_string()),
                ("User-Agent".into(), self.settings.user_agent()),
                ("X-Webhook-Event".into(), event.to_string()),
                ("X-Webhook-Attempt".into(), attempt.to_string()),
            ],
            body: body.to_vec(),
        }
    }

    /// Send one signed test ping. No retry, no audit row.
    #[instrument(skip(self, secret), fields(url = %url))]
    pub async fn verify(&self, url: &str, secret: &str) -> VerifyOutcome {
        let envelope = WebhookEnvelope::now(
            TEST_EVENT,
            json!({ "message": "This is a test webhook delivery." }),
        );
        let body = match envelope.to_bytes() {
            Ok(body) => body,
            Err(e) => return failed_check(format!("could not serialize test payload: {e}")),
        };
        let signature = match signature_header(secret, &body) {
            Ok(signature) => signature,
            Err(e) => return failed_check(format!("could not sign test payload: {e}")),
        };

        let request = self.request(url, TEST_EVENT, &body, &signature, 1);
        match self.transport.post(&request).await {
            Ok(response) if is_success(response.status) => VerifyOutcome {
                success: true,
                status_code: response.status,
                message: "Webhook endpoint responded successfully".to_string(),
            },
            Ok(response) => VerifyOutcome {
                success: false,
                status_code: response.status,
                message: format!("Webhook endpoint returned HTTP {}", response.status),
            },
            Err(e) => failed_check(e.to_string()),
        }
    }
}

fn failed_check(message: String) -> VerifyOutcome {
    VerifyOutcome {
        success: false,
        status_code: 0,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::signing::verify_signature;
    use crate::webhooks::store::InMemoryWebhookStore;
    use crate::webhooks::transport::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone)]
    struct Call {
        request: WebhookRequest,
        at: Instant,
    }

    /// Replies from a per-URL script; URLs without a script get 200.
    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<HashMap<String, VecDeque<Result<TransportResponse, TransportError>>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedTransport {
        fn script(&self, url: &str, replies: Vec<Result<TransportResponse, TransportError>>) {
            self.scripts
                .lock()
                .unwrap()
                .insert(url.to_string(), replies.into());
        }

        fn calls_to(&self, url: &str) -> Vec<Call> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.request.url == url)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        async fn post(&self, request: &WebhookRequest) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push(Call {
                request: request.clone(),
                at: Instant::now(),
            });
            self.scripts
                .lock()
                .unwrap()
                .get_mut(&request.url)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(status(200)))
        }
    }

    fn status(code: u16) -> TransportResponse {
        TransportResponse {
            status: code,
            body: format!("status {code}"),
        }
    }

    struct Fixture {
        engine: WebhookEngine,
        store: Arc<InMemoryWebhookStore>,
        transport: Arc<ScriptedTransport>,
        user: UserId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryWebhookStore::new());
        let transport = Arc::new(ScriptedTransport::default());
        let settings = WebhookSettings {
            base_delay: Duration::from_millis(1_000),
            ..WebhookSettings::default()
        };
        Fixture {
            engine: WebhookEngine::new(store.clone(), transport.clone(), settings),
            store,
            transport,
            user: UserId::new(),
        }
    }

    impl Fixture {
        fn subscribe(&self, url: &str, events: Vec<DomainEvent>) -> WebhookConfig {
            let config = WebhookConfig::new(self.user, url, format!("secret-for-{url}"), events);
            self.store.register(config.clone());
            config
        }
    }

    #[test]
    fn backoff_doubles_from_the_base() {
        let settings = WebhookSettings::default();
        assert_eq!(settings.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(settings.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(settings.delay_for_attempt(3), Duration::from_millis(4_000));
    }

    #[tokio::test]
    async fn delivers_signed_envelope_with_headers() {
        let fx = fixture();
        let config = fx.subscribe("https://a.example/hook", vec![DomainEvent::BrandCreated]);

        let summary = fx
            .engine
            .dispatch(fx.user, "brand.created", json!({ "brandId": "b-1" }))
            .await;

        assert_eq!(
            summary,
            DeliverySummary {
                subscribers: 1,
                delivered: 1,
                failed: 0
            }
        );

        let calls = fx.transport.calls_to(&config.url);
        assert_eq!(calls.len(), 1);
        let request = &calls[0].request;
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("User-Agent"), Some("Brandkit-Webhooks/1.0"));
        assert_eq!(request.header("X-Webhook-Event"), Some("brand.created"));
        assert_eq!(request.header("X-Webhook-Attempt"), Some("1"));
        let signature = request.header("X-Signature").unwrap();
        assert!(verify_signature(&config.secret, &request.body, signature));

        let body: JsonValue = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["event"], "brand.created");
        assert_eq!(body["data"]["brandId"], "b-1");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

        let audit = fx.store.deliveries_for(config.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].success);
        assert_eq!(audit[0].status_code, 200);
    }

    #[tokio::test]
    async fn unsubscribed_event_makes_no_calls() {
        let fx = fixture();
        let config = fx.subscribe("https://a.example/hook", vec![DomainEvent::BrandCreated]);

        let summary = fx
            .engine
            .dispatch(fx.user, "brand.updated", json!({}))
            .await;

        assert_eq!(summary.subscribers, 0);
        assert!(fx.transport.calls_to(&config.url).is_empty());
    }

    #[tokio::test]
    async fn unregistered_event_is_dropped() {
        let fx = fixture();
        fx.subscribe("https://a.example/hook", DomainEvent::ALL.to_vec());

        let summary = fx.engine.dispatch(fx.user, "brand.exploded", json!({})).await;

        assert_eq!(summary, DeliverySummary::default());
        assert!(fx.transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_write_three_rows_with_doubling_gaps() {
        let fx = fixture();
        let config = fx.subscribe("https://down.example/hook", vec![DomainEvent::LogoGenerated]);
        fx.transport.script(
            &config.url,
            vec![Ok(status(500)), Ok(status(502)), Ok(status(503))],
        );

        let summary = fx
            .engine
            .dispatch_event(fx.user, DomainEvent::LogoGenerated, json!({}))
            .await;
        assert_eq!(summary.failed, 1);

        let calls = fx.transport.calls_to(&config.url);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(1_000));
        assert_eq!(calls[2].at - calls[1].at, Duration::from_millis(2_000));
        let attempts: Vec<_> = calls
            .iter()
            .map(|c| c.request.header("X-Webhook-Attempt").unwrap().to_string())
            .collect();
        assert_eq!(attempts, ["1", "2", "3"]);

        let audit = fx.store.deliveries_for(config.id).await.unwrap();
        assert_eq!(audit.len(), 3);
        assert!(audit.iter().all(|r| !r.success));
        assert_eq!(
            audit.iter().map(|r| r.status_code).collect::<Vec<_>>(),
            vec![500, 502, 503]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn final_attempt_is_not_followed_by_a_wait() {
        let fx = fixture();
        let config = fx.subscribe("https://down.example/hook", vec![DomainEvent::CreditsLow]);
        fx.transport.script(
            &config.url,
            vec![Ok(status(500)), Ok(status(500)), Ok(status(500))],
        );

        let started = Instant::now();
        fx.engine
            .dispatch_event(fx.user, DomainEvent::CreditsLow, json!({}))
            .await;

        assert_eq!(started.elapsed(), Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_record_status_zero_and_retry() {
        let fx = fixture();
        let config = fx.subscribe("https://flaky.example/hook", vec![DomainEvent::BrandCompleted]);
        fx.transport.script(
            &config.url,
            vec![Err(TransportError::Timeout("deadline elapsed".into())), Ok(status(201))],
        );

        let summary = fx
            .engine
            .dispatch_event(fx.user, DomainEvent::BrandCompleted, json!({}))
            .await;
        assert_eq!(summary.delivered, 1);

        let audit = fx.store.deliveries_for(config.id).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].status_code, 0);
        assert!(audit[0].error.as_deref().unwrap().contains("timed out"));
        assert!(audit[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_subscriber_does_not_affect_another() {
        let fx = fixture();
        let bad = fx.subscribe("https://bad.example/hook", vec![DomainEvent::BrandUpdated]);
        let good = fx.subscribe("https://good.example/hook", vec![DomainEvent::BrandUpdated]);
        fx.transport.script(
            &bad.url,
            vec![
                Err(TransportError::Connect("refused".into())),
                Err(TransportError::Connect("refused".into())),
                Err(TransportError::Connect("refused".into())),
            ],
        );

        let summary = fx
            .engine
            .dispatch_event(fx.user, DomainEvent::BrandUpdated, json!({}))
            .await;

        assert_eq!(
            summary,
            DeliverySummary {
                subscribers: 2,
                delivered: 1,
                failed: 1
            }
        );
        let good_calls = fx.transport.calls_to(&good.url);
        assert_eq!(good_calls.len(), 1);
        assert_eq!(fx.transport.calls_to(&bad.url).len(), 3);
    }

    #[tokio::test]
    async fn spawned_dispatch_runs_detached() {
        let fx = fixture();
        fx.subscribe("https://a.example/hook", vec![DomainEvent::MockupGenerated]);

        let handle = fx
            .engine
            .spawn_dispatch(fx.user, "mockup.generated", json!({"n": 1}));

        assert_eq!(handle.await.unwrap().delivered, 1);
    }

    #[tokio::test]
    async fn verify_reports_status_without_auditing() {
        let fx = fixture();
        fx.transport
            .script("https://verify.example", vec![Ok(status(404))]);

        let outcome = fx.engine.verify("https://verify.example", "s3cret").await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, 404);

        let ok = fx.engine.verify("https://verify.example", "s3cret").await;
        assert!(ok.success);
        assert_eq!(ok.status_code, 200);

        let calls = fx.transport.calls_to("https://verify.example");
        assert_eq!(calls[0].request.header("X-Webhook-Event"), Some(TEST_EVENT));
        assert!(verify_signature(
            "s3cret",
            &calls[0].request.body,
            calls[0].request.header("X-Signature").unwrap()
        ));
        assert!(fx.store.all_deliveries().is_empty());
    }

    #[tokio::test]
    async fn verify_maps_transport_errors_to_status_zero() {
        let fx = fixture();
        fx.transport.script(
            "https://nowhere.example",
            vec![Err(TransportError::Connect("dns error".into()))],
        );

        let outcome = fx.engine.verify("https://nowhere.example", "s").await;
        assert_eq!(
            outcome,
            VerifyOutcome {
                success: false,
                status_code: 0,
                message: "connection failed: dns error".into()
            }
        );
    }
}
