use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use brandkit_core::{UserId, WebhookConfigId};
use brandkit_events::DomainEvent;

use super::model::{DeliveryRecord, WebhookConfig};

#[derive(Debug, Clone, Error)]
pub enum WebhookStoreError {
    #[error("webhook storage error: {0}")]
    Storage(String),

    #[error("webhook row could not be decoded: {0}")]
    Decode(String),
}

/// Subscriber lookup and the per-attempt delivery audit trail.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Active configs of `user_id` that subscribe to `event`.
    async fn subscribers(
        &self,
        user_id: UserId,
        event: DomainEvent,
    ) -> Result<Vec<WebhookConfig>, WebhookStoreError>;

    /// Persist one attempt. Called before any backoff delay starts.
    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), WebhookStoreError>;

    /// Attempts for one config, oldest first.
    async fn deliveries_for(
        &self,
        webhook_id: WebhookConfigId,
    ) -> Result<Vec<DeliveryRecord>, WebhookStoreError>;
}

/// In-memory webhook store for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryWebhookStore {
    configs: RwLock<Vec<WebhookConfig>>,
    deliveries: RwLock<Vec<DeliveryRecord>>,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, config: WebhookConfig) {
        self.configs.write().unwrap().push(config);
    }

    pub fn all_deliveries(&self) -> Vec<DeliveryRecord> {
        self.deliveries.read().unwrap().clone()
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn subscribers(
        &self,
        user_id: UserId,
        event: DomainEvent,
    ) -> Result<Vec<WebhookConfig>, WebhookStoreError> {
        Ok(self
            .configs
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id && c.subscribes_to(event))
            .cloned()
            .collect())
    }

    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), WebhookStoreError> {
        self.deliveries.write().unwrap().push(record.clone());
        Ok(())
    }

    async fn deliveries_for(
        &self,
        webhook_id: WebhookConfigId,
    ) -> Result<Vec<DeliveryRecord>, WebhookStoreError> {
        Ok(self
            .deliveries
            .read()
            .unwrap()
            .iter()
            .filter(|d| d.webhook_id == webhook_id)
            .cloned()
            .collect())
    }
}
