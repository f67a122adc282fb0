use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use brandkit_core::{UserId, WebhookConfigId};
use brandkit_events::DomainEvent;

/// Longest response body kept in an audit row, in bytes.
pub const MAX_RESPONSE_BODY_BYTES: usize = 1024;

/// A user's subscription to a set of domain events.
///
/// `secret` is per config and is never logged; `Debug` redacts it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub id: WebhookConfigId,
    pub user_id: UserId,
    pub url: String,
    pub secret: String,
    pub events: Vec<DomainEvent>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookConfig {
    pub fn new(
        user_id: UserId,
        url: impl Into<String>,
        secret: impl Into<String>,
        events: Vec<DomainEvent>,
    ) -> Self {
        Self {
            id: WebhookConfigId::new(),
            user_id,
            url: url.into(),
            secret: secret.into(),
            events,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn subscribes_to(&self, event: DomainEvent) -> bool {
        self.active && self.events.contains(&event)
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("url", &self.url)
            .field("secret", &"[redacted]")
            .field("events", &self.events)
            .field("active", &self.active)
            .finish()
    }
}

/// One delivery attempt, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub webhook_id: WebhookConfigId,
    pub event: DomainEvent,
    pub payload: JsonValue,
    /// HTTP status, or 0 when no response arrived (timeout, connection error).
    pub status_code: u16,
    pub response_body: Option<String>,
    /// 1-based.
    pub attempt: u32,
    pub success: bool,
    pub error: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn new(
        webhook_id: WebhookConfigId,
        event: DomainEvent,
        payload: JsonValue,
        attempt: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            webhook_id,
            event,
            payload,
            status_code: 0,
            response_body: None,
            attempt,
            success: false,
            error: None,
            delivered_at: Utc::now(),
        }
    }

    pub fn with_response(mut self, status_code: u16, body: &str) -> Self {
        self.status_code = status_code;
        self.success = is_success(status_code);
        self.response_body = Some(truncate_body(body).to_string());
        if !self.success {
            self.error = Some(format!("HTTP {status_code}"));
        }
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.status_code = 0;
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Result of a one-off connectivity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
}

/// Tally of one event fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySummary {
    pub subscribers: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub fn is_success(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

/// Cut `body` to at most [`MAX_RESPONSE_BODY_BYTES`] without splitting a char.
pub fn truncate_body(body: &str) -> &str {
    if body.len() <= MAX_RESPONSE_BODY_BYTES {
        return body;
    }
    let mut end = MAX_RESPONSE_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
