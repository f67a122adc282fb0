//! Postgres-backed webhook store.
//!
//! Tables: `webhook_configs` and `webhook_deliveries` (see `migrations/`).
//! Delivery rows are insert-only and keyed by a generated id, so concurrent
//! writers never contend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tracing::{instrument, warn};
use uuid::Uuid;

use brandkit_core::{UserId, WebhookConfigId};
use brandkit_events::DomainEvent;

use super::model::{DeliveryRecord, WebhookConfig};
use super::store::{WebhookStore, WebhookStoreError};

#[derive(Debug, Clone)]
pub struct PostgresWebhookStore {
    pool: Arc<PgPool>,
}

impl PostgresWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl WebhookStore for PostgresWebhookStore {
    #[instrument(skip(self), fields(user_id = %user_id, event = %event), err)]
    async fn subscribers(
        &self,
        user_id: UserId,
        event: DomainEvent,
    ) -> Result<Vec<WebhookConfig>, WebhookStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, url, secret, events, active, created_at
            FROM webhook_configs
            WHERE user_id = $1 AND active AND $2 = ANY(events)
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(event.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("subscribers", e))?;

        rows.iter()
            .map(|row| {
                WebhookConfigRow::from_row(row)
                    .map_err(|e| WebhookStoreError::Decode(e.to_string()))
                    .map(WebhookConfig::from)
            })
            .collect()
    }

    #[instrument(
        skip(self, record),
        fields(webhook_id = %record.webhook_id, attempt = record.attempt, status_code = record.status_code),
        err
    )]
    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), WebhookStoreError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries (
                id, webhook_id, event, payload, status_code,
                response_body, attempt, success, error, delivered_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.webhook_id.as_uuid())
        .bind(record.event.as_str())
        .bind(&record.payload)
        .bind(i32::from(record.status_code))
        .bind(record.response_body.as_deref())
        .bind(record.attempt as i32)
        .bind(record.success)
        .bind(record.error.as_deref())
        .bind(record.delivered_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_delivery", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(webhook_id = %webhook_id), err)]
    async fn deliveries_for(
        &self,
        webhook_id: WebhookConfigId,
    ) -> Result<Vec<DeliveryRecord>, WebhookStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, webhook_id, event, payload, status_code,
                   response_body, attempt, success, error, delivered_at
            FROM webhook_deliveries
            WHERE webhook_id = $1
            ORDER BY delivered_at ASC, attempt ASC
            "#,
        )
        .bind(webhook_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deliveries_for", e))?;

        rows.iter()
            .map(|row| {
                let row = DeliveryRow::from_row(row)
                    .map_err(|e| WebhookStoreError::Decode(e.to_string()))?;
                row.try_into()
            })
            .collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> WebhookStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Foreign key: the config was deleted between lookup and audit.
                Some("23503") => WebhookStoreError::Storage(format!("{msg} (unknown webhook)")),
                _ => WebhookStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            WebhookStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            WebhookStoreError::Storage(format!("unexpected row not found in {}", operation))
        }
        _ => WebhookStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

struct WebhookConfigRow {
    id: Uuid,
    user_id: Uuid,
    url: String,
    secret: String,
    events: Vec<String>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for WebhookConfigRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(WebhookConfigRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            url: row.try_get("url")?,
            secret: row.try_get("secret")?,
            events: row.try_get("events")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<WebhookConfigRow> for WebhookConfig {
    fn from(row: WebhookConfigRow) -> Self {
        let id = WebhookConfigId::from_uuid(row.id);
        let events = row
            .events
            .iter()
            .filter_map(|name| match name.parse::<DomainEvent>() {
                Ok(event) => Some(event),
                Err(_) => {
                    warn!(webhook_id = %id, event = %name, "ignoring unregistered event in webhook config");
                    None
                }
            })
            .collect();

        WebhookConfig {
            id,
            user_id: UserId::from_uuid(row.user_id),
            url: row.url,
            secret: row.secret,
            events,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

struct DeliveryRow {
    id: Uuid,
    webhook_id: Uuid,
    event: String,
    payload: JsonValue,
    status_code: i32,
    response_body: Option<String>,
    attempt: i32,
    success: bool,
    error: Option<String>,
    delivered_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for DeliveryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(DeliveryRow {
            id: row.try_get("id")?,
            webhook_id: row.try_get("webhook_id")?,
            event: row.try_get("event")?,
            payload: row.try_get("payload")?,
            status_code: row.try_get("status_code")?,
            response_body: row.try_get("response_body")?,
            attempt: row.try_get("attempt")?,
            success: row.try_get("success")?,
            error: row.try_get("error")?,
            delivered_at: row.try_get("delivered_at")?,
        })
    }
}

impl TryFrom<DeliveryRow> for DeliveryRecord {
    type Error = WebhookStoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let event = row
            .event
            .parse::<DomainEvent>()
            .map_err(|e| WebhookStoreError::Decode(e.to_string()))?;
        Ok(DeliveryRecord {
            id: row.id,
            webhook_id: WebhookConfigId::from_uuid(row.webhook_id),
            event,
            payload: row.payload,
            status_code: u16::try_from(row.status_code)
                .map_err(|_| WebhookStoreError::Decode(format!("status code {}", row.status_code)))?,
            response_body: row.response_body,
            attempt: u32::try_from(row.attempt)
                .map_err(|_| WebhookStoreError::Decode(format!("attempt {}", row.attempt)))?,
            success: row.success,
            error: row.error,
            delivered_at: row.delivered_at,
        })
    }
}
