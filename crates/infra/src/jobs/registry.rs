//! Closed registry of queues and their payload schemas.
//!
//! Adding a queue means adding a `Queue` variant; every match over queues
//! then has to handle it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use brandkit_agent::WizardStep;
use brandkit_core::{BrandId, UserId};
use brandkit_events::DomainEvent;

use super::types::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Queue {
    BrandWizard,
    CrmSync,
    Notifications,
    Cleanup,
}

/// Completed/failed jobs kept per queue before older ones are trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub keep_completed: usize,
    pub keep_failed: usize,
}

/// Static execution policy of a queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    /// Jobs of this queue running at once per worker
    pub concurrency: usize,
    /// Upper bound for one attempt
    pub timeout: Duration,
    /// Default priority; lower is claimed first
    pub priority: u32,
    pub retry: RetryPolicy,
    pub retention: Retention,
}

impl Queue {
    pub const ALL: [Queue; 4] = [
        Queue::BrandWizard,
        Queue::CrmSync,
        Queue::Notifications,
        Queue::Cleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Queue::BrandWizard => "brand-wizard",
            Queue::CrmSync => "crm-sync",
            Queue::Notifications => "notifications",
            Queue::Cleanup => "cleanup",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Queue::ALL.iter().map(Queue::name).collect()
    }

    pub fn config(&self) -> QueueConfig {
        match self {
            Queue::BrandWizard => QueueConfig {
                concurrency: 5,
                timeout: Duration::from_secs(300),
                priority: 1,
                retry: RetryPolicy::exponential(
                    3,
                    Duration::from_secs(5),
                    Duration::from_secs(300),
                ),
                retention: Retention {
                    keep_completed: 100,
                    keep_failed: 500,
                },
            },
            Queue::CrmSync => QueueConfig {
                concurrency: 3,
                timeout: Duration::from_secs(30),
                priority: 5,
                retry: RetryPolicy::exponential(
                    5,
                    Duration::from_secs(2),
                    Duration::from_secs(300),
                ),
                retention: Retention {
                    keep_completed: 50,
                    keep_failed: 200,
                },
            },
            Queue::Notifications => QueueConfig {
                concurrency: 10,
                timeout: Duration::from_secs(30),
                priority: 3,
                retry: RetryPolicy::fixed(3, Duration::from_secs(1)),
                retention: Retention {
                    keep_completed: 200,
                    keep_failed: 200,
                },
            },
            Queue::Cleanup => QueueConfig {
                concurrency: 1,
                timeout: Duration::from_secs(600),
                priority: 10,
                retry: RetryPolicy::no_retry(),
                retention: Retention {
                    keep_completed: 10,
                    keep_failed: 50,
                },
            },
        }
    }

    /// Check `payload` against this queue's schema.
    pub fn validate(&self, payload: &JsonValue) -> Result<QueuePayload, PayloadError> {
        let invalid = |e: serde_json::Error| PayloadError {
            queue: *self,
            message: e.to_string(),
        };
        let parsed = match self {
            Queue::BrandWizard => {
                QueuePayload::BrandWizard(serde_json::from_value(payload.clone()).map_err(invalid)?)
            }
            Queue::CrmSync => {
                QueuePayload::CrmSync(serde_json::from_value(payload.clone()).map_err(invalid)?)
            }
            Queue::Notifications => QueuePayload::Notification(
                serde_json::from_value(payload.clone()).map_err(invalid)?,
            ),
            Queue::Cleanup => {
                QueuePayload::Cleanup(serde_json::from_value(payload.clone()).map_err(invalid)?)
            }
        };
        Ok(parsed)
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name is not one of [`Queue::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown queue '{0}'")]
pub struct UnknownQueue(pub String);

impl FromStr for Queue {
    type Err = UnknownQueue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Queue::ALL
            .into_iter()
            .find(|q| q.name() == s)
            .ok_or_else(|| UnknownQueue(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid payload for queue '{queue}': {message}")]
pub struct PayloadError {
    pub queue: Queue,
    pub message: String,
}

/// One wizard step to run for a brand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BrandWizardPayload {
    pub user_id: UserId,
    pub brand_id: BrandId,
    pub step: WizardStep,
    pub input: Map<String, JsonValue>,
    pub credit_cost: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrmAction {
    CreateContact,
    UpdateContact,
    TrackEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CrmSyncPayload {
    pub user_id: UserId,
    pub action: CrmAction,
    pub data: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotificationPayload {
    pub user_id: UserId,
    pub event_type: DomainEvent,
    pub data: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupKind {
    ExpiredSessions,
    OrphanedAssets,
    OldDeliveries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupPayload {
    #[serde(rename = "type")]
    pub kind: CleanupKind,
}

/// A payload that passed validation, tagged by queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuePayload {
    BrandWizard(BrandWizardPayload),
    CrmSync(CrmSyncPayload),
    Notification(NotificationPayload),
    Cleanup(CleanupPayload),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wizard_payload() -> JsonValue {
        json!({
            "userId": UserId::new(),
            "brandId": BrandId::new(),
            "step": "social-analysis",
            "input": { "instagramHandle": "@x" },
            "creditCost": 1
        })
    }

    #[test]
    fn wizard_payload_validates() {
        let parsed = Queue::BrandWizard.validate(&wizard_payload()).unwrap();
        let QueuePayload::BrandWizard(p) = parsed else {
            panic!("wrong payload variant");
        };
        assert_eq!(p.step, WizardStep::SocialAnalysis);
        assert_eq!(p.credit_cost, 1);
    }

    #[test]
    fn invalid_step_is_rejected() {
        let mut payload = wizard_payload();
        payload["step"] = json!("invalid-step");

        let err = Queue::BrandWizard.validate(&payload).unwrap_err();
        assert_eq!(err.queue, Queue::BrandWizard);
    }

    #[test]
    fn non_uuid_user_is_rejected() {
        let mut payload = wizard_payload();
        payload["userId"] = json!("not-a-uuid");
        assert!(Queue::BrandWizard.validate(&payload).is_err());
    }

    #[test]
    fn negative_credit_cost_is_rejected() {
        let mut payload = wizard_payload();
        payload["creditCost"] = json!(-1);
        assert!(Queue::BrandWizard.validate(&payload).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut payload = wizard_payload();
        payload["admin"] = json!(true);
        assert!(Queue::BrandWizard.validate(&payload).is_err());
    }

    #[test]
    fn notification_requires_known_event() {
        let ok = json!({ "userId": UserId::new(), "eventType": "logo.generated", "data": {} });
        let bad = json!({ "userId": UserId::new(), "eventType": "logo.deleted", "data": {} });

        assert!(Queue::Notifications.validate(&ok).is_ok());
        assert!(Queue::Notifications.validate(&bad).is_err());
    }

    #[test]
    fn cleanup_uses_type_field() {
        let parsed = Queue::Cleanup.validate(&json!({ "type": "old-deliveries" })).unwrap();
        assert_eq!(
            parsed,
            QueuePayload::Cleanup(CleanupPayload {
                kind: CleanupKind::OldDeliveries
            })
        );
    }

    #[test]
    fn queue_names_round_trip() {
        for q in Queue::ALL {
            assert_eq!(q.name().parse::<Queue>().unwrap(), q);
            assert_eq!(serde_json::to_value(q).unwrap(), json!(q.name()));
        }
        assert!("emails".parse::<Queue>().is_err());
    }
}
