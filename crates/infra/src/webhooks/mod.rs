//! Outbound webhook delivery.
//!
//! - Subscribers are looked up per user and event through `WebhookStore`
//! - Bodies are `{event, timestamp, data}`, signed with the config's secret
//! - Up to three attempts per subscriber with doubling backoff; every attempt
//!   is written to the audit trail before the next one starts
//! - Delivery never fails the caller

pub mod engine;
pub mod model;
pub mod postgres;
pub mod signing;
pub mod store;
pub mod transport;

pub use engine::{MAX_ATTEMPTS, TEST_EVENT, WebhookEngine, WebhookSettings};
pub use model::{DeliveryRecord, DeliverySummary, VerifyOutcome, WebhookConfig};
pub use postgres::PostgresWebhookStore;
pub use signing::{sign, signature_header, verify_signature};
pub use store::{InMemoryWebhookStore, WebhookStore, WebhookStoreError};
pub use transport::{
    ReqwestTransport, TransportError, TransportResponse, WebhookRequest, WebhookTransport,
};
