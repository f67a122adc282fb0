//! Infrastructure layer: queues, webhook delivery, ledger storage, Redis and
//! Postgres adapters, settings.
//!
//! Pure rules live in the domain crates (`brandkit-credits`,
//! `brandkit-agent`, `brandkit-events`); this crate applies them against real
//! storage and transports.

pub mod config;
pub mod credits;
pub mod crm;
pub mod jobs;
pub mod notifications;
pub mod runs;
pub mod webhooks;
pub mod wizard;


pub use config::{Settings, SettingsError};
pub use notifications::NotificationHandler;
pub use wizard::{WizardServices, WizardStepHandler, credit_type_for};
