//! Runtime settings read from the environment.
//!
//! Queue definitions are not settings; they are compiled into [`crate::jobs::Queue`].

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::webhooks::WebhookSettings;

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_PRODUCT_NAME: &str = "Brandkit";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("{key} must be a positive integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Unset means in-memory stores.
    pub database_url: Option<String>,
    pub redis_url: String,
    pub product_name: String,
    pub webhook_base_delay: Duration,
    pub webhook_timeout: Duration,
    pub webhook_max_parallel: usize,
    pub crm_blocked_fields: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty());
        if database_url.is_none() {
            warn!("DATABASE_URL not set; using in-memory stores");
        }

        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| {
            warn!("REDIS_URL not set; using {DEFAULT_REDIS_URL}");
            DEFAULT_REDIS_URL.to_string()
        });

        let product_name = lookup("BRANDKIT_PRODUCT_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PRODUCT_NAME.to_string());

        let crm_blocked_fields = lookup("CRM_BLOCKED_FIELDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url,
            redis_url,
            product_name,
            webhook_base_delay: Duration::from_millis(number(
                &lookup,
                "WEBHOOK_BASE_DELAY_MS",
                1_000,
            )?),
            webhook_timeout: Duration::from_secs(number(&lookup, "WEBHOOK_TIMEOUT_SECS", 10)?),
            webhook_max_parallel: number(&lookup, "WEBHOOK_MAX_PARALLEL", 8)? as usize,
            crm_blocked_fields,
        })
    }

    pub fn webhook_settings(&self) -> WebhookSettings {
        WebhookSettings {
            product_name: self.product_name.clone(),
            base_delay: self.webhook_base_delay,
            timeout: self.webhook_timeout,
            max_parallel: self.webhook_max_parallel,
        }
    }
}

fn number<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(SettingsError::InvalidNumber { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();

        assert_eq!(settings.database_url, None);
        assert_eq!(settings.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(settings.product_name, "Brandkit");
        assert_eq!(settings.webhook_base_delay, Duration::from_millis(1_000));
        assert_eq!(settings.webhook_timeout, Duration::from_secs(10));
        assert_eq!(settings.webhook_max_parallel, 8);
        assert!(settings.crm_blocked_fields.is_empty());
        assert_eq!(settings.webhook_settings().user_agent(), "Brandkit-Webhooks/1.0");
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let settings = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/brandkit"),
            ("BRANDKIT_PRODUCT_NAME", "Acme"),
            ("WEBHOOK_BASE_DELAY_MS", "250"),
            ("WEBHOOK_TIMEOUT_SECS", " 5 "),
            ("CRM_BLOCKED_FIELDS", "password, ssn ,,creditCard"),
        ]))
        .unwrap();

        assert_eq!(settings.database_url.as_deref(), Some("postgres://localhost/brandkit"));
        assert_eq!(settings.webhook_base_delay, Duration::from_millis(250));
        assert_eq!(settings.webhook_timeout, Duration::from_secs(5));
        assert_eq!(settings.crm_blocked_fields, vec!["password", "ssn", "creditCard"]);
        assert_eq!(settings.webhook_settings().user_agent(), "Acme-Webhooks/1.0");
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let err = Settings::from_lookup(lookup(&[("WEBHOOK_MAX_PARALLEL", "lots")])).unwrap_err();
        assert_eq!(
            err,
            SettingsError::InvalidNumber {
                key: "WEBHOOK_MAX_PARALLEL",
                value: "lots".into()
            }
        );

        assert!(Settings::from_lookup(lookup(&[("WEBHOOK_TIMEOUT_SECS", "0")])).is_err());
    }
}
