use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use brandkit_core::DomainError;

/// Domain events that can be delivered to user webhooks.
///
/// This is a closed registry: adding an event is a compile-time visible change,
/// and every name a caller passes in is parsed against it before any delivery
/// work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DomainEvent {
    #[serde(rename = "brand.created")]
    BrandCreated,
    #[serde(rename = "brand.updated")]
    BrandUpdated,
    #[serde(rename = "brand.completed")]
    BrandCompleted,
    #[serde(rename = "logo.generated")]
    LogoGenerated,
    #[serde(rename = "mockup.generated")]
    MockupGenerated,
    #[serde(rename = "wizard.step.completed")]
    WizardStepCompleted,
    #[serde(rename = "wizard.step.failed")]
    WizardStepFailed,
    #[serde(rename = "credits.low")]
    CreditsLow,
    #[serde(rename = "subscription.updated")]
    SubscriptionUpdated,
}

impl DomainEvent {
    /// Every registered event, in declaration order.
    pub const ALL: [DomainEvent; 9] = [
        DomainEvent::BrandCreated,
        DomainEvent::BrandUpdated,
        DomainEvent::BrandCompleted,
        DomainEvent::LogoGenerated,
        DomainEvent::MockupGenerated,
        DomainEvent::WizardStepCompleted,
        DomainEvent::WizardStepFailed,
        DomainEvent::CreditsLow,
        DomainEvent::SubscriptionUpdated,
    ];

    /// Stable wire name (e.g. `"brand.created"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEvent::BrandCreated => "brand.created",
            DomainEvent::BrandUpdated => "brand.updated",
            DomainEvent::BrandCompleted => "brand.completed",
            DomainEvent::LogoGenerated => "logo.generated",
            DomainEvent::MockupGenerated => "mockup.generated",
            DomainEvent::WizardStepCompleted => "wizard.step.completed",
            DomainEvent::WizardStepFailed => "wizard.step.failed",
            DomainEvent::CreditsLow => "credits.low",
            DomainEvent::SubscriptionUpdated => "subscription.updated",
        }
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainEvent {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| DomainError::unknown("event", s))
    }
}
