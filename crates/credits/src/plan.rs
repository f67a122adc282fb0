use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use brandkit_core::DomainError;

use crate::credit::CreditType;

/// Length of one billing period, counted from allocation or refill.
pub const BILLING_PERIOD_DAYS: i64 = 30;

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Starter,
    Pro,
    Agency,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Agency => "agency",
        }
    }

    /// Static allowance table for this tier.
    pub fn allocation(&self) -> PlanAllocation {
        match self {
            Tier::Free => PlanAllocation {
                tier: *self,
                logo: 3,
                mockup: 0,
                video: 0,
                overage_allowed: false,
                monthly_refill: false,
            },
            Tier::Starter => PlanAllocation {
                tier: *self,
                logo: 20,
                mockup: 10,
                video: 0,
                overage_allowed: false,
                monthly_refill: true,
            },
            Tier::Pro => PlanAllocation {
                tier: *self,
                logo: 100,
                mockup: 50,
                video: 5,
                overage_allowed: true,
                monthly_refill: true,
            },
            Tier::Agency => PlanAllocation {
                tier: *self,
                logo: 500,
                mockup: 250,
                video: 25,
                overage_allowed: true,
                monthly_refill: true,
            },
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "starter" => Ok(Tier::Starter),
            "pro" => Ok(Tier::Pro),
            "agency" => Ok(Tier::Agency),
            _ => Err(DomainError::unknown("tier", s)),
        }
    }
}

/// Per-period allowance and billing flags for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAllocation {
    pub tier: Tier,
    pub logo: u32,
    pub mockup: u32,
    pub video: u32,
    /// Usage past the allowance is billed separately instead of refused.
    pub overage_allowed: bool,
    /// Balances reset at the start of every billing period.
    pub monthly_refill: bool,
}

impl PlanAllocation {
    pub fn credits_for(&self, credit_type: CreditType) -> u32 {
        match credit_type {
            CreditType::Logo => self.logo,
            CreditType::Mockup => self.mockup,
            CreditType::Video => self.video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_never_refills_or_overages() {
        let plan = Tier::Free.allocation();
        assert!(!plan.monthly_refill);
        assert!(!plan.overage_allowed);
        assert_eq!(plan.credits_for(CreditType::Logo), 3);
    }

    #[test]
    fn tier_names_parse_case_insensitively() {
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert!("platinum".parse::<Tier>().is_err());
    }
}
