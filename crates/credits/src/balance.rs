use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use brandkit_core::{DomainError, UserId};

use crate::credit::CreditType;
use crate::plan::{BILLING_PERIOD_DAYS, PlanAllocation};

/// Balance of one credit type for one user in the current billing period.
///
/// Invariant: `remaining + used == total`. `remaining` never goes below zero;
/// overage is a billing flag, not a negative balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    user_id: UserId,
    credit_type: CreditType,
    remaining: u32,
    used: u32,
    total: u32,
    period_end: DateTime<Utc>,
}

/// Answer to "may this user spend `qty` credits?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub allowed: bool,
    pub remaining: u32,
    pub needs_upgrade: bool,
    pub overage_allowed: bool,
}

/// Result of an atomic deduction. Insufficient balance is `success: false`,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductOutcome {
    pub success: bool,
    pub remaining: u32,
}

impl CreditBalance {
    /// Fresh balance for a new period: everything remaining, nothing used.
    pub fn allocate(
        user_id: UserId,
        credit_type: CreditType,
        plan: &PlanAllocation,
        now: DateTime<Utc>,
    ) -> Self {
        let total = plan.credits_for(credit_type);
        Self {
            user_id,
            credit_type,
            remaining: total,
            used: 0,
            total,
            period_end: now + Duration::days(BILLING_PERIOD_DAYS),
        }
    }

    /// Rebuild a balance from stored columns, rejecting rows that break the invariant.
    pub fn from_parts(
        user_id: UserId,
        credit_type: CreditType,
        remaining: u32,
        used: u32,
        total: u32,
        period_end: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let balance = Self {
            user_id,
            credit_type,
            remaining,
            used,
            total,
            period_end,
        };
        if !balance.is_consistent() {
            return Err(DomainError::invariant(format!(
                "{credit_type} balance for {user_id}: remaining {remaining} + used {used} != total {total}"
            )));
        }
        Ok(balance)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn credit_type(&self) -> CreditType {
        self.credit_type
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn period_end(&self) -> DateTime<Utc> {
        self.period_end
    }

    /// A balance only counts until its period ends; after that it waits
    /// for a refill.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.period_end > now
    }

    pub fn is_consistent(&self) -> bool {
        u64::from(self.remaining) + u64::from(self.used) == u64::from(self.total)
    }

    /// Check-and-decrement. Callers must hold whatever lock makes this atomic
    /// with respect to other deductions on the same balance.
    pub fn try_deduct(&mut self, qty: u32) -> Result<DeductOutcome, DomainError> {
        if qty == 0 {
            return Err(DomainError::validation("deduction quantity must be positive"));
        }
        if self.remaining < qty {
            return Ok(DeductOutcome {
                success: false,
                remaining: self.remaining,
            });
        }
        self.remaining -= qty;
        self.used += qty;
        Ok(DeductOutcome {
            success: true,
            remaining: self.remaining,
        })
    }

    /// Return credits to the balance. Capped at `used`; returns the amount
    /// actually moved back.
    pub fn refund(&mut self, qty: u32) -> u32 {
        let moved = qty.min(self.used);
        self.used -= moved;
        self.remaining += moved;
        moved
    }

    /// Start a new period with the plan's allocation. Unused credits do not
    /// carry over.
    pub fn reset(&mut self, plan: &PlanAllocation, now: DateTime<Utc>) {
        let total = plan.credits_for(self.credit_type);
        self.total = total;
        self.remaining = total;
        self.used = 0;
        self.period_end = now + Duration::days(BILLING_PERIOD_DAYS);
    }
}

/// Decide whether `qty` credits may be spent.
///
/// A missing balance row counts as zero remaining.
pub fn check_allowance(
    balance: Option<&CreditBalance>,
    plan: &PlanAllocation,
    qty: u32,
) -> CheckOutcome {
    allowance_for(balance.map(CreditBalance::remaining).unwrap_or(0), plan, qty)
}

/// Same decision as [`check_allowance`] when only the remaining count is known.
pub fn allowance_for(remaining: u32, plan: &PlanAllocation, qty: u32) -> CheckOutcome {
    if remaining >= qty {
        return CheckOutcome {
            allowed: true,
            remaining,
            needs_upgrade: false,
            overage_allowed: false,
        };
    }

    if plan.overage_allowed {
        CheckOutcome {
            allowed: true,
            remaining,
            needs_upgrade: false,
            overage_allowed: true,
        }
    } else {
        CheckOutcome {
            allowed: false,
            remaining,
            needs_upgrade: true,
            overage_allowed: false,
        }
    }
}
