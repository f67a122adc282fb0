use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use brandkit_core::{DomainError, UserId};
use brandkit_credits::{CheckOutcome, CreditBalance, CreditType, DeductOutcome, Tier, check_allowance};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Atomic credit operations.
///
/// Each call is one atomic unit against the `(user, credit type)` balance.
/// Insufficient balance is reported in the returned value; `Err` means the
/// ledger itself could not be reached or the request was malformed.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn check(
        &self,
        user_id: UserId,
        credit_type: CreditType,
        qty: u32,
    ) -> Result<CheckOutcome, LedgerError>;

    async fn deduct(
        &self,
        user_id: UserId,
        credit_type: CreditType,
        qty: u32,
        reason: Option<&str>,
    ) -> Result<DeductOutcome, LedgerError>;

    /// Returns `false` (and changes nothing) when the user has no balance row
    /// for `credit_type` in the current period.
    async fn refund(
        &self,
        user_id: UserId,
        credit_type: CreditType,
        qty: u32,
        reason: Option<&str>,
    ) -> Result<bool, LedgerError>;

    /// Start a new period at the tier's allocation. Skipped for tiers without
    /// monthly refill.
    async fn refill(&self, user_id: UserId, tier: Tier) -> Result<(), LedgerError>;

    /// First-time balances for a new subscriber or tier change.
    async fn allocate(&self, user_id: UserId, tier: Tier) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deduct,
    Refund,
    Refill,
    Allocate,
}

/// Ledger history entry. `amount` is always the quantity actually moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub user_id: UserId,
    pub credit_type: CreditType,
    pub kind: TransactionKind,
    pub amount: u32,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerState {
    tiers: HashMap<UserId, Tier>,
    balances: HashMap<(UserId, CreditType), CreditBalance>,
    transactions: Vec<CreditTransaction>,
}

impl LedgerState {
    fn tier(&self, user_id: UserId) -> Tier {
        self.tiers.get(&user_id).copied().unwrap_or(Tier::Free)
    }

    /// Balance for the current period. Rows whose period has ended read as
    /// missing until the next refill.
    fn active(&self, user_id: UserId, credit_type: CreditType) -> Option<&CreditBalance> {
        let now = Utc::now();
        self.balances
            .get(&(user_id, credit_type))
            .filter(|b| b.is_active(now))
    }

    fn active_mut(
        &mut self,
        user_id: UserId,
        credit_type: CreditType,
    ) -> Option<&mut CreditBalance> {
        let now = Utc::now();
        self.balances
            .get_mut(&(user_id, credit_type))
            .filter(|b| b.is_active(now))
    }

    fn record(
        &mut self,
        user_id: UserId,
        credit_type: CreditType,
        kind: TransactionKind,
        amount: u32,
        reason: Option<&str>,
    ) {
        self.transactions.push(CreditTransaction {
            user_id,
            credit_type,
            kind,
            amount,
            reason: reason.map(str::to_string),
            at: Utc::now(),
        });
    }

    fn reset_all(&mut self, user_id: UserId, tier: Tier, kind: TransactionKind) {
        let plan = tier.allocation();
        let now = Utc::now();
        self.tiers.insert(user_id, tier);
        for credit_type in CreditType::ALL {
            let balance = self
                .balances
                .entry((user_id, credit_type))
                .and_modify(|b| b.reset(&plan, now))
                .or_insert_with(|| CreditBalance::allocate(user_id, credit_type, &plan, now));
            let total = balance.total();
            self.record(user_id, credit_type, kind, total, None);
        }
    }
}

/// In-process ledger. One mutex serialises every operation, which gives the
/// same check-and-decrement atomicity the database gets from row locks.
/// Users with no tier on record are treated as `free`.
#[derive(Debug, Default)]
pub struct InMemoryCreditLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, user_id: UserId, credit_type: CreditType) -> Option<CreditBalance> {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&(user_id, credit_type))
            .cloned()
    }

    pub fn tier(&self, user_id: UserId) -> Tier {
        self.state.lock().unwrap().tier(user_id)
    }

    pub fn transactions(&self) -> Vec<CreditTransaction> {
        self.state.lock().unwrap().transactions.clone()
    }

    /// Store a balance as-is, for setting up a period mid-way.
    pub fn seed(&self, tier: Tier, balance: CreditBalance) {
        let mut state = self.state.lock().unwrap();
        state.tiers.insert(balance.user_id(), tier);
        state
            .balances
            .insert((balance.user_id(), balance.credit_type()), balance);
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn check(
        &self,
        user_id: UserId,
        credit_type: CreditType,
        qty: u32,
    ) -> Result<CheckOutcome, LedgerError> {
        let state = self.state.lock().unwrap();
        let plan = state.tier(user_id).allocation();
        Ok(check_allowance(state.active(user_id, credit_type), &plan, qty))
    }

    async fn deduct(
        &self,
        user_id: UserId,
        credit_type: CreditType,
        qty: u32,
        reason: Option<&str>,
    ) -> Result<DeductOutcome, LedgerError> {
        if qty == 0 {
            return Err(DomainError::validation("deduction quantity must be positive").into());
        }
        let mut state = self.state.lock().unwrap();
        let Some(balance) = state.active_mut(user_id, credit_type) else {
            return Ok(DeductOutcome {
                success: false,
                remaining: 0,
            });
        };
        let outcome = balance.try_deduct(qty)?;
        if outcome.success {
            state.record(user_id, credit_type, TransactionKind::Deduct, qty, reason);
        }
        Ok(outcome)
    }

    async fn refund(
        &self,
        user_id: UserId,
        credit_type: CreditType,
        qty: u32,
        reason: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let Some(balance) = state.active_mut(user_id, credit_type) else {
            info!(user_id = %user_id, credit_type = %credit_type, qty, "no active balance; refund skipped");
            return Ok(false);
        };
        let moved = balance.refund(qty);
        if moved < qty {
            debug!(user_id = %user_id, credit_type = %credit_type, qty, moved, "refund capped at used credits");
        }
        state.record(user_id, credit_type, TransactionKind::Refund, moved, reason);
        Ok(true)
    }

    async fn refill(&self, user_id: UserId, tier: Tier) -> Result<(), LedgerError> {
        if !tier.allocation().monthly_refill {
            info!(user_id = %user_id, tier = tier.as_str(), "tier has no monthly refill; skipped");
            return Ok(());
        }
        self.state
            .lock()
            .unwrap()
            .reset_all(user_id, tier, TransactionKind::Refill);
        Ok(())
    }

    async fn allocate(&self, user_id: UserId, tier: Tier) -> Result<(), LedgerError> {
        self.state
            .lock()
            .unwrap()
            .reset_all(user_id, tier, TransactionKind::Allocate);
        Ok(())
    }
}
