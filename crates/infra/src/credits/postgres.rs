//! Postgres credit ledger.
//!
//! Every operation is one stored-procedure call, so each is one round trip and
//! one transaction. The procedures take `SELECT ... FOR UPDATE` on the balance
//! row before changing it; that row lock is what serialises concurrent
//! deductions across worker processes.
//!
//! | Operation | Procedure | Returns |
//! |-----------|-----------|---------|
//! | `check` | `check_credits(user, type)` | `(remaining, tier)` |
//! | `deduct` | `deduct_credits(user, type, qty, reason)` | `(success, remaining)` |
//! | `refund` | `refund_credits(user, type, qty, reason)` | `found` |
//! | `refill` | `refill_credits(user, tier, logo, mockup, video, period_end)` | nothing |
//! | `allocate` | `allocate_credits(user, tier, logo, mockup, video, period_end)` | nothing |
//!
//! Plan allocations are passed in from [`Tier::allocation`] so the table lives
//! in one place.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{info, instrument};

use brandkit_core::{DomainError, UserId};
use brandkit_credits::{
    BILLING_PERIOD_DAYS, CheckOutcome, CreditType, DeductOutcome, Tier, allowance_for,
};

use super::ledger::{CreditLedger, LedgerError};

#[derive(Debug, Clone)]
pub struct PostgresCreditLedger {
    pool: Arc<PgPool>,
}

impl PostgresCreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn reset(
        &self,
        procedure: &'static str,
        user_id: UserId,
        tier: Tier,
    ) -> Result<(), LedgerError> {
        let plan = tier.allocation();
        let period_end = Utc::now() + Duration::days(BILLING_PERIOD_DAYS);
        let sql = format!("SELECT {procedure}($1, $2, $3, $4, $5, $6)");

        sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(tier.as_str())
            .bind(to_i32(plan.logo, "logo allocation")?)
            .bind(to_i32(plan.mockup, "mockup allocation")?)
            .bind(to_i32(plan.video, "video allocation")?)
            .bind(period_end)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(procedure, e))?;
        Ok(())
    }
}

#[async_trait]
impl CreditLedger for PostgresCreditLedger {
    #[instrument(skip(self), fields(user_id = %user_id, credit_type = %credit_type), err)]
    async fn check(
        &self,
        user_id: UserId,
        credit_type: CreditType,
        qty: u32,
    ) -> Result<CheckOutcome, LedgerError> {
        let row = sqlx::query("SELECT remaining, tier FROM check_credits($1, $2)")
            .bind(user_id.as_uuid())
            .bind(credit_type.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("check_credits", e))?;

        let remaining: i32 = row.try_get("remaining").map_err(decode_error)?;
        let tier: String = row.try_get("tier").map_err(decode_error)?;
        let tier: Tier = tier.parse()?;

        Ok(allowance_for(to_u32(remaining)?, &tier.allocation(), qty))
    }

    #[instrument(skip(self, reason), fields(user_id = %user_id, credit_type = %credit_type), err)]
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

        let row = sqlx::query("SELECT success, remaining FROM deduct_credits($1, $2, $3, $4)")
            .bind(user_id.as_uuid())
            .bind(credit_type.as_str())
            .bind(to_i32(qty, "quantity")?)
            .bind(reason)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("deduct_credits", e))?;

        let success: bool = row.try_get("success").map_err(decode_error)?;
        let remaining: i32 = row.try_get("remaining").map_err(decode_error)?;
        Ok(DeductOutcome {
            success,
            remaining: to_u32(remaining)?,
        })
    }

    #[instrument(skip(self, reason), fields(user_id = %user_id, credit_type = %credit_type), err)]
    async fn refund(
        &self,
        user_id: UserId,
        credit_type: CreditType,
        qty: u32,
        reason: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let found: bool = sqlx::query_scalar("SELECT refund_credits($1, $2, $3, $4)")
            .bind(user_id.as_uuid())
            .bind(credit_type.as_str())
            .bind(to_i32(qty, "quantity")?)
            .bind(reason)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("refund_credits", e))?;

        if !found {
            info!(qty, "no active balance; refund skipped");
        }
        Ok(found)
    }

    #[instrument(skip(self), fields(user_id = %user_id, tier = tier.as_str()), err)]
    async fn refill(&self, user_id: UserId, tier: Tier) -> Result<(), LedgerError> {
        if !tier.allocation().monthly_refill {
            info!("tier has no monthly refill; skipped");
            return Ok(());
        }
        self.reset("refill_credits", user_id, tier).await
    }

    #[instrument(skip(self), fields(user_id = %user_id, tier = tier.as_str()), err)]
    async fn allocate(&self, user_id: UserId, tier: Tier) -> Result<(), LedgerError> {
        self.reset("allocate_credits", user_id, tier).await
    }
}

fn to_u32(value: i32) -> Result<u32, LedgerError> {
    u32::try_from(value)
        .map_err(|_| LedgerError::Storage(format!("negative credit count {value} from ledger")))
}

fn to_i32(value: u32, what: &str) -> Result<i32, LedgerError> {
    i32::try_from(value)
        .map_err(|_| DomainError::validation(format!("{what} {value} exceeds the ledger range")).into())
}

fn decode_error(err: sqlx::Error) -> LedgerError {
    LedgerError::Storage(format!("failed to decode ledger row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // remaining/used CHECK constraints
                Some("23514") => LedgerError::Domain(DomainError::invariant(msg)),
                _ => LedgerError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            LedgerError::Storage(format!("procedure returned no row in {}", operation))
        }
        _ => LedgerError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_beyond_the_column_range_are_rejected() {
        assert_eq!(to_i32(12, "quantity").unwrap(), 12);
        assert_eq!(to_i32(i32::MAX as u32, "quantity").unwrap(), i32::MAX);

        let err = to_i32(u32::MAX, "quantity").unwrap_err();
        assert!(matches!(err, LedgerError::Domain(_)), "got {err:?}");
    }

    #[test]
    fn negative_counts_from_storage_are_errors() {
        assert_eq!(to_u32(0).unwrap(), 0);
        assert!(matches!(to_u32(-1), Err(LedgerError::Storage(_))));
    }
}
