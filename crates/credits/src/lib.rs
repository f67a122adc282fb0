//! Credit metering domain (balances, plans, allowance decisions).
//!
//! Pure domain logic only: no IO, no persistence. Storage adapters in the
//! infra crate apply these rules inside their own atomic boundaries.

pub mod balance;
pub mod credit;
pub mod plan;

pub use balance::{CheckOutcome, CreditBalance, DeductOutcome, allowance_for, check_allowance};
pub use credit::CreditType;
pub use plan::{BILLING_PERIOD_DAYS, PlanAllocation, Tier};
