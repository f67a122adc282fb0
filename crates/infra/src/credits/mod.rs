//! Credit ledger adapters.
//!
//! The decision rules live in `brandkit-credits`; this module applies them
//! inside an atomic boundary (one mutex in memory, one stored procedure with a
//! row lock in Postgres).

pub mod ledger;
pub mod postgres;

pub use ledger::{CreditLedger, CreditTransaction, InMemoryCreditLedger, LedgerError, TransactionKind};
pub use postgres::PostgresCreditLedger;
