//! `fincore-ledger` — double-entry ledger domain model.
//!
//! Pure types and construction logic for financial transactions, accounting
//! rules, and balanced ledger postings. Persistence lives in `fincore-infra`;
//! this crate only guarantees that a posting is balanced **by construction**.

pub mod entry;
pub mod rule;
pub mod transaction;

pub use entry::{LedgerEntry, LedgerLine, NewLedgerEntry, NewLedgerLine, NewPosting};
pub use rule::AccountingRule;
pub use transaction::{FinancialTransaction, NewPayable, TransactionKind};
