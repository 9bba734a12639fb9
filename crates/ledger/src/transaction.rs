//! Financial transactions as seen by the posting engine.
//!
//! These rows are created by upstream financial workflows. The posting engine
//! reads them and never mutates them.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use fincore_core::{
    CategoryId, CounterpartyId, DomainError, FinancialAccountId, FinancialTransactionId, TenantId,
};

/// Kind of a financial transaction (doubles as the accounting-rule origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Payable,
    PayablePayment,
    Receivable,
    ReceivablePayment,
}

impl TransactionKind {
    /// Stable textual form, also the value persisted in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Payable => "payable",
            TransactionKind::PayablePayment => "payable_payment",
            TransactionKind::Receivable => "receivable",
            TransactionKind::ReceivablePayment => "receivable_payment",
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payable" => Ok(TransactionKind::Payable),
            "payable_payment" => Ok(TransactionKind::PayablePayment),
            "receivable" => Ok(TransactionKind::Receivable),
            "receivable_payment" => Ok(TransactionKind::ReceivablePayment),
            other => Err(DomainError::validation(format!(
                "unknown transaction kind: {other}"
            ))),
        }
    }
}

/// A financial transaction row (payable, receivable, or payment).
///
/// `amount` is signed as recorded upstream; postings always use its absolute
/// value and express direction through the debit/credit accounts instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialTransaction {
    pub id: FinancialTransactionId,
    pub tenant_id: TenantId,
    pub kind: TransactionKind,
    pub category_id: CategoryId,
    pub counterparty_id: Option<CounterpartyId>,
    pub amount: BigDecimal,
    pub ledger_date: NaiveDate,
    pub due_date: NaiveDate,
    pub memo: String,
    pub financial_account_id: Option<FinancialAccountId>,
}

/// Input for creating a payable together with its ledger posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayable {
    pub tenant_id: TenantId,
    pub category_id: CategoryId,
    pub counterparty_id: Option<CounterpartyId>,
    pub amount: BigDecimal,
    pub ledger_date: NaiveDate,
    pub due_date: NaiveDate,
    pub memo: String,
    pub financial_account_id: Option<FinancialAccountId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_text() {
        for kind in [
            TransactionKind::Payable,
            TransactionKind::PayablePayment,
            TransactionKind::Receivable,
            TransactionKind::ReceivablePayment,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = "invoice".parse::<TransactionKind>().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn kind_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&TransactionKind::PayablePayment).unwrap(),
            "\"payable_payment\""
        );
        let kind: TransactionKind = serde_json::from_str("\"receivable\"").unwrap();
        assert_eq!(kind, TransactionKind::Receivable);
    }
}
