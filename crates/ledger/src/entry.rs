//! Ledger entries and the balanced-pair constructor.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use fincore_core::{
    AccountId, CounterpartyId, FinancialAccountId, FinancialTransactionId, LedgerEntryId,
    LedgerLineId, TenantId,
};

use crate::rule::AccountingRule;
use crate::transaction::{FinancialTransaction, NewPayable};

/// Ledger entry header. Created exactly once per financial transaction and
/// never updated or deleted by this subsystem.
///
/// Invariant: `total_debits == total_credits` at all times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub tenant_id: TenantId,
    pub entry_date: NaiveDate,
    pub narrative: String,
    pub counterparty_id: Option<CounterpartyId>,
    pub financial_account_id: Option<FinancialAccountId>,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    /// Back-reference to the originating financial transaction. Unique per
    /// tenant; this is the idempotency key for postings.
    pub source_transaction_id: FinancialTransactionId,
}

/// One line of a ledger entry; carries either a debit or a credit amount
/// (the other side is zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub id: LedgerLineId,
    pub entry_id: LedgerEntryId,
    pub account_id: AccountId,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub narrative: String,
}

impl LedgerEntry {
    /// Check the double-entry balance invariant against a set of lines.
    pub fn is_balanced(&self, lines: &[LedgerLine]) -> bool {
        let zero = BigDecimal::from(0);
        let debits = lines.iter().fold(zero.clone(), |acc, l| acc + &l.debit);
        let credits = lines.iter().fold(zero, |acc, l| acc + &l.credit);
        debits == credits && debits == self.total_debits && credits == self.total_credits
    }
}

/// Header fields of a posting about to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub tenant_id: TenantId,
    pub entry_date: NaiveDate,
    pub narrative: String,
    pub counterparty_id: Option<CounterpartyId>,
    pub financial_account_id: Option<FinancialAccountId>,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    pub source_transaction_id: FinancialTransactionId,
}

/// A line of a posting about to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerLine {
    pub account_id: AccountId,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub narrative: String,
}

/// A complete posting: one header plus exactly one debit and one credit line.
///
/// Constructed only through [`NewPosting::from_transaction`] and
/// [`NewPosting::from_payable_input`], so a posting is balanced before it
/// ever reaches a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPosting {
    pub entry: NewLedgerEntry,
    pub debit_line: NewLedgerLine,
    pub credit_line: NewLedgerLine,
}

impl NewPosting {
    /// Build the posting for an existing financial transaction using a
    /// resolved rule.
    pub fn from_transaction(tx: &FinancialTransaction, rule: &AccountingRule) -> Self {
        Self::build(
            tx.tenant_id,
            tx.ledger_date,
            &tx.memo,
            tx.counterparty_id,
            tx.financial_account_id,
            tx.amount.abs(),
            tx.id,
            rule,
        )
    }

    /// Build the posting for a payable being created in the same unit of
    /// work (`source` is the freshly inserted transaction id).
    pub fn from_payable_input(
        input: &NewPayable,
        source: FinancialTransactionId,
        rule: &AccountingRule,
    ) -> Self {
        Self::build(
            input.tenant_id,
            input.ledger_date,
            &input.memo,
            input.counterparty_id,
            input.financial_account_id,
            input.amount.abs(),
            source,
            rule,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        tenant_id: TenantId,
        entry_date: NaiveDate,
        narrative: &str,
        counterparty_id: Option<CounterpartyId>,
        financial_account_id: Option<FinancialAccountId>,
        amount: BigDecimal,
        source: FinancialTransactionId,
        rule: &AccountingRule,
    ) -> Self {
        let zero = BigDecimal::from(0);
        NewPosting {
            entry: NewLedgerEntry {
                tenant_id,
                entry_date,
                narrative: narrative.to_string(),
                counterparty_id,
                financial_account_id,
                total_debits: amount.clone(),
                total_credits: amount.clone(),
                source_transaction_id: source,
            },
            debit_line: NewLedgerLine {
                account_id: rule.debit_account_id,
                debit: amount.clone(),
                credit: zero.clone(),
                narrative: narrative.to_string(),
            },
            credit_line: NewLedgerLine {
                account_id: rule.credit_account_id,
                debit: zero,
                credit: amount,
                narrative: narrative.to_string(),
            },
        }
    }

    /// Sum of debits minus sum of credits across the pair; zero by
    /// construction.
    pub fn imbalance(&self) -> BigDecimal {
        (&self.debit_line.debit + &self.credit_line.debit)
            - (&self.debit_line.credit + &self.credit_line.credit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fincore_core::{AccountingRuleId, CategoryId};
    use proptest::prelude::*;

    use crate::transaction::TransactionKind;

    fn test_rule(debit: i64, credit: i64) -> AccountingRule {
        AccountingRule {
            id: AccountingRuleId::new(1),
            tenant_id: TenantId::new(1),
            origin: TransactionKind::Payable,
            subtype: None,
            category_id: CategoryId::new(7),
            debit_account_id: AccountId::new(debit),
            credit_account_id: AccountId::new(credit),
            automatic: true,
            active: true,
            description: "expense on purchase".to_string(),
        }
    }

    fn test_tx(amount: BigDecimal) -> FinancialTransaction {
        FinancialTransaction {
            id: FinancialTransactionId::new(42),
            tenant_id: TenantId::new(1),
            kind: TransactionKind::Payable,
            category_id: CategoryId::new(7),
            counterparty_id: None,
            amount,
            ledger_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
            memo: "office supplies".to_string(),
            financial_account_id: None,
        }
    }

    #[test]
    fn posting_totals_match_absolute_amount() {
        let rule = test_rule(301, 201);
        let tx = test_tx("1500.00".parse().unwrap());
        let posting = NewPosting::from_transaction(&tx, &rule);

        let expected: BigDecimal = "1500.00".parse().unwrap();
        assert_eq!(posting.entry.total_debits, expected);
        assert_eq!(posting.entry.total_credits, expected);
        assert_eq!(posting.debit_line.account_id, AccountId::new(301));
        assert_eq!(posting.debit_line.debit, expected);
        assert_eq!(posting.debit_line.credit, BigDecimal::from(0));
        assert_eq!(posting.credit_line.account_id, AccountId::new(201));
        assert_eq!(posting.credit_line.credit, expected);
        assert_eq!(posting.credit_line.debit, BigDecimal::from(0));
    }

    #[test]
    fn negative_amounts_are_posted_as_absolute_value() {
        let rule = test_rule(301, 201);
        let tx = test_tx("-250.75".parse().unwrap());
        let posting = NewPosting::from_transaction(&tx, &rule);

        let expected: BigDecimal = "250.75".parse().unwrap();
        assert_eq!(posting.entry.total_debits, expected);
        assert_eq!(posting.debit_line.debit, expected);
        assert_eq!(posting.credit_line.credit, expected);
    }

    #[test]
    fn entry_balance_check_detects_drift() {
        let entry = LedgerEntry {
            id: LedgerEntryId::new(1),
            tenant_id: TenantId::new(1),
            entry_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            narrative: String::new(),
            counterparty_id: None,
            financial_account_id: None,
            total_debits: BigDecimal::from(100),
            total_credits: BigDecimal::from(100),
            source_transaction_id: FinancialTransactionId::new(42),
        };
        let lines = vec![
            LedgerLine {
                id: LedgerLineId::new(1),
                entry_id: entry.id,
                account_id: AccountId::new(301),
                debit: BigDecimal::from(100),
                credit: BigDecimal::from(0),
                narrative: String::new(),
            },
            LedgerLine {
                id: LedgerLineId::new(2),
                entry_id: entry.id,
                account_id: AccountId::new(201),
                debit: BigDecimal::from(0),
                credit: BigDecimal::from(90),
                narrative: String::new(),
            },
        ];
        assert!(!entry.is_balanced(&lines));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any posting built from a (transaction, rule) pair has
        /// zero imbalance, regardless of amount sign or magnitude.
        #[test]
        fn constructed_postings_always_balance(
            amount in -1_000_000_000i64..1_000_000_000i64,
            debit_account in 1i64..10_000i64,
            credit_account in 1i64..10_000i64,
        ) {
            let rule = test_rule(debit_account, credit_account);
            let tx = test_tx(BigDecimal::from(amount));
            let posting = NewPosting::from_transaction(&tx, &rule);

            prop_assert_eq!(posting.imbalance(), BigDecimal::from(0));
            prop_assert_eq!(&posting.entry.total_debits, &posting.entry.total_credits);
            prop_assert_eq!(&posting.debit_line.debit, &posting.entry.total_debits);
            prop_assert_eq!(&posting.credit_line.credit, &posting.entry.total_credits);
        }
    }
}
