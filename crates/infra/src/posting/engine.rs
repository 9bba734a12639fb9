//! The ledger posting engine.

use tracing::{info, instrument};

use fincore_core::FinancialTransactionId;
use fincore_ledger::{NewPayable, NewPosting, TransactionKind};

use super::store::{CreatedPayable, LedgerStore, PostingError, PostingInsert, PostingResult};

/// Derives balanced double-entry postings from financial transactions.
///
/// Safe to call repeatedly for the same source transaction: the first call
/// writes, every later call returns the existing entry with
/// `already_existed = true`. The check-then-insert window is closed by the
/// unique source-transaction constraint; the store reports a constraint hit
/// as [`PostingInsert::AlreadyPosted`].
#[derive(Debug, Clone)]
pub struct PostingEngine<S> {
    store: S,
}

impl<S: LedgerStore> PostingEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Post the ledger entry for an existing payable.
    ///
    /// Only `payable` transactions are accepted; this is a deliberate narrow
    /// contract, not a limitation to silently widen.
    #[instrument(skip(self), fields(transaction_id = %id), err)]
    pub async fn post_from_payable(
        &self,
        id: FinancialTransactionId,
    ) -> Result<PostingResult, PostingError> {
        let tx = self
            .store
            .load_transaction(id)
            .await?
            .ok_or(PostingError::TransactionNotFound(id))?;

        if tx.kind != TransactionKind::Payable {
            return Err(PostingError::UnsupportedKind(tx.kind));
        }

        if let Some((entry, lines)) = self.store.find_posting_for(tx.tenant_id, id).await? {
            info!(entry_id = %entry.id, "payable already posted");
            return Ok(PostingResult {
                already_existed: true,
                entry,
                lines,
            });
        }

        let rule = self
            .store
            .resolve_rule(tx.tenant_id, TransactionKind::Payable, tx.category_id)
            .await?
            .ok_or(PostingError::NoActiveRule {
                origin: TransactionKind::Payable,
                category_id: tx.category_id,
            })?;

        let posting = NewPosting::from_transaction(&tx, &rule);
        match self.store.insert_posting(posting).await? {
            PostingInsert::Created { entry, lines } => {
                info!(entry_id = %entry.id, rule_id = %rule.id, "payable posted");
                Ok(PostingResult {
                    already_existed: false,
                    entry,
                    lines,
                })
            }
            PostingInsert::AlreadyPosted { entry, lines } => {
                // A concurrent caller won the insert race.
                info!(entry_id = %entry.id, "payable posted concurrently elsewhere");
                Ok(PostingResult {
                    already_existed: true,
                    entry,
                    lines,
                })
            }
        }
    }

    /// Create a payable and its posting as one atomic unit.
    #[instrument(
        skip(self, input),
        fields(tenant_id = %input.tenant_id, category_id = %input.category_id),
        err
    )]
    pub async fn create_payable_and_post(
        &self,
        input: NewPayable,
    ) -> Result<CreatedPayable, PostingError> {
        let created = self.store.create_payable_posted(input).await?;
        info!(
            transaction_id = %created.transaction_id,
            entry_id = %created.entry_id,
            "payable created and posted"
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::sync::Arc;

    use fincore_core::{AccountId, CategoryId, TenantId};
    use fincore_ledger::NewPayable;

    use crate::posting::InMemoryLedgerStore;

    fn payable_input(tenant: i64, category: i64, amount: &str) -> NewPayable {
        NewPayable {
            tenant_id: TenantId::new(tenant),
            category_id: CategoryId::new(category),
            counterparty_id: None,
            amount: amount.parse().unwrap(),
            ledger_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
            memo: "office supplies".to_string(),
            financial_account_id: None,
        }
    }

    fn engine_with_store() -> (PostingEngine<Arc<InMemoryLedgerStore>>, Arc<InMemoryLedgerStore>) {
        let store = InMemoryLedgerStore::arc();
        (PostingEngine::new(store.clone()), store)
    }

    #[tokio::test]
    async fn posts_a_balanced_pair_for_a_payable() {
        let (engine, store) = engine_with_store();
        store.seed_rule(
            TenantId::new(1),
            TransactionKind::Payable,
            CategoryId::new(7),
            AccountId::new(301),
            AccountId::new(201),
            true,
            true,
        );
        let tx = store.seed_transaction(
            TransactionKind::Payable,
            payable_input(1, 7, "1500.00"),
        );

        let result = engine.post_from_payable(tx.id).await.unwrap();
        assert!(!result.already_existed);

        let expected: BigDecimal = "1500.00".parse().unwrap();
        assert_eq!(result.entry.total_debits, expected);
        assert_eq!(result.entry.total_credits, expected);
        assert_eq!(result.entry.source_transaction_id, tx.id);
        assert!(result.entry.is_balanced(&result.lines));

        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.lines[0].account_id, AccountId::new(301));
        assert_eq!(result.lines[0].debit, expected);
        assert_eq!(result.lines[0].credit, BigDecimal::from(0));
        assert_eq!(result.lines[1].account_id, AccountId::new(201));
        assert_eq!(result.lines[1].debit, BigDecimal::from(0));
        assert_eq!(result.lines[1].credit, expected);
    }

    #[tokio::test]
    async fn posting_twice_is_idempotent() {
        let (engine, store) = engine_with_store();
        store.seed_rule(
            TenantId::new(1),
            TransactionKind::Payable,
            CategoryId::new(7),
            AccountId::new(301),
            AccountId::new(201),
            true,
            true,
        );
        let tx = store.seed_transaction(
            TransactionKind::Payable,
            payable_input(1, 7, "99.90"),
        );

        let first = engine.post_from_payable(tx.id).await.unwrap();
        let second = engine.post_from_payable(tx.id).await.unwrap();

        assert!(!first.already_existed);
        assert!(second.already_existed);
        assert_eq!(first.entry.id, second.entry.id);
        assert_eq!(first.lines, second.lines);
        assert_eq!(store.entry_count(), 1);
        assert_eq!(store.line_count(), 2);
    }

    #[tokio::test]
    async fn missing_transaction_is_not_found() {
        let (engine, _store) = engine_with_store();
        let err = engine
            .post_from_payable(FinancialTransactionId::new(999))
            .await
            .unwrap_err();
        assert!(matches!(err, PostingError::TransactionNotFound(_)));
    }

    #[tokio::test]
    async fn non_payable_kinds_are_rejected() {
        let (engine, store) = engine_with_store();
        let tx = store.seed_transaction(
            TransactionKind::Receivable,
            payable_input(1, 7, "10.00"),
        );

        let err = engine.post_from_payable(tx.id).await.unwrap_err();
        assert!(matches!(
            err,
            PostingError::UnsupportedKind(TransactionKind::Receivable)
        ));
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn missing_rule_writes_nothing() {
        let (engine, store) = engine_with_store();
        // Rule exists but is disabled on both flags that matter.
        store.seed_rule(
            TenantId::new(1),
            TransactionKind::Payable,
            CategoryId::new(7),
            AccountId::new(301),
            AccountId::new(201),
            false,
            true,
        );
        store.seed_rule(
            TenantId::new(1),
            TransactionKind::Payable,
            CategoryId::new(7),
            AccountId::new(301),
            AccountId::new(201),
            true,
            false,
        );
        let tx = store.seed_transaction(
            TransactionKind::Payable,
            payable_input(1, 7, "10.00"),
        );

        let err = engine.post_from_payable(tx.id).await.unwrap_err();
        assert!(matches!(err, PostingError::NoActiveRule { .. }));
        assert_eq!(store.entry_count(), 0);
        assert_eq!(store.line_count(), 0);
    }

    #[tokio::test]
    async fn lowest_rule_id_wins_among_duplicates() {
        let (engine, store) = engine_with_store();
        let first = store.seed_rule(
            TenantId::new(1),
            TransactionKind::Payable,
            CategoryId::new(7),
            AccountId::new(301),
            AccountId::new(201),
            true,
            true,
        );
        store.seed_rule(
            TenantId::new(1),
            TransactionKind::Payable,
            CategoryId::new(7),
            AccountId::new(999),
            AccountId::new(888),
            true,
            true,
        );
        let tx = store.seed_transaction(
            TransactionKind::Payable,
            payable_input(1, 7, "10.00"),
        );

        let result = engine.post_from_payable(tx.id).await.unwrap();
        assert_eq!(result.lines[0].account_id, first.debit_account_id);
        assert_eq!(result.lines[1].account_id, first.credit_account_id);
    }

    #[tokio::test]
    async fn create_and_post_is_one_unit() {
        let (engine, store) = engine_with_store();
        store.seed_rule(
            TenantId::new(1),
            TransactionKind::Payable,
            CategoryId::new(7),
            AccountId::new(301),
            AccountId::new(201),
            true,
            true,
        );

        let created = engine
            .create_payable_and_post(payable_input(1, 7, "-1500.00"))
            .await
            .unwrap();

        let posted = engine
            .post_from_payable(created.transaction_id)
            .await
            .unwrap();
        assert!(posted.already_existed);
        assert_eq!(posted.entry.id, created.entry_id);
        // Sign is expressed through accounts, not the stored amount.
        assert_eq!(posted.entry.total_debits, "1500.00".parse::<BigDecimal>().unwrap());
    }

    #[tokio::test]
    async fn create_and_post_aborts_entirely_without_a_rule() {
        let (engine, store) = engine_with_store();

        let err = engine
            .create_payable_and_post(payable_input(1, 7, "10.00"))
            .await
            .unwrap_err();

        assert!(matches!(err, PostingError::NoActiveRule { .. }));
        assert_eq!(store.transaction_count(), 0);
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_insert_conflict_reports_already_existed() {
        let (engine, store) = engine_with_store();
        store.seed_rule(
            TenantId::new(1),
            TransactionKind::Payable,
            CategoryId::new(7),
            AccountId::new(301),
            AccountId::new(201),
            true,
            true,
        );
        let tx = store.seed_transaction(
            TransactionKind::Payable,
            payable_input(1, 7, "55.00"),
        );

        // Simulate losing the race: the rule + posting land between our
        // idempotency probe and the insert.
        let rule = store
            .resolve_rule(TenantId::new(1), TransactionKind::Payable, CategoryId::new(7))
            .await
            .unwrap()
            .unwrap();
        let loaded = store.load_transaction(tx.id).await.unwrap().unwrap();
        let posting = fincore_ledger::NewPosting::from_transaction(&loaded, &rule);
        store.insert_posting(posting.clone()).await.unwrap();

        let outcome = store.insert_posting(posting).await.unwrap();
        assert!(matches!(outcome, PostingInsert::AlreadyPosted { .. }));

        let result = engine.post_from_payable(tx.id).await.unwrap();
        assert!(result.already_existed);
        assert_eq!(store.entry_count(), 1);
    }
}
