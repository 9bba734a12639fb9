//! In-memory ledger store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use fincore_core::{
    AccountId, AccountingRuleId, CategoryId, FinancialTransactionId, LedgerEntryId, LedgerLineId,
    TenantId,
};
use fincore_ledger::{
    AccountingRule, FinancialTransaction, LedgerEntry, LedgerLine, NewLedgerLine, NewPayable,
    NewPosting, TransactionKind,
};

use super::store::{CreatedPayable, LedgerStore, PostingError, PostingInsert};

#[derive(Debug, Default)]
struct Inner {
    transactions: HashMap<i64, FinancialTransaction>,
    rules: Vec<AccountingRule>,
    entries: HashMap<i64, LedgerEntry>,
    lines: Vec<LedgerLine>,
    next_transaction_id: i64,
    next_rule_id: i64,
    next_entry_id: i64,
    next_line_id: i64,
}

impl Inner {
    fn alloc(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn lines_for(&self, entry_id: LedgerEntryId) -> Vec<LedgerLine> {
        let mut lines: Vec<_> = self
            .lines
            .iter()
            .filter(|l| l.entry_id == entry_id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.id);
        lines
    }

    fn posting_for(
        &self,
        tenant_id: TenantId,
        source: FinancialTransactionId,
    ) -> Option<(LedgerEntry, Vec<LedgerLine>)> {
        self.entries
            .values()
            .find(|e| e.tenant_id == tenant_id && e.source_transaction_id == source)
            .cloned()
            .map(|entry| {
                let lines = self.lines_for(entry.id);
                (entry, lines)
            })
    }

    fn push_line(&mut self, entry_id: LedgerEntryId, line: NewLedgerLine) -> LedgerLine {
        let id = LedgerLineId::new(Self::alloc(&mut self.next_line_id));
        let stored = LedgerLine {
            id,
            entry_id,
            account_id: line.account_id,
            debit: line.debit,
            credit: line.credit,
            narrative: line.narrative,
        };
        self.lines.push(stored.clone());
        stored
    }

    fn insert_posting(&mut self, posting: NewPosting) -> PostingInsert {
        let tenant_id = posting.entry.tenant_id;
        let source = posting.entry.source_transaction_id;

        // The (tenant, source transaction) pair is unique, as in Postgres.
        if let Some((entry, lines)) = self.posting_for(tenant_id, source) {
            return PostingInsert::AlreadyPosted { entry, lines };
        }

        let entry_id = LedgerEntryId::new(Self::alloc(&mut self.next_entry_id));
        let entry = LedgerEntry {
            id: entry_id,
            tenant_id,
            entry_date: posting.entry.entry_date,
            narrative: posting.entry.narrative,
            counterparty_id: posting.entry.counterparty_id,
            financial_account_id: posting.entry.financial_account_id,
            total_debits: posting.entry.total_debits,
            total_credits: posting.entry.total_credits,
            source_transaction_id: source,
        };
        self.entries.insert(entry_id.get(), entry.clone());

        let debit = self.push_line(entry_id, posting.debit_line);
        let credit = self.push_line(entry_id, posting.credit_line);

        PostingInsert::Created {
            entry,
            lines: vec![debit, credit],
        }
    }
}

/// In-memory ledger store, mirroring the Postgres semantics (including the
/// unique source-transaction constraint).
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed a financial transaction, as an upstream workflow would.
    pub fn seed_transaction(
        &self,
        kind: TransactionKind,
        input: NewPayable,
    ) -> FinancialTransaction {
        let mut inner = self.inner.write().unwrap();
        let id = FinancialTransactionId::new(Inner::alloc(&mut inner.next_transaction_id));
        let tx = FinancialTransaction {
            id,
            tenant_id: input.tenant_id,
            kind,
            category_id: input.category_id,
            counterparty_id: input.counterparty_id,
            amount: input.amount,
            ledger_date: input.ledger_date,
            due_date: input.due_date,
            memo: input.memo,
            financial_account_id: input.financial_account_id,
        };
        inner.transactions.insert(id.get(), tx.clone());
        tx
    }

    /// Seed an accounting rule, as configuration tooling would.
    pub fn seed_rule(
        &self,
        tenant_id: TenantId,
        origin: TransactionKind,
        category_id: CategoryId,
        debit_account_id: AccountId,
        credit_account_id: AccountId,
        automatic: bool,
        active: bool,
    ) -> AccountingRule {
        let mut inner = self.inner.write().unwrap();
        let id = AccountingRuleId::new(Inner::alloc(&mut inner.next_rule_id));
        let rule = AccountingRule {
            id,
            tenant_id,
            origin,
            subtype: None,
            category_id,
            debit_account_id,
            credit_account_id,
            automatic,
            active,
            description: String::new(),
        };
        inner.rules.push(rule.clone());
        rule
    }

    pub fn entry_count(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn line_count(&self) -> usize {
        self.inner.read().unwrap().lines.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.read().unwrap().transactions.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load_transaction(
        &self,
        id: FinancialTransactionId,
    ) -> Result<Option<FinancialTransaction>, PostingError> {
        Ok(self.inner.read().unwrap().transactions.get(&id.get()).cloned())
    }

    async fn find_posting_for(
        &self,
        tenant_id: TenantId,
        source: FinancialTransactionId,
    ) -> Result<Option<(LedgerEntry, Vec<LedgerLine>)>, PostingError> {
        Ok(self.inner.read().unwrap().posting_for(tenant_id, source))
    }

    async fn resolve_rule(
        &self,
        tenant_id: TenantId,
        origin: TransactionKind,
        category_id: CategoryId,
    ) -> Result<Option<AccountingRule>, PostingError> {
        let inner = self.inner.read().unwrap();
        let mut matches: Vec<_> = inner
            .rules
            .iter()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.origin == origin
                    && r.category_id == category_id
                    && r.is_eligible()
            })
            .collect();
        matches.sort_by_key(|r| r.id);
        Ok(matches.first().map(|r| (*r).clone()))
    }

    async fn insert_posting(&self, posting: NewPosting) -> Result<PostingInsert, PostingError> {
        Ok(self.inner.write().unwrap().insert_posting(posting))
    }

    async fn create_payable_posted(
        &self,
        input: NewPayable,
    ) -> Result<CreatedPayable, PostingError> {
        let mut inner = self.inner.write().unwrap();

        // Rule resolution happens inside the same unit of work: no rule means
        // no financial transaction either.
        let rule = {
            let mut matches: Vec<_> = inner
                .rules
                .iter()
                .filter(|r| {
                    r.tenant_id == input.tenant_id
                        && r.origin == TransactionKind::Payable
                        && r.category_id == input.category_id
                        && r.is_eligible()
                })
                .collect();
            matches.sort_by_key(|r| r.id);
            matches.first().map(|r| (*r).clone())
        }
        .ok_or(PostingError::NoActiveRule {
            origin: TransactionKind::Payable,
            category_id: input.category_id,
        })?;

        let tx_id = FinancialTransactionId::new(Inner::alloc(&mut inner.next_transaction_id));
        let tx = FinancialTransaction {
            id: tx_id,
            tenant_id: input.tenant_id,
            kind: TransactionKind::Payable,
            category_id: input.category_id,
            counterparty_id: input.counterparty_id,
            amount: input.amount.abs(),
            ledger_date: input.ledger_date,
            due_date: input.due_date,
            memo: input.memo.clone(),
            financial_account_id: input.financial_account_id,
        };
        inner.transactions.insert(tx_id.get(), tx);

        let posting = NewPosting::from_payable_input(&input, tx_id, &rule);
        match inner.insert_posting(posting) {
            PostingInsert::Created { entry, .. } => Ok(CreatedPayable {
                transaction_id: tx_id,
                entry_id: entry.id,
            }),
            PostingInsert::AlreadyPosted { .. } => Err(PostingError::Persistence(
                "posting for a freshly created transaction already existed".to_string(),
            )),
        }
    }
}
