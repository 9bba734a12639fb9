//! Ledger store abstraction.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use fincore_core::{CategoryId, FinancialTransactionId, LedgerEntryId, TenantId};
use fincore_ledger::{
    AccountingRule, FinancialTransaction, LedgerEntry, LedgerLine, NewPayable, NewPosting,
    TransactionKind,
};

/// Posting failure taxonomy.
///
/// The first three are caller errors: retrying without fixing input or
/// configuration will not help. `Persistence` surfaces a rolled-back write;
/// the caller may retry the whole call, which is safe because posting is
/// idempotent.
#[derive(Debug, Error)]
pub enum PostingError {
    #[error("financial transaction not found: {0}")]
    TransactionNotFound(FinancialTransactionId),

    #[error("unsupported transaction kind: {0}")]
    UnsupportedKind(TransactionKind),

    #[error("no active accounting rule for origin {origin} and category {category_id}")]
    NoActiveRule {
        origin: TransactionKind,
        category_id: CategoryId,
    },

    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Result of a posting request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostingResult {
    /// True when the transaction had already been posted and nothing was
    /// written by this call.
    pub already_existed: bool,
    pub entry: LedgerEntry,
    pub lines: Vec<LedgerLine>,
}

/// Result of a combined create-and-post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreatedPayable {
    pub transaction_id: FinancialTransactionId,
    pub entry_id: LedgerEntryId,
}

/// Outcome of an atomic posting insert.
#[derive(Debug, Clone, PartialEq)]
pub enum PostingInsert {
    Created {
        entry: LedgerEntry,
        lines: Vec<LedgerLine>,
    },
    /// The source-transaction unique constraint fired: another caller posted
    /// this transaction first. Carries the existing entry, re-read.
    AlreadyPosted {
        entry: LedgerEntry,
        lines: Vec<LedgerLine>,
    },
}

/// Storage contract for the posting engine.
///
/// `insert_posting` and `create_payable_posted` are atomic units of work: a
/// failure inside either leaves no partial header-without-lines state.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_transaction(
        &self,
        id: FinancialTransactionId,
    ) -> Result<Option<FinancialTransaction>, PostingError>;

    /// Find an existing posting for a source transaction, tenant-scoped.
    async fn find_posting_for(
        &self,
        tenant_id: TenantId,
        source: FinancialTransactionId,
    ) -> Result<Option<(LedgerEntry, Vec<LedgerLine>)>, PostingError>;

    /// Resolve the applicable rule: `automatic && active`, lowest id wins.
    /// Absence is a normal outcome, not an error.
    async fn resolve_rule(
        &self,
        tenant_id: TenantId,
        origin: TransactionKind,
        category_id: CategoryId,
    ) -> Result<Option<AccountingRule>, PostingError>;

    /// Atomically insert the header and its two lines.
    async fn insert_posting(&self, posting: NewPosting) -> Result<PostingInsert, PostingError>;

    /// Create the financial transaction and its posting as one atomic unit.
    /// A missing rule aborts the transaction insert too.
    async fn create_payable_posted(
        &self,
        input: NewPayable,
    ) -> Result<CreatedPayable, PostingError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn load_transaction(
        &self,
        id: FinancialTransactionId,
    ) -> Result<Option<FinancialTransaction>, PostingError> {
        (**self).load_transaction(id).await
    }

    async fn find_posting_for(
        &self,
        tenant_id: TenantId,
        source: FinancialTransactionId,
    ) -> Result<Option<(LedgerEntry, Vec<LedgerLine>)>, PostingError> {
        (**self).find_posting_for(tenant_id, source).await
    }

    async fn resolve_rule(
        &self,
        tenant_id: TenantId,
        origin: TransactionKind,
        category_id: CategoryId,
    ) -> Result<Option<AccountingRule>, PostingError> {
        (**self).resolve_rule(tenant_id, origin, category_id).await
    }

    async fn insert_posting(&self, posting: NewPosting) -> Result<PostingInsert, PostingError> {
        (**self).insert_posting(posting).await
    }

    async fn create_payable_posted(
        &self,
        input: NewPayable,
    ) -> Result<CreatedPayable, PostingError> {
        (**self).create_payable_posted(input).await
    }
}
