//! Postgres-backed ledger store.
//!
//! All writes for one posting happen inside a single database transaction;
//! a crash or error mid-sequence leaves no partial ledger entry. The unique
//! index on `(tenant_id, source_transaction_id)` turns the idempotency
//! check-then-insert race into a `23505` which this store reports as
//! [`PostingInsert::AlreadyPosted`].

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use fincore_core::{
    AccountId, AccountingRuleId, CategoryId, CounterpartyId, FinancialAccountId,
    FinancialTransactionId, LedgerEntryId, LedgerLineId, TenantId,
};
use fincore_ledger::{
    AccountingRule, FinancialTransaction, LedgerEntry, LedgerLine, NewLedgerLine, NewPayable,
    NewPosting, TransactionKind,
};

use super::store::{CreatedPayable, LedgerStore, PostingError, PostingInsert};

/// Postgres implementation of [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lines_for(
        &self,
        entry_id: LedgerEntryId,
    ) -> Result<Vec<LedgerLine>, PostingError> {
        let rows = sqlx::query(
            r#"
            SELECT id, entry_id, account_id, debit, credit, narrative
            FROM ledger_lines
            WHERE entry_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(entry_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_lines", e))?;

        rows.iter()
            .map(|row| {
                LineRow::from_row(row)
                    .map(LedgerLine::from)
                    .map_err(|e| PostingError::Persistence(format!("bad line row: {e}")))
            })
            .collect()
    }

    async fn insert_line(
        tx: &mut Transaction<'_, Postgres>,
        entry_id: LedgerEntryId,
        line: &NewLedgerLine,
    ) -> Result<LedgerLine, PostingError> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_lines (entry_id, account_id, debit, credit, narrative)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(entry_id.get())
        .bind(line.account_id.get())
        .bind(&line.debit)
        .bind(&line.credit)
        .bind(&line.narrative)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_line", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| PostingError::Persistence(format!("missing line id: {e}")))?;

        Ok(LedgerLine {
            id: LedgerLineId::new(id),
            entry_id,
            account_id: line.account_id,
            debit: line.debit.clone(),
            credit: line.credit.clone(),
            narrative: line.narrative.clone(),
        })
    }

    /// Insert header + lines inside `tx`. Returns `None` when the source
    /// transaction's unique index fires.
    async fn try_insert_posting(
        tx: &mut Transaction<'_, Postgres>,
        posting: &NewPosting,
    ) -> Result<Option<(LedgerEntry, Vec<LedgerLine>)>, PostingError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                tenant_id,
                entry_date,
                narrative,
                counterparty_id,
                financial_account_id,
                total_debits,
                total_credits,
                source_transaction_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
            RETURNING id
            "#,
        )
        .bind(posting.entry.tenant_id.get())
        .bind(posting.entry.entry_date)
        .bind(&posting.entry.narrative)
        .bind(posting.entry.counterparty_id.map(|c| c.get()))
        .bind(posting.entry.financial_account_id.map(|a| a.get()))
        .bind(&posting.entry.total_debits)
        .bind(posting.entry.source_transaction_id.get())
        .fetch_one(&mut **tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => return Ok(None),
            Err(e) => return Err(map_sqlx_error("insert_entry", e)),
        };

        let id: i64 = row
            .try_get("id")
            .map_err(|e| PostingError::Persistence(format!("missing entry id: {e}")))?;
        let entry_id = LedgerEntryId::new(id);

        let entry = LedgerEntry {
            id: entry_id,
            tenant_id: posting.entry.tenant_id,
            entry_date: posting.entry.entry_date,
            narrative: posting.entry.narrative.clone(),
            counterparty_id: posting.entry.counterparty_id,
            financial_account_id: posting.entry.financial_account_id,
            total_debits: posting.entry.total_debits.clone(),
            total_credits: posting.entry.total_credits.clone(),
            source_transaction_id: posting.entry.source_transaction_id,
        };

        let debit = Self::insert_line(tx, entry_id, &posting.debit_line).await?;
        let credit = Self::insert_line(tx, entry_id, &posting.credit_line).await?;

        Ok(Some((entry, vec![debit, credit])))
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(transaction_id = %id), err)]
    async fn load_transaction(
        &self,
        id: FinancialTransactionId,
    ) -> Result<Option<FinancialTransaction>, PostingError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, kind, category_id, counterparty_id, amount,
                   ledger_date, due_date, memo, financial_account_id
            FROM financial_transactions
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_transaction", e))?;

        row.map(|row| {
            let parsed = TransactionRow::from_row(&row)
                .map_err(|e| PostingError::Persistence(format!("bad transaction row: {e}")))?;
            FinancialTransaction::try_from(parsed)
        })
        .transpose()
    }

    async fn find_posting_for(
        &self,
        tenant_id: TenantId,
        source: FinancialTransactionId,
    ) -> Result<Option<(LedgerEntry, Vec<LedgerLine>)>, PostingError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, entry_date, narrative, counterparty_id,
                   financial_account_id, total_debits, total_credits,
                   source_transaction_id
            FROM ledger_entries
            WHERE tenant_id = $1 AND source_transaction_id = $2
            LIMIT 1
            "#,
        )
        .bind(tenant_id.get())
        .bind(source.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_posting", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entry: LedgerEntry = EntryRow::from_row(&row)
            .map_err(|e| PostingError::Persistence(format!("bad entry row: {e}")))?
            .into();
        let lines = self.lines_for(entry.id).await?;
        Ok(Some((entry, lines)))
    }

    async fn resolve_rule(
        &self,
        tenant_id: TenantId,
        origin: TransactionKind,
        category_id: CategoryId,
    ) -> Result<Option<AccountingRule>, PostingError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, origin, subtype, category_id,
                   debit_account_id, credit_account_id, automatic, active, description
            FROM accounting_rules
            WHERE tenant_id = $1
              AND origin = $2
              AND category_id = $3
              AND automatic = TRUE
              AND active = TRUE
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(tenant_id.get())
        .bind(origin.as_str())
        .bind(category_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("resolve_rule", e))?;

        row.map(|row| {
            let parsed = RuleRow::from_row(&row)
                .map_err(|e| PostingError::Persistence(format!("bad rule row: {e}")))?;
            AccountingRule::try_from(parsed)
        })
        .transpose()
    }

    #[instrument(skip(self, posting), fields(source = %posting.entry.source_transaction_id), err)]
    async fn insert_posting(&self, posting: NewPosting) -> Result<PostingInsert, PostingError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        match Self::try_insert_posting(&mut tx, &posting).await? {
            Some((entry, lines)) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit", e))?;
                Ok(PostingInsert::Created { entry, lines })
            }
            None => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                let (entry, lines) = self
                    .find_posting_for(
                        posting.entry.tenant_id,
                        posting.entry.source_transaction_id,
                    )
                    .await?
                    .ok_or_else(|| {
                        PostingError::Persistence(
                            "unique violation on insert but no existing posting found"
                                .to_string(),
                        )
                    })?;
                Ok(PostingInsert::AlreadyPosted { entry, lines })
            }
        }
    }

    #[instrument(
        skip(self, input),
        fields(tenant_id = %input.tenant_id, category_id = %input.category_id),
        err
    )]
    async fn create_payable_posted(
        &self,
        input: NewPayable,
    ) -> Result<CreatedPayable, PostingError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO financial_transactions (
                tenant_id, kind, category_id, counterparty_id, amount,
                ledger_date, due_date, status, memo, financial_account_id
            )
            VALUES ($1, 'payable', $2, $3, $4, $5, $6, 'pending', $7, $8)
            RETURNING id
            "#,
        )
        .bind(input.tenant_id.get())
        .bind(input.category_id.get())
        .bind(input.counterparty_id.map(|c| c.get()))
        .bind(input.amount.abs())
        .bind(input.ledger_date)
        .bind(input.due_date)
        .bind(&input.memo)
        .bind(input.financial_account_id.map(|a| a.get()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        let tx_id: i64 = inserted
            .try_get("id")
            .map_err(|e| PostingError::Persistence(format!("missing transaction id: {e}")))?;
        let transaction_id = FinancialTransactionId::new(tx_id);

        // Rule resolution inside the same transaction: no rule, no payable.
        let rule_row = sqlx::query(
            r#"
            SELECT id, tenant_id, origin, subtype, category_id,
                   debit_account_id, credit_account_id, automatic, active, description
            FROM accounting_rules
            WHERE tenant_id = $1
              AND origin = 'payable'
              AND category_id = $2
              AND automatic = TRUE
              AND active = TRUE
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(input.tenant_id.get())
        .bind(input.category_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("resolve_rule", e))?;

        let Some(rule_row) = rule_row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(PostingError::NoActiveRule {
                origin: TransactionKind::Payable,
                category_id: input.category_id,
            });
        };
        let rule: AccountingRule = RuleRow::from_row(&rule_row)
            .map_err(|e| PostingError::Persistence(format!("bad rule row: {e}")))?
            .try_into()?;

        let posting = NewPosting::from_payable_input(&input, transaction_id, &rule);
        let Some((entry, _lines)) = Self::try_insert_posting(&mut tx, &posting).await? else {
            // The transaction id is fresh; a unique hit here means the
            // database is inconsistent.
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(PostingError::Persistence(
                "unique violation while posting a freshly created payable".to_string(),
            ));
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(CreatedPayable {
            transaction_id,
            entry_id: entry.id,
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> PostingError {
    PostingError::Persistence(format!("{operation}: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct TransactionRow {
    id: i64,
    tenant_id: i64,
    kind: String,
    category_id: i64,
    counterparty_id: Option<i64>,
    amount: BigDecimal,
    ledger_date: NaiveDate,
    due_date: NaiveDate,
    memo: String,
    financial_account_id: Option<i64>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for TransactionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            kind: row.try_get("kind")?,
            category_id: row.try_get("category_id")?,
            counterparty_id: row.try_get("counterparty_id")?,
            amount: row.try_get("amount")?,
            ledger_date: row.try_get("ledger_date")?,
            due_date: row.try_get("due_date")?,
            memo: row.try_get("memo")?,
            financial_account_id: row.try_get("financial_account_id")?,
        })
    }
}

impl TryFrom<TransactionRow> for FinancialTransaction {
    type Error = PostingError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<TransactionKind>()
            .map_err(|e| PostingError::Persistence(format!("bad transaction kind: {e}")))?;
        Ok(FinancialTransaction {
            id: FinancialTransactionId::new(row.id),
            tenant_id: TenantId::new(row.tenant_id),
            kind,
            category_id: CategoryId::new(row.category_id),
            counterparty_id: row.counterparty_id.map(CounterpartyId::new),
            amount: row.amount,
            ledger_date: row.ledger_date,
            due_date: row.due_date,
            memo: row.memo,
            financial_account_id: row.financial_account_id.map(FinancialAccountId::new),
        })
    }
}

#[derive(Debug)]
struct RuleRow {
    id: i64,
    tenant_id: i64,
    origin: String,
    subtype: Option<String>,
    category_id: i64,
    debit_account_id: i64,
    credit_account_id: i64,
    automatic: bool,
    active: bool,
    description: String,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for RuleRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(RuleRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            origin: row.try_get("origin")?,
            subtype: row.try_get("subtype")?,
            category_id: row.try_get("category_id")?,
            debit_account_id: row.try_get("debit_account_id")?,
            credit_account_id: row.try_get("credit_account_id")?,
            automatic: row.try_get("automatic")?,
            active: row.try_get("active")?,
            description: row.try_get("description")?,
        })
    }
}

impl TryFrom<RuleRow> for AccountingRule {
    type Error = PostingError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let origin = row
            .origin
            .parse::<TransactionKind>()
            .map_err(|e| PostingError::Persistence(format!("bad rule origin: {e}")))?;
        Ok(AccountingRule {
            id: AccountingRuleId::new(row.id),
            tenant_id: TenantId::new(row.tenant_id),
            origin,
            subtype: row.subtype,
            category_id: CategoryId::new(row.category_id),
            debit_account_id: AccountId::new(row.debit_account_id),
            credit_account_id: AccountId::new(row.credit_account_id),
            automatic: row.automatic,
            active: row.active,
            description: row.description,
        })
    }
}

#[derive(Debug)]
struct EntryRow {
    id: i64,
    tenant_id: i64,
    entry_date: NaiveDate,
    narrative: String,
    counterparty_id: Option<i64>,
    financial_account_id: Option<i64>,
    total_debits: BigDecimal,
    total_credits: BigDecimal,
    source_transaction_id: i64,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for EntryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EntryRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            entry_date: row.try_get("entry_date")?,
            narrative: row.try_get("narrative")?,
            counterparty_id: row.try_get("counterparty_id")?,
            financial_account_id: row.try_get("financial_account_id")?,
            total_debits: row.try_get("total_debits")?,
            total_credits: row.try_get("total_credits")?,
            source_transaction_id: row.try_get("source_transaction_id")?,
        })
    }
}

impl From<EntryRow> for LedgerEntry {
    fn from(row: EntryRow) -> Self {
        LedgerEntry {
            id: LedgerEntryId::new(row.id),
            tenant_id: TenantId::new(row.tenant_id),
            entry_date: row.entry_date,
            narrative: row.narrative,
            counterparty_id: row.counterparty_id.map(CounterpartyId::new),
            financial_account_id: row.financial_account_id.map(FinancialAccountId::new),
            total_debits: row.total_debits,
            total_credits: row.total_credits,
            source_transaction_id: FinancialTransactionId::new(row.source_transaction_id),
        }
    }
}

#[derive(Debug)]
struct LineRow {
    id: i64,
    entry_id: i64,
    account_id: i64,
    debit: BigDecimal,
    credit: BigDecimal,
    narrative: String,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for LineRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineRow {
            id: row.try_get("id")?,
            entry_id: row.try_get("entry_id")?,
            account_id: row.try_get("account_id")?,
            debit: row.try_get("debit")?,
            credit: row.try_get("credit")?,
            narrative: row.try_get("narrative")?,
        })
    }
}

impl From<LineRow> for LedgerLine {
    fn from(row: LineRow) -> Self {
        LedgerLine {
            id: LedgerLineId::new(row.id),
            entry_id: LedgerEntryId::new(row.entry_id),
            account_id: AccountId::new(row.account_id),
            debit: row.debit,
            credit: row.credit,
            narrative: row.narrative,
        }
    }
}
