//! Schema bootstrap.
//!
//! Executed explicitly at service startup, never from request-time code
//! paths. Every statement is idempotent so repeated startups are harmless.

use sqlx::PgPool;

/// DDL for the ledger and outbox table groups.
///
/// Notable constraints:
/// - `ledger_entries_source_tx_idx` makes the posting idempotency key
///   (tenant + source transaction) unique; the posting engine treats a
///   violation on insert as "already posted".
/// - `event_outbox_dedup_idx` collapses concurrent enqueues of the same
///   logical event into one row via upsert. Rows with a NULL origin
///   component never collide (Postgres unique-index NULL semantics).
/// - `event_outbox_due_idx` serves the drain query.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS financial_transactions (
    id BIGSERIAL PRIMARY KEY,
    tenant_id BIGINT NOT NULL,
    kind TEXT NOT NULL,
    category_id BIGINT NOT NULL,
    counterparty_id BIGINT NULL,
    amount NUMERIC(14, 2) NOT NULL,
    ledger_date DATE NOT NULL,
    due_date DATE NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    memo TEXT NOT NULL DEFAULT '',
    financial_account_id BIGINT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS accounting_rules (
    id BIGSERIAL PRIMARY KEY,
    tenant_id BIGINT NOT NULL,
    origin TEXT NOT NULL,
    subtype TEXT NULL,
    category_id BIGINT NOT NULL,
    debit_account_id BIGINT NOT NULL,
    credit_account_id BIGINT NOT NULL,
    automatic BOOLEAN NOT NULL DEFAULT TRUE,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS accounting_rules_key_idx
    ON accounting_rules (tenant_id, origin, category_id);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id BIGSERIAL PRIMARY KEY,
    tenant_id BIGINT NOT NULL,
    entry_date DATE NOT NULL,
    narrative TEXT NOT NULL DEFAULT '',
    counterparty_id BIGINT NULL,
    financial_account_id BIGINT NULL,
    total_debits NUMERIC(14, 2) NOT NULL,
    total_credits NUMERIC(14, 2) NOT NULL,
    source_transaction_id BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS ledger_entries_source_tx_idx
    ON ledger_entries (tenant_id, source_transaction_id);

CREATE TABLE IF NOT EXISTS ledger_lines (
    id BIGSERIAL PRIMARY KEY,
    entry_id BIGINT NOT NULL REFERENCES ledger_entries (id),
    account_id BIGINT NOT NULL,
    debit NUMERIC(14, 2) NOT NULL DEFAULT 0,
    credit NUMERIC(14, 2) NOT NULL DEFAULT 0,
    narrative TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS ledger_lines_entry_idx
    ON ledger_lines (entry_id);

CREATE TABLE IF NOT EXISTS event_outbox (
    id BIGSERIAL PRIMARY KEY,
    event_name TEXT NOT NULL,
    payload JSONB NOT NULL DEFAULT '{}'::jsonb,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 10,
    last_error TEXT NULL,
    origin TEXT NULL,
    origin_id BIGINT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    sent_at TIMESTAMPTZ NULL,
    next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS event_outbox_dedup_idx
    ON event_outbox (event_name, origin, origin_id);

CREATE INDEX IF NOT EXISTS event_outbox_due_idx
    ON event_outbox (status, next_attempt_at, created_at);
"#;

/// Run the idempotent schema bootstrap against `pool`.
pub async fn bootstrap(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}
