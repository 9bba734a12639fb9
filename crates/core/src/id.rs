//! Strongly-typed identifiers used across the domain.
//!
//! All persistent identity in this system is a Postgres `BIGSERIAL`, so the
//! newtypes wrap `i64`. The wrappers exist to keep a ledger entry id from
//! ever being passed where a financial transaction id is expected.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

macro_rules! impl_i64_newtype {
    ($(#[$doc:meta])* $t:ident, $name:literal) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(i64);

        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = i64::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

impl_i64_newtype!(
    /// Identifier of a tenant (multi-tenant boundary).
    TenantId, "TenantId");
impl_i64_newtype!(
    /// Identifier of a financial category.
    CategoryId, "CategoryId");
impl_i64_newtype!(
    /// Identifier of a chart-of-accounts account.
    AccountId, "AccountId");
impl_i64_newtype!(
    /// Identifier of a counterparty (customer/supplier).
    CounterpartyId, "CounterpartyId");
impl_i64_newtype!(
    /// Identifier of a financial account (bank/cash account).
    FinancialAccountId, "FinancialAccountId");
impl_i64_newtype!(
    /// Identifier of a financial transaction (payable, receivable, payment).
    FinancialTransactionId, "FinancialTransactionId");
impl_i64_newtype!(
    /// Identifier of a ledger entry header.
    LedgerEntryId, "LedgerEntryId");
impl_i64_newtype!(
    /// Identifier of a ledger entry line.
    LedgerLineId, "LedgerLineId");
impl_i64_newtype!(
    /// Identifier of an accounting rule.
    AccountingRuleId, "AccountingRuleId");
impl_i64_newtype!(
    /// Identifier of an outbox event row.
    OutboxEventId, "OutboxEventId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let id: TenantId = "42".parse().unwrap();
        assert_eq!(id, TenantId::new(42));
        assert_eq!(id.to_string(), "42");
        assert_eq!(i64::from(id), 42);
    }

    #[test]
    fn rejects_non_numeric() {
        let err = "not-a-number".parse::<LedgerEntryId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
    }
}
