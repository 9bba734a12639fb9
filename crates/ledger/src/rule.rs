//! Accounting rules map a (tenant, origin, category) triple to a debit and a
//! credit account.

use serde::{Deserialize, Serialize};

use fincore_core::{AccountId, AccountingRuleId, CategoryId, TenantId};

use crate::transaction::TransactionKind;

/// A configured posting rule.
///
/// Several rules may exist for the same key; only `automatic && active` rules
/// take part in resolution, and the lowest id wins. The system assumes
/// configuration hygiene (one enabled rule per key) rather than enforcing
/// uniqueness at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingRule {
    pub id: AccountingRuleId,
    pub tenant_id: TenantId,
    pub origin: TransactionKind,
    pub subtype: Option<String>,
    pub category_id: CategoryId,
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    pub automatic: bool,
    pub active: bool,
    pub description: String,
}

impl AccountingRule {
    /// Whether this rule participates in automatic resolution.
    pub fn is_eligible(&self) -> bool {
        self.automatic && self.active
    }
}
