use crate::error::{LedgerError, LedgerResult};
use crate::models::ServiceType;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Business constants of the credit ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Months a grant stays valid after issuance
    pub grant_validity_months: u32,
    pub single_session_credits: i32,
    pub package_session_credits: i32,
    pub default_duration_minutes: i32,
    /// Package grants at or below this remaining count raise a dashboard alert
    pub low_balance_threshold: u32,
    /// Let reconciliation issue grants for paid single payments with no grant
    pub regrant_legacy_single: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            grant_validity_months: 3,
            single_session_credits: 1,
            package_session_credits: 4,
            default_duration_minutes: 50,
            low_balance_threshold: 1,
            regrant_legacy_single: false,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> LedgerResult<()> {
        if self.single_session_credits != 1 {
            return Err(LedgerError::Config(
                "single_session_credits must be 1 so single grants stay in the single bucket".to_string(),
            ));
        }
        if self.package_session_credits < 2 {
            return Err(LedgerError::Config(
                "package_session_credits must be greater than 1".to_string(),
            ));
        }
        if self.default_duration_minutes <= 0 {
            return Err(LedgerError::Config(
                "default_duration_minutes must be positive".to_string(),
            ));
        }
        if self.grant_validity_months == 0 {
            return Err(LedgerError::Config(
                "grant_validity_months must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Credits issued for a payment of the given service type.
    pub fn credits_for(&self, service_type: ServiceType) -> i32 {
        match service_type {
            ServiceType::Single => self.single_session_credits,
            ServiceType::Package => self.package_session_credits,
        }
    }

    pub fn expiry_from(&self, issued_on: NaiveDate) -> Option<NaiveDate> {
        issued_on.checked_add_months(Months::new(self.grant_validity_months))
    }
}
