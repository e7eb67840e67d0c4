use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::models::*;
use crate::repository::LedgerRepository;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// What happened when a payment went through the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GrantOutcome {
    Issued { grant: CreditGrant },
    AlreadyGranted { grant_id: Uuid },
    /// Payment is not Paid, or was already Paid before this save
    NotEligible,
    /// Payment is saved but has no grant; reconciliation will pick it up
    Failed { reason: String },
}

impl GrantOutcome {
    pub fn grant_id(&self) -> Option<Uuid> {
        match self {
            Self::Issued { grant } => Some(grant.id),
            Self::AlreadyGranted { grant_id } => Some(*grant_id),
            Self::NotEligible | Self::Failed { .. } => None,
        }
    }
}

/// Issues exactly one credit grant per paid payment
pub struct CreditBridge {
    repository: Arc<dyn LedgerRepository>,
    config: LedgerConfig,
}

impl CreditBridge {
    pub fn new(repository: Arc<dyn LedgerRepository>, config: LedgerConfig) -> Self {
        Self { repository, config }
    }

    /// The grant a payment would fund, issued `today`
    pub fn grant_from(&self, payment: &Payment, today: NaiveDate) -> CreditGrant {
        CreditGrant {
            id: Uuid::new_v4(),
            professional_id: payment.professional_id,
            patient_id: payment.patient_id,
            total_sessions: self.config.credits_for(payment.service_type),
            expiry_date: self.config.expiry_from(today),
            status: GrantStatus::Active,
            payment_id: Some(payment.id),
            created_at: Utc::now(),
        }
    }

    /// Issue the grant for `payment` if it is Paid and not granted yet.
    ///
    /// Never fails: storage errors come back as `GrantOutcome::Failed`
    /// with the payment left in place.
    pub async fn grant_for_payment(&self, payment: &Payment, today: NaiveDate) -> GrantOutcome {
        if !payment.is_paid() {
            return GrantOutcome::NotEligible;
        }

        match self.try_grant(payment, today).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    payment_id = %payment.id,
                    patient_id = %payment.patient_id,
                    error = %e,
                    "Paid payment left without a credit grant"
                );
                GrantOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Bridge step for an edited payment: only a flip into Paid issues a grant.
    ///
    /// Resaving a payment that was already Paid reports its existing grant,
    /// or `NotEligible` when it has none (legacy rows and earlier failures
    /// are left to reconciliation).
    pub async fn grant_for_update(
        &self,
        previous: &Payment,
        current: &Payment,
        today: NaiveDate,
    ) -> GrantOutcome {
        if !previous.is_paid() {
            return self.grant_for_payment(current, today).await;
        }
        if !current.is_paid() {
            return GrantOutcome::NotEligible;
        }

        match self.repository.find_grant_for_payment(current.id).await {
            Ok(Some(existing)) => GrantOutcome::AlreadyGranted {
                grant_id: existing.id,
            },
            Ok(None) => {
                info!(payment_id = %current.id, "Paid payment resaved without a grant, left to reconciliation");
                GrantOutcome::NotEligible
            }
            Err(e) => GrantOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    async fn try_grant(&self, payment: &Payment, today: NaiveDate) -> LedgerResult<GrantOutcome> {
        if let Some(existing) = self.repository.find_grant_for_payment(payment.id).await? {
            info!(payment_id = %payment.id, grant_id = %existing.id, "Payment already granted, skipping");
            return Ok(GrantOutcome::AlreadyGranted {
                grant_id: existing.id,
            });
        }

        match self
            .repository
            .insert_grant_if_absent(self.grant_from(payment, today))
            .await?
        {
            Some(grant) => {
                info!(
                    payment_id = %payment.id,
                    grant_id = %grant.id,
                    total_sessions = grant.total_sessions,
                    expiry_date = ?grant.expiry_date,
                    "Credit grant issued"
                );
                Ok(GrantOutcome::Issued { grant })
            }
            None => {
                // lost a race with a concurrent save of the same payment
                let grant_id = self
                    .repository
                    .find_grant_for_payment(payment.id)
                    .await?
                    .map(|g| g.id)
                    .unwrap_or_default();
                info!(payment_id = %payment.id, grant_id = %grant_id, "Payment already granted, skipping");
                Ok(GrantOutcome::AlreadyGranted { grant_id })
            }
        }
    }
}
