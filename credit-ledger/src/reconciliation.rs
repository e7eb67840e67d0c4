use crate::bridge::{CreditBridge, GrantOutcome};
use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::models::*;
use crate::repository::LedgerRepository;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationFailure {
    pub payment_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Grants issued for payments that had none
    pub regranted: Vec<Uuid>,
    /// Single payments left to the ungranted-single balance rule
    pub skipped_legacy: Vec<Uuid>,
    pub failed: Vec<ReconciliationFailure>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.regranted.is_empty() && self.failed.is_empty()
    }
}

/// Integrity pass over paid payments and grant expiry
pub struct Reconciler {
    repository: Arc<dyn LedgerRepository>,
    bridge: CreditBridge,
    config: LedgerConfig,
}

impl Reconciler {
    pub fn new(repository: Arc<dyn LedgerRepository>, config: LedgerConfig) -> Self {
        Self {
            bridge: CreditBridge::new(repository.clone(), config.clone()),
            repository,
            config,
        }
    }

    /// `scope` limits the scan to one professional; `None` covers the whole store.
    pub async fn find_ungranted_paid_payments(
        &self,
        scope: Option<Uuid>,
    ) -> LedgerResult<Vec<Payment>> {
        let payments = self.repository.paid_payments_without_grant(scope).await?;
        for payment in &payments {
            warn!(
                payment_id = %payment.id,
                patient_id = %payment.patient_id,
                service_type = %payment.service_type,
                "Paid payment has no credit grant"
            );
        }
        Ok(payments)
    }

    /// Re-run the bridge for paid payments without a grant.
    ///
    /// Single payments are skipped unless `regrant_legacy_single` is set:
    /// the balance already counts them through the ungranted-single rule,
    /// and a grant would move their consumed sessions out of that rule.
    pub async fn run(
        &self,
        scope: Option<Uuid>,
        today: NaiveDate,
    ) -> LedgerResult<ReconciliationReport> {
        let mut report = ReconciliationReport::default();

        for payment in self.find_ungranted_paid_payments(scope).await? {
            if payment.service_type == ServiceType::Single && !self.config.regrant_legacy_single {
                report.skipped_legacy.push(payment.id);
                continue;
            }

            match self.bridge.grant_for_payment(&payment, today).await {
                GrantOutcome::Issued { .. } => report.regranted.push(payment.id),
                GrantOutcome::AlreadyGranted { .. } | GrantOutcome::NotEligible => {}
                GrantOutcome::Failed { reason } => report.failed.push(ReconciliationFailure {
                    payment_id: payment.id,
                    reason,
                }),
            }
        }

        info!(
            scope = ?scope,
            regranted = report.regranted.len(),
            skipped_legacy = report.skipped_legacy.len(),
            failed = report.failed.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Flip Active grants past their expiry date to Expired.
    pub async fn expire_lapsed_grants(
        &self,
        scope: Option<Uuid>,
        today: NaiveDate,
    ) -> LedgerResult<Vec<CreditGrant>> {
        let mut expired = Vec::new();
        for grant in self.repository.lapsed_grants(today, scope).await? {
            let updated = self
                .repository
                .update_grant_status(grant.id, GrantStatus::Expired)
                .await?;
            info!(grant_id = %updated.id, patient_id = %updated.patient_id, "Credit grant expired");
            expired.push(updated);
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryLedgerRepository;
    use rust_decimal::Decimal;

    async fn seed(repo: &InMemoryLedgerRepository, service_type: ServiceType) -> Payment {
        let patient = repo
            .insert_patient(
                NewPatient {
                    professional_id: Uuid::new_v4(),
                    name: "Davi".to_string(),
                    email: String::new(),
                    phone: String::new(),
                    cpf: None,
                    date_of_birth: None,
                    status: None,
                    notes: String::new(),
                    age_group: None,
                    guardian_name: None,
                }
                .into_patient(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            )
            .await
            .unwrap();
        repo.insert_payment(
            NewPayment {
                patient_id: patient.id,
                amount: Decimal::new(200, 0),
                date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                status: PaymentStatus::Paid,
                service_type,
                method: None,
                notes: None,
            }
            .into_payment(patient.professional_id),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_package_payment_is_regranted() {
        let repo = Arc::new(InMemoryLedgerRepository::new());
        let payment = seed(&repo, ServiceType::Package).await;
        let reconciler = Reconciler::new(repo.clone(), LedgerConfig::default());

        let report = reconciler
            .run(None, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .await
            .unwrap();

        assert_eq!(report.regranted, vec![payment.id]);
        assert!(repo.find_grant_for_payment(payment.id).await.unwrap().is_some());
        // second pass has nothing left to do
        let again = reconciler
            .run(None, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .await
            .unwrap();
        assert!(again.is_clean());
    }

    #[tokio::test]
    async fn test_single_payment_stays_legacy() {
        let repo = Arc::new(InMemoryLedgerRepository::new());
        let payment = seed(&repo, ServiceType::Single).await;
        let reconciler = Reconciler::new(repo.clone(), LedgerConfig::default());

        let report = reconciler
            .run(None, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .await
            .unwrap();

        assert_eq!(report.skipped_legacy, vec![payment.id]);
        assert!(repo.find_grant_for_payment(payment.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lapsed_grants_expire() {
        let repo = Arc::new(InMemoryLedgerRepository::new());
        let payment = seed(&repo, ServiceType::Package).await;
        let reconciler = Reconciler::new(repo.clone(), LedgerConfig::default());
        reconciler
            .run(None, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .await
            .unwrap();

        let none = reconciler
            .expire_lapsed_grants(None, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
            .await
            .unwrap();
        let expired = reconciler
            .expire_lapsed_grants(None, NaiveDate::from_ymd_opt(2024, 6, 2).unwrap())
            .await
            .unwrap();

        assert!(none.is_empty());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].payment_id, Some(payment.id));
        assert_eq!(expired[0].status, GrantStatus::Expired);
    }

    #[tokio::test]
    async fn test_scoped_run_leaves_other_professionals_alone() {
        let repo = Arc::new(InMemoryLedgerRepository::new());
        let mine = seed(&repo, ServiceType::Package).await;
        let theirs = seed(&repo, ServiceType::Package).await;
        let reconciler = Reconciler::new(repo.clone(), LedgerConfig::default());

        let report = reconciler
            .run(Some(mine.professional_id), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .await
            .unwrap();

        assert_eq!(report.regranted, vec![mine.id]);
        assert!(repo.find_grant_for_payment(theirs.id).await.unwrap().is_none());
    }
}
