use crate::bridge::{CreditBridge, GrantOutcome};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::insight::{InsightProvider, InsightService, UnconfiguredInsightProvider};
use crate::ledger;
use crate::models::*;
use crate::reconciliation::{ReconciliationReport, Reconciler};
use crate::reporting::{
    self, FinancialSummary, GrantUsage, LowBalanceAlert, PatientHistory, ReportPeriod,
};
use crate::repository::LedgerRepository;
use crate::scheduler::AppointmentScheduler;
use chrono::{NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Terminal result of a UI-initiated operation; never an unhandled error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome<T = ()> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> OperationOutcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            error_message: None,
            data: Some(data),
        }
    }

    pub fn failed(err: &LedgerError) -> Self {
        if err.is_user_correctable() {
            info!(error = %err, "Operation rejected");
        } else {
            error!(error = %err, "Operation failed");
        }
        Self {
            success: false,
            error_message: Some(err.user_message()),
            data: None,
        }
    }

    pub fn from_result(result: LedgerResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failed(&e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    pub patient_id: Uuid,
    pub single: u32,
    pub package: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedPayment {
    pub payment: Payment,
    pub grant: GrantOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantWithUsage {
    pub grant: CreditGrant,
    pub usage: GrantUsage,
}

/// Everything the UI layer calls into
pub struct ClinicLedger {
    repository: Arc<dyn LedgerRepository>,
    scheduler: AppointmentScheduler,
    bridge: CreditBridge,
    reconciler: Reconciler,
    insight: InsightService,
    config: LedgerConfig,
}

impl ClinicLedger {
    pub fn new(repository: Arc<dyn LedgerRepository>, config: LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;

        Ok(Self {
            scheduler: AppointmentScheduler::new(repository.clone(), config.clone()),
            bridge: CreditBridge::new(repository.clone(), config.clone()),
            reconciler: Reconciler::new(repository.clone(), config.clone()),
            insight: InsightService::new(Arc::new(UnconfiguredInsightProvider)),
            repository,
            config,
        })
    }

    #[must_use]
    pub fn with_insight_provider(mut self, provider: Arc<dyn InsightProvider>) -> Self {
        self.insight = InsightService::new(provider);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================================================================
    // BALANCE
    // ========================================================================

    pub async fn get_available_credits(
        &self,
        patient_id: Uuid,
        service_type: ServiceType,
    ) -> LedgerResult<u32> {
        self.scheduler.available_credits(patient_id, service_type).await
    }

    pub async fn credit_balance(&self, patient_id: Uuid) -> LedgerResult<CreditBalance> {
        let snapshot = self.repository.patient_ledger(patient_id).await?;
        Ok(CreditBalance {
            patient_id,
            single: ledger::available_credits(&snapshot, ServiceType::Single),
            package: ledger::available_credits(&snapshot, ServiceType::Package),
        })
    }

    // ========================================================================
    // APPOINTMENTS
    // ========================================================================

    pub async fn create_appointments(
        &self,
        patient_id: Uuid,
        service_type: ServiceType,
        slots: Vec<AppointmentSlot>,
        notes: Option<String>,
    ) -> OperationOutcome<Vec<Appointment>> {
        OperationOutcome::from_result(
            self.scheduler
                .create_appointments(patient_id, service_type, slots, notes)
                .await,
        )
    }

    pub async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> OperationOutcome<Appointment> {
        OperationOutcome::from_result(self.scheduler.update_status(appointment_id, status).await)
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        confirmed: bool,
    ) -> OperationOutcome<Appointment> {
        OperationOutcome::from_result(self.scheduler.cancel(appointment_id, confirmed).await)
    }

    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        notes: Option<String>,
    ) -> OperationOutcome<Appointment> {
        OperationOutcome::from_result(
            self.scheduler
                .reschedule(appointment_id, date, time, notes)
                .await,
        )
    }

    pub async fn edit_appointment(
        &self,
        appointment_id: Uuid,
        edit: AppointmentEdit,
    ) -> OperationOutcome<Appointment> {
        OperationOutcome::from_result(self.scheduler.edit(appointment_id, edit).await)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> LedgerResult<Appointment> {
        self.repository.get_appointment(appointment_id).await
    }

    pub async fn list_appointments(&self, professional_id: Uuid) -> LedgerResult<Vec<Appointment>> {
        self.repository.list_appointments(professional_id).await
    }

    // ========================================================================
    // PAYMENTS
    // ========================================================================

    /// Store the payment, then run the bridge when it is Paid.
    ///
    /// A grant failure does not undo the payment; it comes back as
    /// `GrantOutcome::Failed` and reconciliation picks it up later.
    pub async fn record_payment(&self, new_payment: NewPayment) -> LedgerResult<RecordedPayment> {
        validate_amount(new_payment.amount)?;
        let patient = self.repository.get_patient(new_payment.patient_id).await?;
        let payment = self
            .repository
            .insert_payment(new_payment.into_payment(patient.professional_id))
            .await?;
        info!(
            payment_id = %payment.id,
            patient_id = %payment.patient_id,
            status = ?payment.status,
            "Payment recorded"
        );

        let grant = self.bridge.grant_for_payment(&payment, today()).await;
        Ok(RecordedPayment { payment, grant })
    }

    /// Save an edited payment; flipping it to Paid issues its grant once.
    pub async fn update_payment(&self, payment: Payment) -> LedgerResult<RecordedPayment> {
        validate_amount(payment.amount)?;
        let previous = self.repository.get_payment(payment.id).await?;
        if previous.service_type != payment.service_type && previous.is_paid() {
            warn!(
                payment_id = %payment.id,
                "Service type changed on a paid payment; its existing grant keeps its size"
            );
        }

        let payment = self
            .repository
            .update_payment(Payment {
                professional_id: previous.professional_id,
                patient_id: previous.patient_id,
                created_at: previous.created_at,
                ..payment
            })
            .await?;
        let grant = self
            .bridge
            .grant_for_update(&previous, &payment, today())
            .await;
        Ok(RecordedPayment { payment, grant })
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> LedgerResult<Payment> {
        self.repository.get_payment(payment_id).await
    }

    pub async fn list_payments(&self, professional_id: Uuid) -> LedgerResult<Vec<Payment>> {
        self.repository.list_payments(professional_id).await
    }

    // ========================================================================
    // GRANTS AND RECONCILIATION
    // ========================================================================

    pub async fn patient_grants(&self, patient_id: Uuid) -> LedgerResult<Vec<GrantWithUsage>> {
        let snapshot = self.repository.patient_ledger(patient_id).await?;
        Ok(snapshot
            .grants
            .iter()
            .map(|grant| GrantWithUsage {
                usage: GrantUsage::of(grant, &snapshot.appointments),
                grant: grant.clone(),
            })
            .collect())
    }

    /// Re-grant paid payments of one professional, or of everyone with `None`
    pub async fn run_reconciliation(
        &self,
        scope: Option<Uuid>,
        today: NaiveDate,
    ) -> LedgerResult<ReconciliationReport> {
        self.reconciler.run(scope, today).await
    }

    pub async fn expire_lapsed_grants(
        &self,
        scope: Option<Uuid>,
        today: NaiveDate,
    ) -> LedgerResult<Vec<CreditGrant>> {
        self.reconciler.expire_lapsed_grants(scope, today).await
    }

    // ========================================================================
    // PROFESSIONALS
    // ========================================================================

    pub async fn register_professional(
        &self,
        new_professional: NewProfessional,
    ) -> LedgerResult<Professional> {
        validate_name(&new_professional.full_name, "Professional")?;
        let professional = self
            .repository
            .insert_professional(new_professional.into_professional())
            .await?;
        info!(professional_id = %professional.id, "Professional registered");
        Ok(professional)
    }

    pub async fn update_professional(&self, professional: Professional) -> LedgerResult<Professional> {
        validate_name(&professional.full_name, "Professional")?;
        let existing = self.repository.get_professional(professional.id).await?;
        self.repository
            .update_professional(Professional {
                created_at: existing.created_at,
                ..professional
            })
            .await
    }

    pub async fn get_professional(&self, professional_id: Uuid) -> LedgerResult<Professional> {
        self.repository.get_professional(professional_id).await
    }

    /// The professional a request acts for; unknown or inactive ones are refused
    pub async fn active_professional(&self, professional_id: Uuid) -> LedgerResult<Professional> {
        let professional = self.repository.get_professional(professional_id).await?;
        if !professional.is_active() {
            return Err(LedgerError::InactiveProfessional(professional_id));
        }
        Ok(professional)
    }

    pub async fn set_professional_status(
        &self,
        professional_id: Uuid,
        status: ProfessionalStatus,
    ) -> LedgerResult<Professional> {
        let mut professional = self.repository.get_professional(professional_id).await?;
        professional.status = status;
        let professional = self.repository.update_professional(professional).await?;
        info!(professional_id = %professional_id, status = ?status, "Professional status changed");
        Ok(professional)
    }

    pub async fn delete_professional(&self, professional_id: Uuid) -> LedgerResult<()> {
        self.repository.delete_professional(professional_id).await?;
        warn!(professional_id = %professional_id, "Professional deleted");
        Ok(())
    }

    pub async fn list_professionals(&self) -> LedgerResult<Vec<Professional>> {
        self.repository.list_professionals().await
    }

    // ========================================================================
    // PATIENTS
    // ========================================================================

    pub async fn register_patient(&self, new_patient: NewPatient) -> LedgerResult<Patient> {
        validate_name(&new_patient.name, "Patient")?;
        let patient = self
            .repository
            .insert_patient(new_patient.into_patient(today()))
            .await?;
        info!(patient_id = %patient.id, professional_id = %patient.professional_id, "Patient registered");
        Ok(patient)
    }

    pub async fn get_patient(&self, patient_id: Uuid) -> LedgerResult<Patient> {
        self.repository.get_patient(patient_id).await
    }

    pub async fn update_patient(&self, patient: Patient) -> LedgerResult<Patient> {
        validate_name(&patient.name, "Patient")?;
        let existing = self.repository.get_patient(patient.id).await?;
        self.repository
            .update_patient(Patient {
                professional_id: existing.professional_id,
                registration_date: existing.registration_date,
                ..patient
            })
            .await
    }

    pub async fn set_patient_status(
        &self,
        patient_id: Uuid,
        status: PatientStatus,
    ) -> LedgerResult<Patient> {
        let mut patient = self.repository.get_patient(patient_id).await?;
        patient.status = status;
        self.repository.update_patient(patient).await
    }

    pub async fn delete_patient(&self, patient_id: Uuid) -> LedgerResult<()> {
        self.repository.delete_patient(patient_id).await?;
        warn!(patient_id = %patient_id, "Patient and ledger history deleted");
        Ok(())
    }

    pub async fn list_patients(&self, professional_id: Uuid) -> LedgerResult<Vec<Patient>> {
        self.repository.list_patients(professional_id).await
    }

    // ========================================================================
    // REPORTS AND INSIGHT
    // ========================================================================

    pub async fn financial_summary(
        &self,
        professional_id: Uuid,
        period: ReportPeriod,
        today: NaiveDate,
    ) -> LedgerResult<FinancialSummary> {
        let payments = self.repository.list_payments(professional_id).await?;
        let patients = self.repository.list_patients(professional_id).await?;
        Ok(reporting::financial_summary(&payments, &patients, period, today))
    }

    pub async fn low_balance_alerts(&self, professional_id: Uuid) -> LedgerResult<Vec<LowBalanceAlert>> {
        let grants = self.repository.list_grants(professional_id).await?;
        let appointments = self.repository.list_appointments(professional_id).await?;
        Ok(reporting::low_balance_alerts(
            &grants,
            &appointments,
            self.config.low_balance_threshold,
        ))
    }

    pub async fn pending_appointments(&self, professional_id: Uuid) -> LedgerResult<Vec<Appointment>> {
        let appointments = self.repository.list_appointments(professional_id).await?;
        Ok(reporting::pending_appointments(&appointments))
    }

    /// Active patients for the history report, optionally narrowed by name
    pub async fn history_patients(
        &self,
        professional_id: Uuid,
        search: Option<&str>,
    ) -> LedgerResult<Vec<Patient>> {
        let patients = self.repository.list_patients(professional_id).await?;
        Ok(reporting::active_patients(&patients, search))
    }

    pub async fn patient_history(&self, patient_id: Uuid) -> LedgerResult<PatientHistory> {
        let patient = self.repository.get_patient(patient_id).await?;
        let snapshot = self.repository.patient_ledger(patient_id).await?;
        Ok(reporting::patient_history(&patient, &snapshot.appointments))
    }

    pub async fn generate_insight(&self, patient_id: Uuid) -> LedgerResult<String> {
        let patient = self.repository.get_patient(patient_id).await?;
        let snapshot = self.repository.patient_ledger(patient_id).await?;
        Ok(self
            .insight
            .generate_insight(&patient, &snapshot.appointments)
            .await)
    }
}

fn validate_amount(amount: Decimal) -> LedgerResult<()> {
    if amount.is_sign_negative() {
        return Err(LedgerError::Validation(
            "Amount cannot be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_name(name: &str, entity: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(format!("{entity} name is required")));
    }
    Ok(())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryLedgerRepository;

    fn ledger() -> ClinicLedger {
        ClinicLedger::new(Arc::new(InMemoryLedgerRepository::new()), LedgerConfig::default()).unwrap()
    }

    fn new_patient(professional_id: Uuid, name: &str) -> NewPatient {
        NewPatient {
            professional_id,
            name: name.to_string(),
            email: String::new(),
            phone: String::new(),
            cpf: None,
            date_of_birth: None,
            status: None,
            notes: String::new(),
            age_group: None,
            guardian_name: None,
        }
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_reported_not_raised() {
        let ledger = ledger();
        let patient = ledger
            .register_patient(new_patient(Uuid::new_v4(), "Fabio"))
            .await
            .unwrap();

        let outcome = ledger
            .create_appointments(
                patient.id,
                ServiceType::Package,
                vec![AppointmentSlot::at(today(), NaiveTime::from_hms_opt(8, 0, 0).unwrap())],
                None,
            )
            .await;

        assert!(!outcome.success);
        assert!(outcome.data.is_none());
        assert!(outcome.error_message.unwrap().contains("enough credits"));
    }

    #[tokio::test]
    async fn test_open_payment_granted_when_marked_paid() {
        let ledger = ledger();
        let patient = ledger
            .register_patient(new_patient(Uuid::new_v4(), "Gabi"))
            .await
            .unwrap();
        let recorded = ledger
            .record_payment(NewPayment {
                patient_id: patient.id,
                amount: Decimal::new(200, 0),
                date: today(),
                status: PaymentStatus::Open,
                service_type: ServiceType::Single,
                method: None,
                notes: None,
            })
            .await
            .unwrap();
        assert!(matches!(recorded.grant, GrantOutcome::NotEligible));

        let mut paid = recorded.payment.clone();
        paid.status = PaymentStatus::Paid;
        let first = ledger.update_payment(paid.clone()).await.unwrap();
        let second = ledger.update_payment(paid).await.unwrap();

        assert!(matches!(first.grant, GrantOutcome::Issued { .. }));
        assert!(matches!(second.grant, GrantOutcome::AlreadyGranted { .. }));
        let balance = ledger.credit_balance(patient.id).await.unwrap();
        assert_eq!(balance.single, 1);
        assert_eq!(balance.package, 0);
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let ledger = ledger();
        let patient = ledger
            .register_patient(new_patient(Uuid::new_v4(), "Hugo"))
            .await
            .unwrap();

        let result = ledger
            .record_payment(NewPayment {
                patient_id: patient.id,
                amount: Decimal::new(-1, 0),
                date: today(),
                status: PaymentStatus::Paid,
                service_type: ServiceType::Single,
                method: None,
                notes: None,
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let result = ledger().register_patient(new_patient(Uuid::new_v4(), "  ")).await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_inactive_professional_is_refused() {
        let ledger = ledger();
        let professional = ledger
            .register_professional(NewProfessional {
                full_name: "Dr. Otavio Nunes".to_string(),
                registration_number: "CRP 05/998".to_string(),
                phone: String::new(),
                email: String::new(),
                specialty: Some("Psicologia clinica".to_string()),
                status: None,
            })
            .await
            .unwrap();
        assert!(ledger.active_professional(professional.id).await.is_ok());

        ledger
            .set_professional_status(professional.id, ProfessionalStatus::Inactive)
            .await
            .unwrap();

        let refused = ledger.active_professional(professional.id).await;
        assert!(matches!(refused, Err(LedgerError::InactiveProfessional(id)) if id == professional.id));
        let unknown = ledger.active_professional(Uuid::new_v4()).await;
        assert!(matches!(unknown, Err(LedgerError::NotFound { .. })));
    }
}
