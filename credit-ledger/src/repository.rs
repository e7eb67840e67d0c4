use crate::error::{LedgerError, LedgerResult};
use crate::models::*;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod postgres;

pub use postgres::PostgresLedgerRepository;

/// Turns the patient's current ledger into the rows to insert.
///
/// Runs inside the store's critical section for the patient, so the
/// balance it reads cannot change before its rows are written.
pub type BookingPlanner<'a> =
    dyn Fn(&PatientLedger) -> LedgerResult<Vec<Appointment>> + Send + Sync + 'a;

/// Record store for the professional registry and the four ledger collections
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    // ========================================================================
    // PROFESSIONALS
    // ========================================================================

    async fn insert_professional(&self, professional: Professional) -> LedgerResult<Professional>;

    async fn update_professional(&self, professional: Professional) -> LedgerResult<Professional>;

    async fn get_professional(&self, id: Uuid) -> LedgerResult<Professional>;

    async fn list_professionals(&self) -> LedgerResult<Vec<Professional>>;

    /// Fails with `Conflict` while any patient still belongs to the professional
    async fn delete_professional(&self, id: Uuid) -> LedgerResult<()>;

    // ========================================================================
    // PATIENTS
    // ========================================================================

    async fn insert_patient(&self, patient: Patient) -> LedgerResult<Patient>;

    async fn update_patient(&self, patient: Patient) -> LedgerResult<Patient>;

    async fn get_patient(&self, id: Uuid) -> LedgerResult<Patient>;

    async fn list_patients(&self, professional_id: Uuid) -> LedgerResult<Vec<Patient>>;

    /// Hard delete; payments, grants and appointments of the patient go with it
    async fn delete_patient(&self, id: Uuid) -> LedgerResult<()>;

    // ========================================================================
    // PAYMENTS
    // ========================================================================

    async fn insert_payment(&self, payment: Payment) -> LedgerResult<Payment>;

    async fn update_payment(&self, payment: Payment) -> LedgerResult<Payment>;

    async fn get_payment(&self, id: Uuid) -> LedgerResult<Payment>;

    async fn list_payments(&self, professional_id: Uuid) -> LedgerResult<Vec<Payment>>;

    /// Paid payments no grant points at, oldest first; `None` scans every professional
    async fn paid_payments_without_grant(
        &self,
        professional_id: Option<Uuid>,
    ) -> LedgerResult<Vec<Payment>>;

    // ========================================================================
    // CREDIT GRANTS
    // ========================================================================

    /// Insert unless another grant already references the same payment.
    ///
    /// Returns `None` when the payment was already granted.
    async fn insert_grant_if_absent(&self, grant: CreditGrant) -> LedgerResult<Option<CreditGrant>>;

    async fn find_grant_for_payment(&self, payment_id: Uuid) -> LedgerResult<Option<CreditGrant>>;

    async fn update_grant_status(&self, id: Uuid, status: GrantStatus) -> LedgerResult<CreditGrant>;

    async fn list_grants(&self, professional_id: Uuid) -> LedgerResult<Vec<CreditGrant>>;

    /// Active grants whose expiry date is before `today`; `None` scans every professional
    async fn lapsed_grants(
        &self,
        today: NaiveDate,
        professional_id: Option<Uuid>,
    ) -> LedgerResult<Vec<CreditGrant>>;

    // ========================================================================
    // APPOINTMENTS
    // ========================================================================

    async fn get_appointment(&self, id: Uuid) -> LedgerResult<Appointment>;

    async fn list_appointments(&self, professional_id: Uuid) -> LedgerResult<Vec<Appointment>>;

    /// Move an appointment from `from` to `to`; fails with `Conflict` if it is no longer in `from`
    async fn transition_appointment(
        &self,
        id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> LedgerResult<Appointment>;

    /// Change date, time, duration or notes. Status and grant are left alone.
    async fn edit_appointment(&self, id: Uuid, edit: &AppointmentEdit) -> LedgerResult<Appointment>;

    /// Mark `old_id` Rescheduled and insert `replacement`, both or neither
    async fn supersede_appointment(
        &self,
        old_id: Uuid,
        replacement: Appointment,
    ) -> LedgerResult<Appointment>;

    // ========================================================================
    // LEDGER
    // ========================================================================

    /// Every grant, payment and appointment of one patient
    async fn patient_ledger(&self, patient_id: Uuid) -> LedgerResult<PatientLedger>;

    /// Atomic check-and-insert of a booking batch.
    ///
    /// Concurrent calls for the same patient and service type are serialized;
    /// either every planned row is stored or none is.
    async fn book_appointments(
        &self,
        patient_id: Uuid,
        service_type: ServiceType,
        planner: &BookingPlanner<'_>,
    ) -> LedgerResult<Vec<Appointment>>;
}

#[derive(Debug, Default)]
struct Tables {
    professionals: HashMap<Uuid, Professional>,
    patients: HashMap<Uuid, Patient>,
    payments: HashMap<Uuid, Payment>,
    grants: HashMap<Uuid, CreditGrant>,
    appointments: HashMap<Uuid, Appointment>,
}

impl Tables {
    fn ledger(&self, patient_id: Uuid) -> PatientLedger {
        let mut ledger = PatientLedger::new(patient_id);
        ledger.grants = self
            .grants
            .values()
            .filter(|g| g.patient_id == patient_id)
            .cloned()
            .collect();
        ledger.payments = self
            .payments
            .values()
            .filter(|p| p.patient_id == patient_id)
            .cloned()
            .collect();
        ledger.appointments = self
            .appointments
            .values()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect();
        ledger.grants.sort_by_key(|g| g.created_at);
        ledger.payments.sort_by_key(|p| (p.date, p.created_at));
        ledger.appointments.sort_by_key(|a| (a.date, a.time));
        ledger
    }

    fn require_patient(&self, id: Uuid) -> LedgerResult<()> {
        if self.patients.contains_key(&id) {
            Ok(())
        } else {
            Err(LedgerError::not_found("Patient", id))
        }
    }
}

/// In-memory store for tests and database-less deployments.
///
/// All tables sit behind one lock; every write path holds the write guard
/// for its whole read-check-write sequence.
#[derive(Debug, Default)]
pub struct InMemoryLedgerRepository {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn in_scope(owner: Uuid, scope: Option<Uuid>) -> bool {
    scope.is_none() || scope == Some(owner)
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn insert_professional(&self, professional: Professional) -> LedgerResult<Professional> {
        let mut tables = self.tables.write().await;
        if tables.professionals.contains_key(&professional.id) {
            return Err(LedgerError::Conflict(format!(
                "Professional {} already exists",
                professional.id
            )));
        }
        tables.professionals.insert(professional.id, professional.clone());
        Ok(professional)
    }

    async fn update_professional(&self, professional: Professional) -> LedgerResult<Professional> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .professionals
            .get_mut(&professional.id)
            .ok_or_else(|| LedgerError::not_found("Professional", professional.id))?;
        *slot = professional.clone();
        Ok(professional)
    }

    async fn get_professional(&self, id: Uuid) -> LedgerResult<Professional> {
        self.tables
            .read()
            .await
            .professionals
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("Professional", id))
    }

    async fn list_professionals(&self) -> LedgerResult<Vec<Professional>> {
        let tables = self.tables.read().await;
        let mut professionals: Vec<Professional> = tables.professionals.values().cloned().collect();
        professionals.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(professionals)
    }

    async fn delete_professional(&self, id: Uuid) -> LedgerResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.professionals.contains_key(&id) {
            return Err(LedgerError::not_found("Professional", id));
        }
        let patients = tables
            .patients
            .values()
            .filter(|p| p.professional_id == id)
            .count();
        if patients > 0 {
            return Err(LedgerError::Conflict(format!(
                "Professional {id} still has {patients} patient(s)"
            )));
        }
        tables.professionals.remove(&id);
        Ok(())
    }

    async fn insert_patient(&self, patient: Patient) -> LedgerResult<Patient> {
        let mut tables = self.tables.write().await;
        if tables.patients.contains_key(&patient.id) {
            return Err(LedgerError::Conflict(format!("Patient {} already exists", patient.id)));
        }
        tables.patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    async fn update_patient(&self, patient: Patient) -> LedgerResult<Patient> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .patients
            .get_mut(&patient.id)
            .ok_or_else(|| LedgerError::not_found("Patient", patient.id))?;
        *slot = patient.clone();
        Ok(patient)
    }

    async fn get_patient(&self, id: Uuid) -> LedgerResult<Patient> {
        self.tables
            .read()
            .await
            .patients
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("Patient", id))
    }

    async fn list_patients(&self, professional_id: Uuid) -> LedgerResult<Vec<Patient>> {
        let tables = self.tables.read().await;
        let mut patients: Vec<Patient> = tables
            .patients
            .values()
            .filter(|p| p.professional_id == professional_id)
            .cloned()
            .collect();
        patients.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(patients)
    }

    async fn delete_patient(&self, id: Uuid) -> LedgerResult<()> {
        let mut tables = self.tables.write().await;
        if tables.patients.remove(&id).is_none() {
            return Err(LedgerError::not_found("Patient", id));
        }
        tables.payments.retain(|_, p| p.patient_id != id);
        tables.grants.retain(|_, g| g.patient_id != id);
        tables.appointments.retain(|_, a| a.patient_id != id);
        Ok(())
    }

    async fn insert_payment(&self, payment: Payment) -> LedgerResult<Payment> {
        let mut tables = self.tables.write().await;
        tables.require_patient(payment.patient_id)?;
        tables.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn update_payment(&self, payment: Payment) -> LedgerResult<Payment> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| LedgerError::not_found("Payment", payment.id))?;
        *slot = payment.clone();
        Ok(payment)
    }

    async fn get_payment(&self, id: Uuid) -> LedgerResult<Payment> {
        self.tables
            .read()
            .await
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("Payment", id))
    }

    async fn list_payments(&self, professional_id: Uuid) -> LedgerResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.professional_id == professional_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.date, p.created_at));
        Ok(payments)
    }

    async fn paid_payments_without_grant(
        &self,
        professional_id: Option<Uuid>,
    ) -> LedgerResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.is_paid() && in_scope(p.professional_id, professional_id))
            .filter(|p| !tables.grants.values().any(|g| g.payment_id == Some(p.id)))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn insert_grant_if_absent(&self, grant: CreditGrant) -> LedgerResult<Option<CreditGrant>> {
        let mut tables = self.tables.write().await;
        tables.require_patient(grant.patient_id)?;
        if let Some(payment_id) = grant.payment_id {
            if tables.grants.values().any(|g| g.payment_id == Some(payment_id)) {
                return Ok(None);
            }
        }
        tables.grants.insert(grant.id, grant.clone());
        Ok(Some(grant))
    }

    async fn find_grant_for_payment(&self, payment_id: Uuid) -> LedgerResult<Option<CreditGrant>> {
        Ok(self
            .tables
            .read()
            .await
            .grants
            .values()
            .find(|g| g.payment_id == Some(payment_id))
            .cloned())
    }

    async fn update_grant_status(&self, id: Uuid, status: GrantStatus) -> LedgerResult<CreditGrant> {
        let mut tables = self.tables.write().await;
        let grant = tables
            .grants
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("Credit grant", id))?;
        grant.status = status;
        Ok(grant.clone())
    }

    async fn list_grants(&self, professional_id: Uuid) -> LedgerResult<Vec<CreditGrant>> {
        let tables = self.tables.read().await;
        let mut grants: Vec<CreditGrant> = tables
            .grants
            .values()
            .filter(|g| g.professional_id == professional_id)
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.created_at);
        Ok(grants)
    }

    async fn lapsed_grants(
        &self,
        today: NaiveDate,
        professional_id: Option<Uuid>,
    ) -> LedgerResult<Vec<CreditGrant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .grants
            .values()
            .filter(|g| g.is_active() && g.has_lapsed(today))
            .filter(|g| in_scope(g.professional_id, professional_id))
            .cloned()
            .collect())
    }

    async fn get_appointment(&self, id: Uuid) -> LedgerResult<Appointment> {
        self.tables
            .read()
            .await
            .appointments
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("Appointment", id))
    }

    async fn list_appointments(&self, professional_id: Uuid) -> LedgerResult<Vec<Appointment>> {
        let tables = self.tables.read().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.professional_id == professional_id)
            .cloned()
            .collect();
        appointments.sort_by_key(|a| (a.date, a.time));
        Ok(appointments)
    }

    async fn transition_appointment(
        &self,
        id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> LedgerResult<Appointment> {
        let mut tables = self.tables.write().await;
        let appointment = tables
            .appointments
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("Appointment", id))?;
        if appointment.status != from {
            return Err(LedgerError::Conflict(format!(
                "Appointment {id} is {} now, not {from}",
                appointment.status
            )));
        }
        appointment.status = to;
        Ok(appointment.clone())
    }

    async fn edit_appointment(&self, id: Uuid, edit: &AppointmentEdit) -> LedgerResult<Appointment> {
        let mut tables = self.tables.write().await;
        let appointment = tables
            .appointments
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("Appointment", id))?;
        if let Some(date) = edit.date {
            appointment.date = date;
        }
        if let Some(time) = edit.time {
            appointment.time = time;
        }
        if let Some(duration) = edit.duration_minutes {
            appointment.duration_minutes = duration;
        }
        if let Some(notes) = &edit.notes {
            appointment.notes.clone_from(notes);
        }
        Ok(appointment.clone())
    }

    async fn supersede_appointment(
        &self,
        old_id: Uuid,
        replacement: Appointment,
    ) -> LedgerResult<Appointment> {
        let mut tables = self.tables.write().await;
        let old = tables
            .appointments
            .get_mut(&old_id)
            .ok_or_else(|| LedgerError::not_found("Appointment", old_id))?;
        if !old.status.can_transition_to(AppointmentStatus::Rescheduled) {
            return Err(LedgerError::InvalidTransition {
                from: old.status,
                to: AppointmentStatus::Rescheduled,
            });
        }
        old.status = AppointmentStatus::Rescheduled;
        tables.appointments.insert(replacement.id, replacement.clone());
        Ok(replacement)
    }

    async fn patient_ledger(&self, patient_id: Uuid) -> LedgerResult<PatientLedger> {
        let tables = self.tables.read().await;
        tables.require_patient(patient_id)?;
        Ok(tables.ledger(patient_id))
    }

    async fn book_appointments(
        &self,
        patient_id: Uuid,
        _service_type: ServiceType,
        planner: &BookingPlanner<'_>,
    ) -> LedgerResult<Vec<Appointment>> {
        let mut tables = self.tables.write().await;
        tables.require_patient(patient_id)?;

        let planned = planner(&tables.ledger(patient_id))?;
        for appointment in &planned {
            tables
                .appointments
                .insert(appointment.id, appointment.clone());
        }
        Ok(planned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Utc};

    fn patient() -> Patient {
        Patient {
            id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            name: "Ana".to_string(),
            email: String::new(),
            phone: String::new(),
            cpf: None,
            date_of_birth: None,
            status: PatientStatus::Active,
            registration_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            notes: String::new(),
            age_group: None,
            guardian_name: None,
        }
    }

    fn grant_for(patient: &Patient, payment_id: Option<Uuid>) -> CreditGrant {
        CreditGrant {
            id: Uuid::new_v4(),
            professional_id: patient.professional_id,
            patient_id: patient.id,
            total_sessions: 4,
            expiry_date: None,
            status: GrantStatus::Active,
            payment_id,
            created_at: Utc::now(),
        }
    }

    fn scheduled(patient: &Patient) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            professional_id: patient.professional_id,
            patient_id: patient.id,
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration_minutes: 50,
            status: AppointmentStatus::Scheduled,
            service_type: ServiceType::Single,
            grant_id: None,
            notes: "first".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_grant_insert_is_idempotent_per_payment() {
        let repo = InMemoryLedgerRepository::new();
        let p = repo.insert_patient(patient()).await.unwrap();
        let payment_id = Some(Uuid::new_v4());

        let first = repo.insert_grant_if_absent(grant_for(&p, payment_id)).await.unwrap();
        let second = repo.insert_grant_if_absent(grant_for(&p, payment_id)).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(repo.patient_ledger(p.id).await.unwrap().grants.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_planner_writes_nothing() {
        let repo = InMemoryLedgerRepository::new();
        let p = repo.insert_patient(patient()).await.unwrap();

        let result = repo
            .book_appointments(p.id, ServiceType::Single, &|_: &PatientLedger| -> LedgerResult<Vec<Appointment>> {
                Err(LedgerError::Validation("no".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert!(repo.patient_ledger(p.id).await.unwrap().appointments.is_empty());
    }

    #[tokio::test]
    async fn test_transition_checks_current_status() {
        let repo = InMemoryLedgerRepository::new();
        let p = repo.insert_patient(patient()).await.unwrap();
        let appt = scheduled(&p);
        let id = appt.id;
        repo.book_appointments(p.id, ServiceType::Single, &move |_: &PatientLedger| -> LedgerResult<Vec<Appointment>> {
            Ok(vec![appt.clone()])
        })
            .await
            .unwrap();

        repo.transition_appointment(id, AppointmentStatus::Scheduled, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        let stale = repo
            .transition_appointment(id, AppointmentStatus::Scheduled, AppointmentStatus::Completed)
            .await;

        assert!(matches!(stale, Err(LedgerError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_supersede_refuses_closed_rows() {
        let repo = InMemoryLedgerRepository::new();
        let p = repo.insert_patient(patient()).await.unwrap();
        let mut appt = scheduled(&p);
        appt.status = AppointmentStatus::Cancelled;
        let id = appt.id;
        let replacement = appt.replacement(appt.date, appt.time, None);
        repo.book_appointments(p.id, ServiceType::Single, &move |_: &PatientLedger| -> LedgerResult<Vec<Appointment>> {
            Ok(vec![appt.clone()])
        })
            .await
            .unwrap();

        let result = repo.supersede_appointment(id, replacement).await;

        assert!(matches!(result, Err(LedgerError::InvalidTransition { .. })));
        assert_eq!(repo.patient_ledger(p.id).await.unwrap().appointments.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_patient_cascades() {
        let repo = InMemoryLedgerRepository::new();
        let p = repo.insert_patient(patient()).await.unwrap();
        repo.insert_grant_if_absent(grant_for(&p, None)).await.unwrap();

        repo.delete_patient(p.id).await.unwrap();

        assert!(repo.list_grants(p.professional_id).await.unwrap().is_empty());
        assert!(matches!(
            repo.get_patient(p.id).await,
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_professional_with_patients_cannot_be_deleted() {
        let repo = InMemoryLedgerRepository::new();
        let professional = repo
            .insert_professional(
                NewProfessional {
                    full_name: "Dra. Helena Prado".to_string(),
                    registration_number: "CRP 06/12345".to_string(),
                    phone: String::new(),
                    email: String::new(),
                    specialty: None,
                    status: None,
                }
                .into_professional(),
            )
            .await
            .unwrap();
        let mut owned = patient();
        owned.professional_id = professional.id;
        let owned = repo.insert_patient(owned).await.unwrap();

        let refused = repo.delete_professional(professional.id).await;
        assert!(matches!(refused, Err(LedgerError::Conflict(_))));

        repo.delete_patient(owned.id).await.unwrap();
        repo.delete_professional(professional.id).await.unwrap();
        assert!(repo.list_professionals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lapsed_grant_scan_respects_professional_scope() {
        let repo = InMemoryLedgerRepository::new();
        let p = repo.insert_patient(patient()).await.unwrap();
        let mut grant = grant_for(&p, None);
        grant.expiry_date = NaiveDate::from_ymd_opt(2024, 1, 31);
        repo.insert_grant_if_absent(grant).await.unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        assert_eq!(repo.lapsed_grants(today, None).await.unwrap().len(), 1);
        assert_eq!(repo.lapsed_grants(today, Some(p.professional_id)).await.unwrap().len(), 1);
        assert!(repo.lapsed_grants(today, Some(Uuid::new_v4())).await.unwrap().is_empty());
    }
}
