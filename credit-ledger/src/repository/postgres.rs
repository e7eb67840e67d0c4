//! PostgreSQL-backed ledger repository
//!
//! - Balance-affecting writes run in one transaction each
//! - Bookings serialize on a transaction-scoped advisory lock per (patient, service type)
//! - Grant idempotency is a unique constraint on `credit_grants.payment_id`
//! - No remaining-sessions column; balances are derived from appointment rows

use crate::{
    error::{LedgerError, LedgerResult},
    models::*,
    repository::{BookingPlanner, LedgerRepository},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PROFESSIONAL_COLUMNS: &str =
    "id, full_name, registration_number, phone, email, specialty, status, created_at";
const PATIENT_COLUMNS: &str = "id, professional_id, name, email, phone, cpf, date_of_birth, status, \
     registration_date, notes, age_group, guardian_name";
const PAYMENT_COLUMNS: &str =
    "id, professional_id, patient_id, amount, date, status, method, service_type, notes, created_at";
const GRANT_COLUMNS: &str =
    "id, professional_id, patient_id, total_sessions, expiry_date, status, payment_id, created_at";
const APPOINTMENT_COLUMNS: &str = "id, professional_id, patient_id, date, time, duration_minutes, status, \
     service_type, grant_id, notes, created_at";

/// PostgreSQL-backed ledger repository
pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply the bundled migrations
    pub async fn connect(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to connect: {e}")))?;

        let repo = Self::new(pool);
        repo.migrate().await?;
        Ok(repo)
    }

    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Credit ledger migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn require_patient(conn: &mut PgConnection, id: Uuid) -> LedgerResult<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to look up patient: {e}")))?;

        if exists {
            Ok(())
        } else {
            Err(LedgerError::not_found("Patient", id))
        }
    }

    async fn load_ledger(conn: &mut PgConnection, patient_id: Uuid) -> LedgerResult<PatientLedger> {
        let grants = sqlx::query_as::<_, CreditGrant>(&format!(
            "SELECT {GRANT_COLUMNS} FROM credit_grants WHERE patient_id = $1 ORDER BY created_at"
        ))
        .bind(patient_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to load grants: {e}")))?;

        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE patient_id = $1 ORDER BY date, created_at"
        ))
        .bind(patient_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to load payments: {e}")))?;

        let appointments = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE patient_id = $1 ORDER BY date, time"
        ))
        .bind(patient_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to load appointments: {e}")))?;

        Ok(PatientLedger {
            patient_id,
            grants,
            payments,
            appointments,
        })
    }

    async fn insert_appointment(conn: &mut PgConnection, appt: &Appointment) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO appointments (
                id, professional_id, patient_id, date, time, duration_minutes,
                status, service_type, grant_id, notes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(appt.id)
        .bind(appt.professional_id)
        .bind(appt.patient_id)
        .bind(appt.date)
        .bind(appt.time)
        .bind(appt.duration_minutes)
        .bind(appt.status)
        .bind(appt.service_type)
        .bind(appt.grant_id)
        .bind(&appt.notes)
        .bind(appt.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to insert appointment: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    // ========================================================================
    // PROFESSIONALS
    // ========================================================================

    async fn insert_professional(&self, professional: Professional) -> LedgerResult<Professional> {
        sqlx::query_as::<_, Professional>(&format!(
            r#"
            INSERT INTO professionals (
                id, full_name, registration_number, phone, email, specialty, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PROFESSIONAL_COLUMNS}
            "#
        ))
        .bind(professional.id)
        .bind(&professional.full_name)
        .bind(&professional.registration_number)
        .bind(&professional.phone)
        .bind(&professional.email)
        .bind(&professional.specialty)
        .bind(professional.status)
        .bind(professional.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to insert professional: {e}")))
    }

    async fn update_professional(&self, professional: Professional) -> LedgerResult<Professional> {
        sqlx::query_as::<_, Professional>(&format!(
            r#"
            UPDATE professionals SET
                full_name = $2, registration_number = $3, phone = $4,
                email = $5, specialty = $6, status = $7
            WHERE id = $1
            RETURNING {PROFESSIONAL_COLUMNS}
            "#
        ))
        .bind(professional.id)
        .bind(&professional.full_name)
        .bind(&professional.registration_number)
        .bind(&professional.phone)
        .bind(&professional.email)
        .bind(&professional.specialty)
        .bind(professional.status)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to update professional: {e}")))?
        .ok_or_else(|| LedgerError::not_found("Professional", professional.id))
    }

    async fn get_professional(&self, id: Uuid) -> LedgerResult<Professional> {
        sqlx::query_as::<_, Professional>(&format!(
            "SELECT {PROFESSIONAL_COLUMNS} FROM professionals WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to fetch professional: {e}")))?
        .ok_or_else(|| LedgerError::not_found("Professional", id))
    }

    async fn list_professionals(&self) -> LedgerResult<Vec<Professional>> {
        sqlx::query_as::<_, Professional>(&format!(
            "SELECT {PROFESSIONAL_COLUMNS} FROM professionals ORDER BY full_name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to list professionals: {e}")))
    }

    async fn delete_professional(&self, id: Uuid) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM professionals
            WHERE id = $1
              AND NOT EXISTS (SELECT 1 FROM patients WHERE professional_id = $1)
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to delete professional: {e}")))?;

        if result.rows_affected() == 0 {
            // tell a missing row apart from one that still owns patients
            self.get_professional(id).await?;
            return Err(LedgerError::Conflict(format!(
                "Professional {id} still has patients"
            )));
        }
        info!(professional_id = %id, "Professional deleted");
        Ok(())
    }

    // ========================================================================
    // PATIENTS
    // ========================================================================

    async fn insert_patient(&self, patient: Patient) -> LedgerResult<Patient> {
        debug!(patient_id = %patient.id, "Inserting patient");

        sqlx::query_as::<_, Patient>(&format!(
            r#"
            INSERT INTO patients (
                id, professional_id, name, email, phone, cpf, date_of_birth,
                status, registration_date, notes, age_group, guardian_name
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {PATIENT_COLUMNS}
            "#
        ))
        .bind(patient.id)
        .bind(patient.professional_id)
        .bind(&patient.name)
        .bind(&patient.email)
        .bind(&patient.phone)
        .bind(&patient.cpf)
        .bind(patient.date_of_birth)
        .bind(patient.status)
        .bind(patient.registration_date)
        .bind(&patient.notes)
        .bind(patient.age_group)
        .bind(&patient.guardian_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to insert patient: {e}")))
    }

    async fn update_patient(&self, patient: Patient) -> LedgerResult<Patient> {
        sqlx::query_as::<_, Patient>(&format!(
            r#"
            UPDATE patients SET
                name = $2, email = $3, phone = $4, cpf = $5, date_of_birth = $6,
                status = $7, notes = $8, age_group = $9, guardian_name = $10
            WHERE id = $1
            RETURNING {PATIENT_COLUMNS}
            "#
        ))
        .bind(patient.id)
        .bind(&patient.name)
        .bind(&patient.email)
        .bind(&patient.phone)
        .bind(&patient.cpf)
        .bind(patient.date_of_birth)
        .bind(patient.status)
        .bind(&patient.notes)
        .bind(patient.age_group)
        .bind(&patient.guardian_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to update patient: {e}")))?
        .ok_or_else(|| LedgerError::not_found("Patient", patient.id))
    }

    async fn get_patient(&self, id: Uuid) -> LedgerResult<Patient> {
        sqlx::query_as::<_, Patient>(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to fetch patient: {e}")))?
        .ok_or_else(|| LedgerError::not_found("Patient", id))
    }

    async fn list_patients(&self, professional_id: Uuid) -> LedgerResult<Vec<Patient>> {
        sqlx::query_as::<_, Patient>(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE professional_id = $1 ORDER BY name"
        ))
        .bind(professional_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to list patients: {e}")))
    }

    async fn delete_patient(&self, id: Uuid) -> LedgerResult<()> {
        // payments, grants and appointments cascade in the schema
        let result = sqlx::query("DELETE FROM patients WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to delete patient: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("Patient", id));
        }
        info!(patient_id = %id, "Patient deleted");
        Ok(())
    }

    // ========================================================================
    // PAYMENTS
    // ========================================================================

    async fn insert_payment(&self, payment: Payment) -> LedgerResult<Payment> {
        let mut conn = self.pool.acquire().await?;
        Self::require_patient(&mut conn, payment.patient_id).await?;

        sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (
                id, professional_id, patient_id, amount, date, status,
                method, service_type, notes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id)
        .bind(payment.professional_id)
        .bind(payment.patient_id)
        .bind(payment.amount)
        .bind(payment.date)
        .bind(payment.status)
        .bind(payment.method)
        .bind(payment.service_type)
        .bind(&payment.notes)
        .bind(payment.created_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to insert payment: {e}")))
    }

    async fn update_payment(&self, payment: Payment) -> LedgerResult<Payment> {
        sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments SET
                amount = $2, date = $3, status = $4, method = $5, service_type = $6, notes = $7
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id)
        .bind(payment.amount)
        .bind(payment.date)
        .bind(payment.status)
        .bind(payment.method)
        .bind(payment.service_type)
        .bind(&payment.notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to update payment: {e}")))?
        .ok_or_else(|| LedgerError::not_found("Payment", payment.id))
    }

    async fn get_payment(&self, id: Uuid) -> LedgerResult<Payment> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to fetch payment: {e}")))?
        .ok_or_else(|| LedgerError::not_found("Payment", id))
    }

    async fn list_payments(&self, professional_id: Uuid) -> LedgerResult<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE professional_id = $1 ORDER BY date, created_at"
        ))
        .bind(professional_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to list payments: {e}")))
    }

    async fn paid_payments_without_grant(
        &self,
        professional_id: Option<Uuid>,
    ) -> LedgerResult<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT p.id, p.professional_id, p.patient_id, p.amount, p.date, p.status,
                   p.method, p.service_type, p.notes, p.created_at
            FROM payments p
            WHERE p.status = 'paid'
              AND ($1::uuid IS NULL OR p.professional_id = $1)
              AND NOT EXISTS (SELECT 1 FROM credit_grants g WHERE g.payment_id = p.id)
            ORDER BY p.created_at
            "#,
        )
        .bind(professional_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to scan ungranted payments: {e}")))
    }

    // ========================================================================
    // CREDIT GRANTS
    // ========================================================================

    async fn insert_grant_if_absent(&self, grant: CreditGrant) -> LedgerResult<Option<CreditGrant>> {
        debug!(grant_id = %grant.id, payment_id = ?grant.payment_id, "Inserting credit grant");

        let mut conn = self.pool.acquire().await?;
        Self::require_patient(&mut conn, grant.patient_id).await?;

        sqlx::query_as::<_, CreditGrant>(&format!(
            r#"
            INSERT INTO credit_grants (
                id, professional_id, patient_id, total_sessions, expiry_date,
                status, payment_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (payment_id) DO NOTHING
            RETURNING {GRANT_COLUMNS}
            "#
        ))
        .bind(grant.id)
        .bind(grant.professional_id)
        .bind(grant.patient_id)
        .bind(grant.total_sessions)
        .bind(grant.expiry_date)
        .bind(grant.status)
        .bind(grant.payment_id)
        .bind(grant.created_at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to insert credit grant: {e}")))
    }

    async fn find_grant_for_payment(&self, payment_id: Uuid) -> LedgerResult<Option<CreditGrant>> {
        sqlx::query_as::<_, CreditGrant>(&format!(
            "SELECT {GRANT_COLUMNS} FROM credit_grants WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to fetch credit grant: {e}")))
    }

    async fn update_grant_status(&self, id: Uuid, status: GrantStatus) -> LedgerResult<CreditGrant> {
        sqlx::query_as::<_, CreditGrant>(&format!(
            "UPDATE credit_grants SET status = $2 WHERE id = $1 RETURNING {GRANT_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to update credit grant: {e}")))?
        .ok_or_else(|| LedgerError::not_found("Credit grant", id))
    }

    async fn list_grants(&self, professional_id: Uuid) -> LedgerResult<Vec<CreditGrant>> {
        sqlx::query_as::<_, CreditGrant>(&format!(
            "SELECT {GRANT_COLUMNS} FROM credit_grants WHERE professional_id = $1 ORDER BY created_at"
        ))
        .bind(professional_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to list credit grants: {e}")))
    }

    async fn lapsed_grants(
        &self,
        today: NaiveDate,
        professional_id: Option<Uuid>,
    ) -> LedgerResult<Vec<CreditGrant>> {
        sqlx::query_as::<_, CreditGrant>(&format!(
            "SELECT {GRANT_COLUMNS} FROM credit_grants \
             WHERE status = 'active' AND expiry_date IS NOT NULL AND expiry_date < $1 \
               AND ($2::uuid IS NULL OR professional_id = $2)"
        ))
        .bind(today)
        .bind(professional_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to scan lapsed grants: {e}")))
    }

    // ========================================================================
    // APPOINTMENTS
    // ========================================================================

    async fn get_appointment(&self, id: Uuid) -> LedgerResult<Appointment> {
        sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to fetch appointment: {e}")))?
        .ok_or_else(|| LedgerError::not_found("Appointment", id))
    }

    async fn list_appointments(&self, professional_id: Uuid) -> LedgerResult<Vec<Appointment>> {
        sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE professional_id = $1 ORDER BY date, time"
        ))
        .bind(professional_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to list appointments: {e}")))
    }

    async fn transition_appointment(
        &self,
        id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> LedgerResult<Appointment> {
        let updated = sqlx::query_as::<_, Appointment>(&format!(
            "UPDATE appointments SET status = $3 WHERE id = $1 AND status = $2 RETURNING {APPOINTMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to update appointment status: {e}")))?;

        match updated {
            Some(appointment) => Ok(appointment),
            None => {
                let current = self.get_appointment(id).await?;
                Err(LedgerError::Conflict(format!(
                    "Appointment {id} is {} now, not {from}",
                    current.status
                )))
            }
        }
    }

    async fn edit_appointment(&self, id: Uuid, edit: &AppointmentEdit) -> LedgerResult<Appointment> {
        sqlx::query_as::<_, Appointment>(&format!(
            r#"
            UPDATE appointments SET
                date = COALESCE($2, date),
                time = COALESCE($3, time),
                duration_minutes = COALESCE($4, duration_minutes),
                notes = COALESCE($5, notes)
            WHERE id = $1
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(edit.date)
        .bind(edit.time)
        .bind(edit.duration_minutes)
        .bind(&edit.notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to edit appointment: {e}")))?
        .ok_or_else(|| LedgerError::not_found("Appointment", id))
    }

    async fn supersede_appointment(
        &self,
        old_id: Uuid,
        replacement: Appointment,
    ) -> LedgerResult<Appointment> {
        let mut tx = self.pool.begin().await?;

        let superseded = sqlx::query(
            r#"
            UPDATE appointments SET status = 'rescheduled'
            WHERE id = $1 AND status IN ('scheduled', 'confirmed')
            "#,
        )
        .bind(old_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to supersede appointment: {e}")))?;

        if superseded.rows_affected() == 0 {
            tx.rollback().await?;
            let current = self.get_appointment(old_id).await?;
            return Err(LedgerError::InvalidTransition {
                from: current.status,
                to: AppointmentStatus::Rescheduled,
            });
        }

        Self::insert_appointment(&mut tx, &replacement).await?;
        tx.commit().await?;

        info!(old_id = %old_id, new_id = %replacement.id, "Appointment rescheduled");
        Ok(replacement)
    }

    // ========================================================================
    // LEDGER
    // ========================================================================

    async fn patient_ledger(&self, patient_id: Uuid) -> LedgerResult<PatientLedger> {
        let mut conn = self.pool.acquire().await?;
        Self::require_patient(&mut conn, patient_id).await?;
        Self::load_ledger(&mut conn, patient_id).await
    }

    async fn book_appointments(
        &self,
        patient_id: Uuid,
        service_type: ServiceType,
        planner: &BookingPlanner<'_>,
    ) -> LedgerResult<Vec<Appointment>> {
        let mut tx = self.pool.begin().await?;

        // Held until commit or rollback; concurrent bookings for the same bucket queue here
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{patient_id}:{service_type}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to lock patient ledger: {e}")))?;

        Self::require_patient(&mut tx, patient_id).await?;
        let ledger = Self::load_ledger(&mut tx, patient_id).await?;

        let planned = match planner(&ledger) {
            Ok(planned) => planned,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        for appointment in &planned {
            if let Err(e) = Self::insert_appointment(&mut tx, appointment).await {
                warn!(patient_id = %patient_id, error = %e, "Booking rolled back");
                tx.rollback().await?;
                return Err(e);
            }
        }

        tx.commit().await?;
        debug!(patient_id = %patient_id, count = planned.len(), "Booking committed");
        Ok(planned)
    }
}
