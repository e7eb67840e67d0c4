use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// PROFESSIONALS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProfessionalStatus {
    Active,
    Inactive,
}

/// Clinician whose patients, payments and appointments form one ledger scope
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Professional {
    pub id: Uuid,
    pub full_name: String,
    /// Council registration, e.g. "CRP 06/12345"
    pub registration_number: String,
    pub phone: String,
    pub email: String,
    pub specialty: Option<String>,
    pub status: ProfessionalStatus,
    pub created_at: DateTime<Utc>,
}

impl Professional {
    pub fn is_active(&self) -> bool {
        self.status == ProfessionalStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfessional {
    pub full_name: String,
    #[serde(default)]
    pub registration_number: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    pub specialty: Option<String>,
    pub status: Option<ProfessionalStatus>,
}

impl NewProfessional {
    pub fn into_professional(self) -> Professional {
        Professional {
            id: Uuid::new_v4(),
            full_name: self.full_name,
            registration_number: self.registration_number,
            phone: self.phone,
            email: self.email,
            specialty: self.specialty,
            status: self.status.unwrap_or(ProfessionalStatus::Active),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// PATIENTS
// ============================================================================

/// Patient status; patients are deactivated rather than deleted in normal flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PatientStatus {
    Active,
    Inactive,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgeGroup {
    Adult,
    Child,
    Adolescent,
}

/// Patient owned by exactly one professional
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patient {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub cpf: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub status: PatientStatus,
    pub registration_date: NaiveDate,
    pub notes: String,
    pub age_group: Option<AgeGroup>,
    pub guardian_name: Option<String>,
}

/// Registration payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    pub professional_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub cpf: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub status: Option<PatientStatus>,
    #[serde(default)]
    pub notes: String,
    pub age_group: Option<AgeGroup>,
    pub guardian_name: Option<String>,
}

impl NewPatient {
    pub fn into_patient(self, registration_date: NaiveDate) -> Patient {
        Patient {
            id: Uuid::new_v4(),
            professional_id: self.professional_id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            cpf: self.cpf,
            date_of_birth: self.date_of_birth,
            status: self.status.unwrap_or(PatientStatus::Active),
            registration_date,
            notes: self.notes,
            age_group: self.age_group,
            guardian_name: self.guardian_name,
        }
    }
}

// ============================================================================
// SERVICE TYPES
// ============================================================================

/// Declared service type of a payment or appointment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Single,
    Package,
}

impl ServiceType {
    /// Bucket a grant belongs to, derived from its size.
    pub fn bucket_of(total_sessions: i32) -> Self {
        if total_sessions > 1 {
            Self::Package
        } else {
            Self::Single
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Package => "package",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PAYMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Partial,
    Open,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Debit,
    Credit,
    Pix,
}

/// Money received or expected from a patient
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Uuid,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub status: PaymentStatus,
    pub method: Option<PaymentMethod>,
    pub service_type: ServiceType,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }
}

/// Payment registration payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub patient_id: Uuid,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub status: PaymentStatus,
    pub service_type: ServiceType,
    pub method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

impl NewPayment {
    pub fn into_payment(self, professional_id: Uuid) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            professional_id,
            patient_id: self.patient_id,
            amount: self.amount,
            date: self.date,
            status: self.status,
            method: self.method,
            service_type: self.service_type,
            notes: self.notes,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// CREDIT GRANTS
// ============================================================================

/// Stored grant status. "Finished" is normally derived from consumption, see `reporting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Finished,
    Expired,
}

/// A purchased bundle of consumable appointment slots.
///
/// `total_sessions` is fixed at creation; there is deliberately no
/// remaining-count column, balances are always derived.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditGrant {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Uuid,
    pub total_sessions: i32,
    pub expiry_date: Option<NaiveDate>,
    pub status: GrantStatus,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CreditGrant {
    pub fn bucket(&self) -> ServiceType {
        ServiceType::bucket_of(self.total_sessions)
    }

    pub fn is_active(&self) -> bool {
        self.status == GrantStatus::Active
    }

    pub fn has_lapsed(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry < today)
    }
}

// ============================================================================
// APPOINTMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    /// Absence notified in advance; does not consume a credit
    Absent,
    AbsentWithoutNotice,
    /// Superseded by a replacement appointment
    Rescheduled,
    Cancelled,
}

impl AppointmentStatus {
    /// Statuses that hold a unit of granted capacity.
    pub const CONSUMING: [AppointmentStatus; 4] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::AbsentWithoutNotice,
    ];

    pub fn is_consuming(&self) -> bool {
        Self::CONSUMING.contains(self)
    }

    /// Whether the row may still move to another status.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Confirmed)
    }

    pub fn valid_transitions(&self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match self {
            Scheduled => &[
                Confirmed,
                Completed,
                Absent,
                AbsentWithoutNotice,
                Cancelled,
                Rescheduled,
            ],
            Confirmed => &[Completed, AbsentWithoutNotice, Cancelled, Rescheduled],
            Completed | Absent | AbsentWithoutNotice | Rescheduled | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Absent => "absent",
            Self::AbsentWithoutNotice => "absent_without_notice",
            Self::Rescheduled => "rescheduled",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled clinical encounter ("session")
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub service_type: ServiceType,
    pub grant_id: Option<Uuid>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn consumes(&self) -> bool {
        self.status.is_consuming()
    }

    pub fn draws_on(&self, grant_id: Uuid) -> bool {
        self.grant_id == Some(grant_id)
    }

    /// Replacement row for a reschedule; keeps patient, service, duration and grant.
    pub fn replacement(&self, date: NaiveDate, time: NaiveTime, notes: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            professional_id: self.professional_id,
            patient_id: self.patient_id,
            date,
            time,
            duration_minutes: self.duration_minutes,
            status: AppointmentStatus::Scheduled,
            service_type: self.service_type,
            grant_id: self.grant_id,
            notes: notes.unwrap_or_else(|| self.notes.clone()),
            created_at: Utc::now(),
        }
    }
}

/// Requested slot; date and time are validated before anything is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentSlot {
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl AppointmentSlot {
    pub fn at(date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            date: Some(date),
            time: Some(time),
        }
    }

    /// `count` slots one week apart starting at `date`.
    pub fn weekly_series(date: NaiveDate, time: NaiveTime, count: usize) -> Vec<Self> {
        (0..count)
            .filter_map(|week| {
                let offset = Duration::try_weeks(i64::try_from(week).ok()?)?;
                date.checked_add_signed(offset)
            })
            .map(|day| Self::at(day, time))
            .collect()
    }
}

/// Direct edit of an appointment; status and grant are never touched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentEdit {
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub duration_minutes: Option<i32>,
    pub notes: Option<String>,
}

// ============================================================================
// LEDGER SNAPSHOT
// ============================================================================

/// Every record of one patient the accounting engine needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientLedger {
    pub patient_id: Uuid,
    pub grants: Vec<CreditGrant>,
    pub payments: Vec<Payment>,
    pub appointments: Vec<Appointment>,
}

impl PatientLedger {
    pub fn new(patient_id: Uuid) -> Self {
        Self {
            patient_id,
            ..Default::default()
        }
    }

    pub fn grant_for_payment(&self, payment_id: Uuid) -> Option<&CreditGrant> {
        self.grants
            .iter()
            .find(|grant| grant.payment_id == Some(payment_id))
    }
}
