use crate::ledger::grant_consumption;
use crate::models::*;
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// GRANT USAGE
// ============================================================================

/// Derived usage of one grant; "finished" is never read from storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantUsage {
    pub grant_id: Uuid,
    pub patient_id: Uuid,
    pub total: u32,
    /// Appointments holding a credit of this grant
    pub used: u32,
    /// Delivered or burned by an unnotified absence
    pub consumed: u32,
    /// Still ahead (Scheduled or Confirmed)
    pub scheduled: u32,
    pub remaining: u32,
    pub is_finished: bool,
    pub progress_percent: u32,
}

impl GrantUsage {
    pub fn of(grant: &CreditGrant, appointments: &[Appointment]) -> Self {
        let total = u32::try_from(grant.total_sessions).unwrap_or(0);
        let used = grant_consumption(grant, appointments);
        let grant_id = grant.id;
        let on_grant = move || appointments.iter().filter(move |a| a.draws_on(grant_id));
        let consumed = count(on_grant().filter(|a| {
            matches!(
                a.status,
                AppointmentStatus::Completed | AppointmentStatus::AbsentWithoutNotice
            )
        }));
        let scheduled = count(on_grant().filter(|a| a.status.is_open()));
        let remaining = total.saturating_sub(used);
        let progress_percent = if total == 0 {
            100
        } else {
            (used.saturating_mul(100) / total).min(100)
        };

        Self {
            grant_id: grant.id,
            patient_id: grant.patient_id,
            total,
            used,
            consumed,
            scheduled,
            remaining,
            is_finished: remaining == 0,
            progress_percent,
        }
    }
}

fn count<I: Iterator>(iter: I) -> u32 {
    u32::try_from(iter.count()).unwrap_or(u32::MAX)
}

// ============================================================================
// DASHBOARD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowBalanceAlert {
    pub grant_id: Uuid,
    pub patient_id: Uuid,
    pub remaining: u32,
}

/// Active package grants whose remaining count is at or below `threshold`
pub fn low_balance_alerts(
    grants: &[CreditGrant],
    appointments: &[Appointment],
    threshold: u32,
) -> Vec<LowBalanceAlert> {
    grants
        .iter()
        .filter(|g| g.is_active() && g.bucket() == ServiceType::Package)
        .map(|g| GrantUsage::of(g, appointments))
        .filter(|usage| usage.remaining <= threshold)
        .map(|usage| LowBalanceAlert {
            grant_id: usage.grant_id,
            patient_id: usage.patient_id,
            remaining: usage.remaining,
        })
        .collect()
}

/// Scheduled or Confirmed appointments, soonest first
pub fn pending_appointments(appointments: &[Appointment]) -> Vec<Appointment> {
    let mut pending: Vec<Appointment> = appointments
        .iter()
        .filter(|a| a.status.is_open())
        .cloned()
        .collect();
    pending.sort_by_key(|a| (a.date, a.time));
    pending
}

// ============================================================================
// PATIENT HISTORY
// ============================================================================

/// Clinical history of one patient, newest session first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientHistory {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub phone: String,
    pub sessions: Vec<Appointment>,
    pub total_sessions: u32,
    pub completed_sessions: u32,
    /// Completed over total, rounded to a whole percent; 0 with no sessions
    pub engagement_percent: u32,
}

/// Active patients whose name contains `search` (case-insensitive), by name
pub fn active_patients(patients: &[Patient], search: Option<&str>) -> Vec<Patient> {
    let needle = search.map(str::to_lowercase).unwrap_or_default();
    let mut active: Vec<Patient> = patients
        .iter()
        .filter(|p| p.status == PatientStatus::Active)
        .filter(|p| p.name.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    active.sort_by(|a, b| a.name.cmp(&b.name));
    active
}

/// Every non-cancelled session of `patient`
pub fn patient_history(patient: &Patient, appointments: &[Appointment]) -> PatientHistory {
    let mut sessions: Vec<Appointment> = appointments
        .iter()
        .filter(|a| a.patient_id == patient.id && a.status != AppointmentStatus::Cancelled)
        .cloned()
        .collect();
    sessions.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.time.cmp(&a.time)));

    let total_sessions = count(sessions.iter());
    let completed_sessions = count(
        sessions
            .iter()
            .filter(|a| a.status == AppointmentStatus::Completed),
    );
    let engagement_percent = if total_sessions == 0 {
        0
    } else {
        (completed_sessions.saturating_mul(100) + total_sessions / 2) / total_sessions
    };

    PatientHistory {
        patient_id: patient.id,
        patient_name: patient.name.clone(),
        phone: patient.phone.clone(),
        sessions,
        total_sessions,
        completed_sessions,
        engagement_percent,
    }
}

// ============================================================================
// FINANCIAL REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Today,
    Week,
    #[default]
    Month,
    Year,
    All,
}

impl ReportPeriod {
    /// Whether a payment dated `date` falls in the period ending `today`
    pub fn contains(self, date: NaiveDate, today: NaiveDate) -> bool {
        match self {
            Self::Today => date == today,
            // weeks start on Sunday
            Self::Week => {
                let since_sunday = i64::from(today.weekday().num_days_from_sunday());
                date >= today - Duration::days(since_sunday)
            }
            Self::Month => date >= today.with_day(1).unwrap_or(today),
            Self::Year => date >= today.with_ordinal(1).unwrap_or(today),
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientReceipts {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub amount: Decimal,
    pub last_payment: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub period: ReportPeriod,
    pub total_receipts: Decimal,
    /// Highest amount first
    pub patients: Vec<PatientReceipts>,
}

/// Paid receipts in `period`, totalled overall and per patient
pub fn financial_summary(
    payments: &[Payment],
    patients: &[Patient],
    period: ReportPeriod,
    today: NaiveDate,
) -> FinancialSummary {
    let mut total_receipts = Decimal::ZERO;
    let mut by_patient: HashMap<Uuid, (Decimal, NaiveDate)> = HashMap::new();

    for payment in payments
        .iter()
        .filter(|p| p.is_paid() && period.contains(p.date, today))
    {
        total_receipts += payment.amount;
        let entry = by_patient
            .entry(payment.patient_id)
            .or_insert((Decimal::ZERO, payment.date));
        entry.0 += payment.amount;
        entry.1 = entry.1.max(payment.date);
    }

    let mut rows: Vec<PatientReceipts> = by_patient
        .into_iter()
        .map(|(patient_id, (amount, last_payment))| PatientReceipts {
            patient_id,
            patient_name: patients
                .iter()
                .find(|p| p.id == patient_id)
                .map_or_else(|| "Unknown patient".to_string(), |p| p.name.clone()),
            amount,
            last_payment,
        })
        .collect();
    rows.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.patient_name.cmp(&b.patient_name)));

    FinancialSummary {
        period,
        total_receipts,
        patients: rows,
    }
}
