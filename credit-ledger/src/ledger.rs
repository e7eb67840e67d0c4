//! Credit accounting engine.
//!
//! Everything here is a pure function over a [`PatientLedger`] snapshot.
//! Balances are re-derived from grants, payments and appointment statuses
//! on every call; nothing in the store caches a remaining count.

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Appointment, AppointmentSlot, AppointmentStatus, CreditGrant, PatientLedger, PaymentStatus,
    ServiceType,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Batch of slots to book for one patient and service type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub service_type: ServiceType,
    pub slots: Vec<AppointmentSlot>,
    pub notes: Option<String>,
    pub duration_minutes: Option<i32>,
}

/// Credits of `service_type` the patient can still schedule. Never fails, never negative.
pub fn available_credits(ledger: &PatientLedger, service_type: ServiceType) -> u32 {
    let grants: Vec<&CreditGrant> = matching_grants(ledger, service_type).collect();

    let total_granted: i64 = grants
        .iter()
        .map(|grant| i64::from(grant.total_sessions.max(0)))
        .sum();
    let total_consumed = count_as_i64(
        ledger
            .appointments
            .iter()
            .filter(|appt| appt.consumes())
            .filter(|appt| grants.iter().any(|grant| appt.draws_on(grant.id)))
            .count(),
    );

    let mut remaining = (total_granted - total_consumed).max(0);

    if service_type == ServiceType::Single {
        remaining += ungranted_single_balance(ledger);
    }

    u32::try_from(remaining).unwrap_or(u32::MAX)
}

/// Paid single payments that never got a grant row, minus ungranted single
/// appointments that still hold capacity. Clamped at zero.
fn ungranted_single_balance(ledger: &PatientLedger) -> i64 {
    let paid_without_grant = count_as_i64(
        ledger
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Paid && p.service_type == ServiceType::Single)
            .filter(|p| ledger.grant_for_payment(p.id).is_none())
            .count(),
    );
    let consumed_without_grant = count_as_i64(
        ledger
            .appointments
            .iter()
            .filter(|appt| appt.service_type == ServiceType::Single)
            .filter(|appt| appt.grant_id.is_none() && appt.consumes())
            .count(),
    );

    (paid_without_grant - consumed_without_grant).max(0)
}

/// Consuming appointments that reference `grant`.
pub fn grant_consumption(grant: &CreditGrant, appointments: &[Appointment]) -> u32 {
    let used = appointments
        .iter()
        .filter(|appt| appt.draws_on(grant.id) && appt.consumes())
        .count();
    u32::try_from(used).unwrap_or(u32::MAX)
}

/// Spare capacity on a single grant.
pub fn grant_remaining(grant: &CreditGrant, appointments: &[Appointment]) -> u32 {
    let total = u32::try_from(grant.total_sessions).unwrap_or(0);
    total.saturating_sub(grant_consumption(grant, appointments))
}

/// Pick a grant for each of `count` new slots.
///
/// Grants are drained earliest expiry first (undated last, then oldest
/// issuance). Slots beyond the spare capacity of every grant get `None`;
/// the caller has already checked that the aggregate balance covers them.
pub fn allocate_grants(
    ledger: &PatientLedger,
    service_type: ServiceType,
    count: usize,
) -> Vec<Option<Uuid>> {
    let mut candidates: Vec<&CreditGrant> = matching_grants(ledger, service_type).collect();
    candidates.sort_by(|a, b| expiry_order(a, b));

    let mut allocation = Vec::with_capacity(count);
    for grant in candidates {
        let spare = grant_remaining(grant, &ledger.appointments);
        for _ in 0..spare {
            if allocation.len() == count {
                break;
            }
            allocation.push(Some(grant.id));
        }
    }
    allocation.resize(count, None);
    allocation
}

/// Build the appointments for a booking without writing anything.
///
/// Fails on a missing date or time in any slot, or when the balance does
/// not cover the whole batch. Either every slot is returned or none.
pub fn plan_booking(
    ledger: &PatientLedger,
    request: &BookingRequest,
    config: &LedgerConfig,
) -> LedgerResult<Vec<Appointment>> {
    if request.slots.is_empty() {
        return Err(LedgerError::Validation(
            "At least one slot is required".to_string(),
        ));
    }

    let mut slots = Vec::with_capacity(request.slots.len());
    for (index, slot) in request.slots.iter().enumerate() {
        match (slot.date, slot.time) {
            (Some(date), Some(time)) => slots.push((date, time)),
            _ => {
                return Err(LedgerError::Validation(format!(
                    "Slot {} is missing a date or time",
                    index + 1
                )))
            }
        }
    }

    let duration_minutes = request
        .duration_minutes
        .unwrap_or(config.default_duration_minutes);
    if duration_minutes <= 0 {
        return Err(LedgerError::Validation(
            "Duration must be positive".to_string(),
        ));
    }

    let requested = u32::try_from(slots.len()).unwrap_or(u32::MAX);
    let available = available_credits(ledger, request.service_type);
    if available < requested {
        return Err(LedgerError::InsufficientCredits {
            requested,
            available,
        });
    }

    let grant_ids = allocate_grants(ledger, request.service_type, slots.len());
    let created_at = Utc::now();

    Ok(slots
        .into_iter()
        .zip(grant_ids)
        .enumerate()
        .map(|(index, ((date, time), grant_id))| Appointment {
            id: Uuid::new_v4(),
            professional_id: request.professional_id,
            patient_id: request.patient_id,
            date,
            time,
            duration_minutes,
            status: AppointmentStatus::Scheduled,
            service_type: request.service_type,
            grant_id,
            notes: request
                .notes
                .clone()
                .unwrap_or_else(|| default_notes(request.service_type, index)),
            created_at,
        })
        .collect())
}

fn default_notes(service_type: ServiceType, index: usize) -> String {
    match service_type {
        ServiceType::Package => format!("Session {} of package", index + 1),
        ServiceType::Single => "Single session".to_string(),
    }
}

fn matching_grants(
    ledger: &PatientLedger,
    service_type: ServiceType,
) -> impl Iterator<Item = &CreditGrant> {
    ledger
        .grants
        .iter()
        .filter(move |grant| grant.is_active() && grant.bucket() == service_type)
}

fn expiry_order(a: &CreditGrant, b: &CreditGrant) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.created_at.cmp(&b.created_at))
}

fn count_as_i64(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
