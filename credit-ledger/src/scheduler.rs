use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{self, BookingRequest};
use crate::models::*;
use crate::repository::LedgerRepository;
use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Creation and status changes of appointments, authorized against the ledger
pub struct AppointmentScheduler {
    repository: Arc<dyn LedgerRepository>,
    config: LedgerConfig,
}

impl AppointmentScheduler {
    pub fn new(repository: Arc<dyn LedgerRepository>, config: LedgerConfig) -> Self {
        Self { repository, config }
    }

    // ========================================================================
    // BALANCE
    // ========================================================================

    pub async fn available_credits(
        &self,
        patient_id: Uuid,
        service_type: ServiceType,
    ) -> LedgerResult<u32> {
        let ledger = self.repository.patient_ledger(patient_id).await?;
        Ok(ledger::available_credits(&ledger, service_type))
    }

    // ========================================================================
    // CREATION
    // ========================================================================

    /// Book a batch of slots. All slots are stored or none is.
    pub async fn create_appointments(
        &self,
        patient_id: Uuid,
        service_type: ServiceType,
        slots: Vec<AppointmentSlot>,
        notes: Option<String>,
    ) -> LedgerResult<Vec<Appointment>> {
        let patient = self.repository.get_patient(patient_id).await?;
        let request = BookingRequest {
            patient_id,
            professional_id: patient.professional_id,
            service_type,
            slots,
            notes: notes.filter(|n| !n.trim().is_empty()),
            duration_minutes: None,
        };
        let config = &self.config;
        let planner = |snapshot: &PatientLedger| ledger::plan_booking(snapshot, &request, config);

        match self
            .repository
            .book_appointments(patient_id, service_type, &planner)
            .await
        {
            Ok(created) => {
                info!(
                    patient_id = %patient_id,
                    service_type = %service_type,
                    count = created.len(),
                    "Appointments booked"
                );
                Ok(created)
            }
            Err(e @ LedgerError::InsufficientCredits { .. }) => {
                info!(patient_id = %patient_id, service_type = %service_type, error = %e, "Booking refused");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // STATUS
    // ========================================================================

    /// Set a non-cancel status. Setting the current status again is a no-op.
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> LedgerResult<Appointment> {
        let current = self.repository.get_appointment(appointment_id).await?;
        if current.status == status {
            debug!(appointment_id = %appointment_id, status = %status, "Status unchanged");
            return Ok(current);
        }

        match status {
            AppointmentStatus::Cancelled => return Err(LedgerError::ConfirmationRequired),
            AppointmentStatus::Rescheduled => {
                return Err(LedgerError::Validation(
                    "Use reschedule to move an appointment to a new slot".to_string(),
                ))
            }
            _ => {}
        }

        self.transition(current, status).await
    }

    /// Cancel after explicit confirmation; the credit frees itself.
    pub async fn cancel(&self, appointment_id: Uuid, confirmed: bool) -> LedgerResult<Appointment> {
        if !confirmed {
            return Err(LedgerError::ConfirmationRequired);
        }

        let current = self.repository.get_appointment(appointment_id).await?;
        if current.status == AppointmentStatus::Cancelled {
            return Ok(current);
        }

        let cancelled = self.transition(current, AppointmentStatus::Cancelled).await?;
        info!(
            appointment_id = %appointment_id,
            grant_id = ?cancelled.grant_id,
            "Appointment cancelled"
        );
        Ok(cancelled)
    }

    async fn transition(
        &self,
        current: Appointment,
        status: AppointmentStatus,
    ) -> LedgerResult<Appointment> {
        if !current.status.can_transition_to(status) {
            warn!(
                appointment_id = %current.id,
                from = %current.status,
                to = %status,
                "Invalid status transition attempted"
            );
            return Err(LedgerError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        self.repository
            .transition_appointment(current.id, current.status, status)
            .await
    }

    // ========================================================================
    // RESCHEDULE AND EDIT
    // ========================================================================

    /// Supersede an open appointment with a new Scheduled one.
    ///
    /// The replacement keeps patient, service type, duration and grant, and
    /// the old notes unless `notes` is given. No balance check: the old row's
    /// credit moves to the new one in the same store call.
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        notes: Option<String>,
    ) -> LedgerResult<Appointment> {
        let old = self.repository.get_appointment(appointment_id).await?;
        if !old.status.can_transition_to(AppointmentStatus::Rescheduled) {
            return Err(LedgerError::InvalidTransition {
                from: old.status,
                to: AppointmentStatus::Rescheduled,
            });
        }

        let replacement = old.replacement(date, time, notes.filter(|n| !n.trim().is_empty()));
        let created = self
            .repository
            .supersede_appointment(appointment_id, replacement)
            .await?;

        info!(old_id = %appointment_id, new_id = %created.id, date = %date, "Appointment moved");
        Ok(created)
    }

    /// Change date, time, duration or notes in place without an audit row
    pub async fn edit(&self, appointment_id: Uuid, edit: AppointmentEdit) -> LedgerResult<Appointment> {
        if edit.duration_minutes.is_some_and(|d| d <= 0) {
            return Err(LedgerError::Validation(
                "Duration must be positive".to_string(),
            ));
        }
        self.repository.edit_appointment(appointment_id, &edit).await
    }
}
