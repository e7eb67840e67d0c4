use super::{outcome_response, owned_patient, AppJson};
use crate::error::{api_success, ApiError, ApiResponse, ApiResult};
use crate::middleware::ProfessionalContext;
use crate::server::ClinicServer;
use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use credit_ledger::{Appointment, AppointmentEdit, AppointmentSlot, AppointmentStatus, ServiceType};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentsRequest {
    pub patient_id: Uuid,
    pub service_type: ServiceType,
    pub slots: Vec<AppointmentSlot>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub notes: Option<String>,
}

async fn owned_appointment(
    server: &ClinicServer,
    ctx: ProfessionalContext,
    appointment_id: Uuid,
) -> ApiResult<Appointment> {
    let appointment = server.ledger.get_appointment(appointment_id).await?;
    if appointment.professional_id != ctx.professional_id {
        return Err(ApiError::not_found("appointment"));
    }
    Ok(appointment)
}

pub async fn list_appointments(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
) -> ApiResult<Json<ApiResponse<Vec<Appointment>>>> {
    let appointments = server.ledger.list_appointments(ctx.professional_id).await?;
    Ok(Json(api_success(appointments)))
}

/// Book a batch of slots against the patient's balance; all or nothing
pub async fn create_appointments(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    AppJson(request): AppJson<CreateAppointmentsRequest>,
) -> ApiResult<Response> {
    owned_patient(&server, ctx, request.patient_id).await?;
    let outcome = server
        .ledger
        .create_appointments(
            request.patient_id,
            request.service_type,
            request.slots,
            request.notes,
        )
        .await;
    Ok(outcome_response(outcome))
}

pub async fn update_status(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(appointment_id): Path<Uuid>,
    AppJson(request): AppJson<UpdateStatusRequest>,
) -> ApiResult<Response> {
    owned_appointment(&server, ctx, appointment_id).await?;
    let outcome = server
        .ledger
        .update_appointment_status(appointment_id, request.status)
        .await;
    Ok(outcome_response(outcome))
}

pub async fn cancel_appointment(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(appointment_id): Path<Uuid>,
    AppJson(request): AppJson<CancelRequest>,
) -> ApiResult<Response> {
    owned_appointment(&server, ctx, appointment_id).await?;
    let outcome = server
        .ledger
        .cancel_appointment(appointment_id, request.confirmed)
        .await;
    Ok(outcome_response(outcome))
}

pub async fn reschedule_appointment(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(appointment_id): Path<Uuid>,
    AppJson(request): AppJson<RescheduleRequest>,
) -> ApiResult<Response> {
    owned_appointment(&server, ctx, appointment_id).await?;
    let outcome = server
        .ledger
        .reschedule_appointment(appointment_id, request.date, request.time, request.notes)
        .await;
    Ok(outcome_response(outcome))
}

pub async fn edit_appointment(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(appointment_id): Path<Uuid>,
    AppJson(edit): AppJson<AppointmentEdit>,
) -> ApiResult<Response> {
    owned_appointment(&server, ctx, appointment_id).await?;
    let outcome = server.ledger.edit_appointment(appointment_id, edit).await;
    Ok(outcome_response(outcome))
}
