//! HTTP handlers, one module per resource

pub mod appointments;
pub mod credits;
pub mod health;
pub mod patients;
pub mod payments;
pub mod professionals;
pub mod reports;

use crate::error::{ApiError, ApiResult};
use crate::middleware::ProfessionalContext;
use crate::server::ClinicServer;
use axum::{
    extract::{FromRequest, FromRequestParts},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use credit_ledger::{OperationOutcome, Patient};
use serde::Serialize;
use uuid::Uuid;

/// JSON body whose rejection is reported as an `ApiError`
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

/// Query string whose rejection is reported as an `ApiError`
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct AppQuery<T>(pub T);

/// Load a patient, hiding those owned by another professional
pub(crate) async fn owned_patient(
    server: &ClinicServer,
    ctx: ProfessionalContext,
    patient_id: Uuid,
) -> ApiResult<Patient> {
    let patient = server.ledger.get_patient(patient_id).await?;
    if patient.professional_id != ctx.professional_id {
        return Err(ApiError::not_found("patient"));
    }
    Ok(patient)
}

/// 200 with the outcome on success, 422 with the same body otherwise
pub(crate) fn outcome_response<T: Serialize>(outcome: OperationOutcome<T>) -> Response {
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(outcome)).into_response()
}
