use super::{owned_patient, AppJson};
use crate::error::{api_success, ApiResponse, ApiResult};
use crate::middleware::ProfessionalContext;
use crate::server::ClinicServer;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use credit_ledger::{AgeGroup, NewPatient, Patient, PatientStatus};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
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

/// Full replacement of the editable fields
#[derive(Debug, Deserialize)]
pub struct UpdatePatientRequest {
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub cpf: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub status: PatientStatus,
    #[serde(default)]
    pub notes: String,
    pub age_group: Option<AgeGroup>,
    pub guardian_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: PatientStatus,
}

pub async fn list_patients(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
) -> ApiResult<Json<ApiResponse<Vec<Patient>>>> {
    let patients = server.ledger.list_patients(ctx.professional_id).await?;
    Ok(Json(api_success(patients)))
}

pub async fn create_patient(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    AppJson(request): AppJson<CreatePatientRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Patient>>)> {
    let patient = server
        .ledger
        .register_patient(NewPatient {
            professional_id: ctx.professional_id,
            name: request.name,
            email: request.email,
            phone: request.phone,
            cpf: request.cpf,
            date_of_birth: request.date_of_birth,
            status: request.status,
            notes: request.notes,
            age_group: request.age_group,
            guardian_name: request.guardian_name,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(api_success(patient))))
}

pub async fn get_patient(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(patient_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Patient>>> {
    let patient = owned_patient(&server, ctx, patient_id).await?;
    Ok(Json(api_success(patient)))
}

pub async fn update_patient(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(patient_id): Path<Uuid>,
    AppJson(request): AppJson<UpdatePatientRequest>,
) -> ApiResult<Json<ApiResponse<Patient>>> {
    let existing = owned_patient(&server, ctx, patient_id).await?;
    let patient = server
        .ledger
        .update_patient(Patient {
            name: request.name,
            email: request.email,
            phone: request.phone,
            cpf: request.cpf,
            date_of_birth: request.date_of_birth,
            status: request.status,
            notes: request.notes,
            age_group: request.age_group,
            guardian_name: request.guardian_name,
            ..existing
        })
        .await?;
    Ok(Json(api_success(patient)))
}

pub async fn set_patient_status(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(patient_id): Path<Uuid>,
    AppJson(request): AppJson<SetStatusRequest>,
) -> ApiResult<Json<ApiResponse<Patient>>> {
    owned_patient(&server, ctx, patient_id).await?;
    let patient = server
        .ledger
        .set_patient_status(patient_id, request.status)
        .await?;
    Ok(Json(api_success(patient)))
}

pub async fn delete_patient(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(patient_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    owned_patient(&server, ctx, patient_id).await?;
    server.ledger.delete_patient(patient_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
