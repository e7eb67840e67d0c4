use super::AppJson;
use crate::error::{api_success, ApiResponse, ApiResult};
use crate::middleware::{AdminContext, ProfessionalContext};
use crate::server::ClinicServer;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use credit_ledger::{NewProfessional, Professional, ProfessionalStatus};
use serde::Deserialize;
use uuid::Uuid;

/// Full replacement of the editable fields
#[derive(Debug, Deserialize)]
pub struct UpdateProfessionalRequest {
    pub full_name: String,
    #[serde(default)]
    pub registration_number: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    pub specialty: Option<String>,
    pub status: ProfessionalStatus,
}

#[derive(Debug, Deserialize)]
pub struct SetProfessionalStatusRequest {
    pub status: ProfessionalStatus,
}

pub async fn list_professionals(
    State(server): State<ClinicServer>,
    _admin: AdminContext,
) -> ApiResult<Json<ApiResponse<Vec<Professional>>>> {
    let professionals = server.ledger.list_professionals().await?;
    Ok(Json(api_success(professionals)))
}

pub async fn create_professional(
    State(server): State<ClinicServer>,
    _admin: AdminContext,
    AppJson(request): AppJson<NewProfessional>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Professional>>)> {
    let professional = server.ledger.register_professional(request).await?;
    Ok((StatusCode::CREATED, Json(api_success(professional))))
}

pub async fn get_professional(
    State(server): State<ClinicServer>,
    _admin: AdminContext,
    Path(professional_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Professional>>> {
    let professional = server.ledger.get_professional(professional_id).await?;
    Ok(Json(api_success(professional)))
}

pub async fn update_professional(
    State(server): State<ClinicServer>,
    _admin: AdminContext,
    Path(professional_id): Path<Uuid>,
    AppJson(request): AppJson<UpdateProfessionalRequest>,
) -> ApiResult<Json<ApiResponse<Professional>>> {
    let existing = server.ledger.get_professional(professional_id).await?;
    let professional = server
        .ledger
        .update_professional(Professional {
            full_name: request.full_name,
            registration_number: request.registration_number,
            phone: request.phone,
            email: request.email,
            specialty: request.specialty,
            status: request.status,
            ..existing
        })
        .await?;
    Ok(Json(api_success(professional)))
}

pub async fn set_professional_status(
    State(server): State<ClinicServer>,
    _admin: AdminContext,
    Path(professional_id): Path<Uuid>,
    AppJson(request): AppJson<SetProfessionalStatusRequest>,
) -> ApiResult<Json<ApiResponse<Professional>>> {
    let professional = server
        .ledger
        .set_professional_status(professional_id, request.status)
        .await?;
    Ok(Json(api_success(professional)))
}

/// Refused with 409 while the professional still has patients
pub async fn delete_professional(
    State(server): State<ClinicServer>,
    _admin: AdminContext,
    Path(professional_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    server.ledger.delete_professional(professional_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Registry entry of the professional the request acts for
pub async fn current_professional(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
) -> ApiResult<Json<ApiResponse<Professional>>> {
    let professional = server.ledger.get_professional(ctx.professional_id).await?;
    Ok(Json(api_success(professional)))
}
