use super::owned_patient;
use crate::error::{api_success, ApiResponse, ApiResult};
use crate::middleware::ProfessionalContext;
use crate::server::ClinicServer;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use credit_ledger::{CreditBalance, CreditGrant, GrantWithUsage, ReconciliationReport};
use tracing::info;
use uuid::Uuid;

/// Spendable credits of both buckets
pub async fn credit_balance(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(patient_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<CreditBalance>>> {
    owned_patient(&server, ctx, patient_id).await?;
    let balance = server.ledger.credit_balance(patient_id).await?;
    Ok(Json(api_success(balance)))
}

pub async fn patient_grants(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
    Path(patient_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<GrantWithUsage>>>> {
    owned_patient(&server, ctx, patient_id).await?;
    let grants = server.ledger.patient_grants(patient_id).await?;
    Ok(Json(api_success(grants)))
}

/// Issue missing grants for the caller's paid payments
pub async fn run_reconciliation(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
) -> ApiResult<Json<ApiResponse<ReconciliationReport>>> {
    let report = server
        .ledger
        .run_reconciliation(Some(ctx.professional_id), Utc::now().date_naive())
        .await?;
    Ok(Json(api_success(report)))
}

/// Expire the caller's lapsed grants
pub async fn expire_grants(
    State(server): State<ClinicServer>,
    ctx: ProfessionalContext,
) -> ApiResult<Json<ApiResponse<Vec<CreditGrant>>>> {
    let expired = server
        .ledger
        .expire_lapsed_grants(Some(ctx.professional_id), Utc::now().date_naive())
        .await?;
    info!(
        professional_id = %ctx.professional_id,
        count = expired.len(),
        "Grant expiry pass finished"
    );
    Ok(Json(api_success(expired)))
}
